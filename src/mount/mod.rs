pub mod device;
pub mod mounter;

pub use device::BlockDeviceScanner;
pub use mounter::Mounter;
