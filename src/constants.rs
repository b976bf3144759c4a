//! Named timeouts and poll intervals from the concurrency & resource model.
//! Kept centralized so every component that reads one is citing the same
//! number rather than redeclaring a magic duration inline.

use std::time::Duration;

pub const DEVICE_SCAN_DELAY: Duration = Duration::from_millis(300);
pub const DEVICE_SCAN_TIMEOUT: Duration = Duration::from_secs(10);
pub const VOLUME_SCAN_DELAY: Duration = Duration::from_millis(300);
pub const DESTROY_VOLUME_TIMEOUT: Duration = Duration::from_secs(300);
pub const MONITOR_STATE_TIMEOUT: Duration = Duration::from_secs(600);
pub const ACCESS_DENY_TIMEOUT: Duration = Duration::from_secs(300);
pub const SCAN_INTERVAL: Duration = Duration::from_millis(300);
pub const CURL_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_FUXI_PORT: u16 = 7879;
pub const DEFAULT_VOLUME_DIR: &str = "/fuxi/data";
pub const DEFAULT_VOLUME_FROM: &str = "fuxi";
pub const DEFAULT_VOLUME_SIZE_GIB: u64 = 1;
pub const DEFAULT_FSTYPE: &str = "ext4";
pub const DEFAULT_SHARE_PROTO: &str = "NFS";

pub const ATTACH_MUTEX_NAME: &str = "openstack-attach-volume";
