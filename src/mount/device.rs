//! Enumerates `/sys/block/*` and reads device size from sysfs. Used to diff
//! device sets around an attach operation so a freshly-appeared `/dev/sdX`
//! can be correlated with the volume that was just attached.

use std::path::{Path, PathBuf};

use crate::error::FuxiResult;
use crate::model::DeviceSet;

const SYS_BLOCK: &str = "/sys/block";

pub struct BlockDeviceScanner {
    sys_block: PathBuf,
}

impl BlockDeviceScanner {
    pub fn new() -> Self {
        Self {
            sys_block: PathBuf::from(SYS_BLOCK),
        }
    }

    #[cfg(test)]
    pub fn with_sys_block(sys_block: PathBuf) -> Self {
        Self { sys_block }
    }

    /// Every entry currently under `/sys/block`.
    pub fn scan(&self) -> FuxiResult<DeviceSet> {
        let mut devices = DeviceSet::new();
        let entries = match std::fs::read_dir(&self.sys_block) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(devices),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            devices.insert(entry?.path());
        }
        Ok(devices)
    }

    /// Size of the device at `sys_path` in GiB: `sectors * hw_sector_size / 2^30`.
    pub fn size_gib(&self, sys_path: &Path) -> FuxiResult<f64> {
        let sectors: u64 = read_trimmed(&sys_path.join("size"))?.parse()?;
        let hw_sector_size: u64 =
            read_trimmed(&sys_path.join("queue").join("hw_sector_size"))?.parse()?;
        let bytes = sectors as f64 * hw_sector_size as f64;
        Ok(bytes / (1024f64 * 1024f64 * 1024f64))
    }
}

fn read_trimmed(path: &Path) -> FuxiResult<String> {
    Ok(std::fs::read_to_string(path)?.trim().to_string())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    #[test]
    fn scan_lists_sys_block_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sda")).unwrap();
        fs::create_dir(dir.path().join("sdb")).unwrap();
        let scanner = BlockDeviceScanner::with_sys_block(dir.path().to_path_buf());
        let devices = scanner.scan().unwrap();
        assert_eq!(devices.len(), 2);
    }

    #[test]
    fn scan_of_missing_dir_is_empty() {
        let scanner = BlockDeviceScanner::with_sys_block(PathBuf::from("/no/such/path"));
        assert!(scanner.scan().unwrap().is_empty());
    }

    #[test]
    fn size_gib_reads_sectors_and_hw_sector_size() {
        let dir = tempfile::tempdir().unwrap();
        let dev = dir.path().join("sdb");
        fs::create_dir_all(dev.join("queue")).unwrap();
        // 2 GiB worth of 512-byte sectors.
        let sectors = 2u64 * 1024 * 1024 * 1024 / 512;
        fs::write(dev.join("size"), sectors.to_string()).unwrap();
        fs::write(dev.join("queue").join("hw_sector_size"), "512").unwrap();
        let scanner = BlockDeviceScanner::with_sys_block(dir.path().to_path_buf());
        let size = scanner.size_gib(&dev).unwrap();
        assert!((size - 2.0).abs() < 1e-6);
    }
}
