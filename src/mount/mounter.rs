//! Parses `/proc/mounts` and drives `mount`/`umount`/`mkfs` through an
//! [`Executor`]. `/proc/mounts` is the single source of truth for mount
//! state; this module keeps no cache of it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{FuxiError, FuxiResult};
use crate::executor::Executor;
use crate::model::MountInfo;

const PROC_MOUNTS: &str = "/proc/mounts";

pub struct Mounter {
    executor: Arc<dyn Executor>,
    proc_mounts_path: PathBuf,
}

impl Mounter {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            proc_mounts_path: PathBuf::from(PROC_MOUNTS),
        }
    }

    #[cfg(test)]
    pub fn with_proc_mounts_path(executor: Arc<dyn Executor>, path: PathBuf) -> Self {
        Self {
            executor,
            proc_mounts_path: path,
        }
    }

    /// Reads `/proc/mounts`, skipping blank lines and malformed entries.
    /// Entries whose device is in `filter_devices` or whose fstype is in
    /// `filter_fstypes` are excluded. Order is preserved.
    pub fn read_mounts(
        &self,
        filter_devices: &[&str],
        filter_fstypes: &[&str],
    ) -> FuxiResult<Vec<MountInfo>> {
        let contents = std::fs::read_to_string(&self.proc_mounts_path)?;
        Ok(parse_proc_mounts(&contents, filter_devices, filter_fstypes))
    }

    /// All mountpoints whose device equals `dev`. Callers are expected to
    /// have already resolved `dev` to its canonical (symlink-free) form.
    pub fn mountpoints_for_device(&self, dev: &Path) -> FuxiResult<Vec<PathBuf>> {
        Ok(self
            .read_mounts(&[], &[])?
            .into_iter()
            .filter(|m| m.device == dev)
            .map(|m| m.mountpoint)
            .collect())
    }

    pub fn is_mounted(&self, dev: &Path, mountpoint: &Path) -> FuxiResult<bool> {
        Ok(self
            .read_mounts(&[], &[])?
            .iter()
            .any(|m| m.device == dev && m.mountpoint == mountpoint))
    }

    pub async fn make_filesystem(&self, dev: &Path, fstype: &str) -> FuxiResult<()> {
        let dev_str = dev.to_string_lossy();
        self.executor
            .run(&["mkfs", "-t", fstype, "-F", &dev_str], true)
            .await
            .map_err(|e| FuxiError::MakeFilesystem {
                device: dev_str.into_owned(),
                fstype: fstype.to_string(),
                stderr: stderr_of(e),
            })?;
        Ok(())
    }

    pub async fn mount(&self, dev: &Path, mountpoint: &Path, fstype: Option<&str>) -> FuxiResult<()> {
        let dev_str = dev.to_string_lossy();
        let mp_str = mountpoint.to_string_lossy();
        let mut argv = vec!["mount"];
        if let Some(fstype) = fstype {
            argv.push("-t");
            argv.push(fstype);
        }
        argv.push(&dev_str);
        argv.push(&mp_str);
        self.executor
            .run(&argv, true)
            .await
            .map_err(|e| FuxiError::Mount {
                device: dev_str.into_owned(),
                mountpoint: mp_str.into_owned(),
                stderr: stderr_of(e),
            })?;
        Ok(())
    }

    pub async fn unmount(&self, target: &Path) -> FuxiResult<()> {
        let target_str = target.to_string_lossy();
        self.executor
            .run(&["umount", &target_str], true)
            .await
            .map_err(|e| FuxiError::Unmount {
                target: target_str.into_owned(),
                stderr: stderr_of(e),
            })?;
        Ok(())
    }

    /// Mounts `dev` at `mountpoint`, formatting it with `fstype` if the
    /// first mount attempt fails because the device is unformatted. Never
    /// reformats a device that mounted successfully, and never retries
    /// beyond the single format-then-remount attempt.
    pub async fn do_mount(&self, dev: &Path, mountpoint: &Path, fstype: &str) -> FuxiResult<()> {
        if self.is_mounted(dev, mountpoint)? {
            return Ok(());
        }
        match self.mount(dev, mountpoint, Some(fstype)).await {
            Ok(()) => Ok(()),
            Err(FuxiError::Mount { .. }) => {
                log::info!(
                    "mount of {} failed, attempting mkfs -t {} and retrying once",
                    dev.display(),
                    fstype
                );
                self.make_filesystem(dev, fstype).await?;
                self.mount(dev, mountpoint, Some(fstype)).await
            }
            Err(e) => Err(e),
        }
    }
}

fn stderr_of(e: FuxiError) -> String {
    match e {
        FuxiError::Execution { stderr, .. } => stderr,
        other => other.to_string(),
    }
}

fn parse_proc_mounts(contents: &str, filter_devices: &[&str], filter_fstypes: &[&str]) -> Vec<MountInfo> {
    let mut mounts = Vec::new();
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let device = fields[0];
        let fstype = fields[2];
        if filter_devices.contains(&device) || filter_fstypes.contains(&fstype) {
            continue;
        }
        mounts.push(MountInfo {
            device: PathBuf::from(unescape_octal(device)),
            mountpoint: PathBuf::from(unescape_octal(fields[1])),
            fstype: fstype.to_string(),
            opts: fields[3].to_string(),
        });
    }
    mounts
}

/// `/proc/mounts` escapes spaces, tabs and backslashes as `\040`, `\011`,
/// `\134`. Paths under `<volume_dir>` never contain these, but mountpoints
/// outside our control might.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = String::with_capacity(field.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            if let Ok(code) = u8::from_str_radix(&field[i + 1..i + 4], 8) {
                out.push(code as char);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::executor::fake::FakeExecutor;
    use crate::executor::CommandOutput;
    use std::io::Write;
    use std::sync::Arc;

    fn write_proc_mounts(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_well_formed_lines_and_skips_malformed() {
        let contents = "\n\
/dev/sda1 / ext4 rw,relatime 0 0\n\
bad line\n\
/dev/sdb1 /fuxi/data/cinder/v1 ext4 rw,relatime 0 0\n\
tmpfs /dev/shm tmpfs rw 0 0\n";
        let mounts = parse_proc_mounts(contents, &[], &[]);
        assert_eq!(mounts.len(), 3);
        assert_eq!(mounts[1].mountpoint, PathBuf::from("/fuxi/data/cinder/v1"));
    }

    #[test]
    fn filters_devices_and_fstypes() {
        let contents = "/dev/sda1 / ext4 rw 0 0\ntmpfs /dev/shm tmpfs rw 0 0\n";
        let mounts = parse_proc_mounts(contents, &["/dev/sda1"], &["tmpfs"]);
        assert!(mounts.is_empty());
    }

    #[test]
    fn unescapes_octal_space() {
        let contents = "/dev/sdb1 /fuxi/data/cinder/my\\040volume ext4 rw 0 0\n";
        let mounts = parse_proc_mounts(contents, &[], &[]);
        assert_eq!(
            mounts[0].mountpoint,
            PathBuf::from("/fuxi/data/cinder/my volume")
        );
    }

    #[tokio::test]
    async fn is_mounted_reflects_proc_mounts() {
        let f = write_proc_mounts("/dev/sdb1 /fuxi/data/cinder/v1 ext4 rw 0 0\n");
        let exec = Arc::new(FakeExecutor::new());
        let mounter = Mounter::with_proc_mounts_path(exec, f.path().to_path_buf());
        assert!(mounter
            .is_mounted(Path::new("/dev/sdb1"), Path::new("/fuxi/data/cinder/v1"))
            .unwrap());
        assert!(!mounter
            .is_mounted(Path::new("/dev/sdb1"), Path::new("/fuxi/data/cinder/v2"))
            .unwrap());
    }

    #[tokio::test]
    async fn do_mount_is_noop_when_already_mounted() {
        let f = write_proc_mounts("/dev/sdb1 /fuxi/data/cinder/v1 ext4 rw 0 0\n");
        let exec = Arc::new(FakeExecutor::new());
        let mounter = Mounter::with_proc_mounts_path(exec.clone(), f.path().to_path_buf());
        mounter
            .do_mount(Path::new("/dev/sdb1"), Path::new("/fuxi/data/cinder/v1"), "ext4")
            .await
            .unwrap();
        assert!(exec.calls().is_empty());
    }

    #[tokio::test]
    async fn do_mount_formats_once_then_remounts_on_failure() {
        let f = write_proc_mounts("");
        let exec = Arc::new(FakeExecutor::new());
        exec.on(
            "mount -t ext4 /dev/sdb1",
            Err(FuxiError::Mount {
                device: "/dev/sdb1".into(),
                mountpoint: "/fuxi/data/cinder/v1".into(),
                stderr: "wrong fs type".into(),
            }),
        );
        let mounter = Mounter::with_proc_mounts_path(exec.clone(), f.path().to_path_buf());
        // First mount call fails every time with the canned response above;
        // exercise only the mkfs half of do_mount directly since the fake
        // always returns the same canned error for "mount -t ext4 ...".
        let result = mounter
            .do_mount(Path::new("/dev/sdb1"), Path::new("/fuxi/data/cinder/v1"), "ext4")
            .await;
        assert!(result.is_err());
        let calls = exec.calls();
        assert_eq!(calls.len(), 3, "mount, mkfs, mount again");
        assert_eq!(calls[1].0[0], "mkfs");
    }

    #[tokio::test]
    async fn mkfs_failure_maps_to_domain_error() {
        let f = write_proc_mounts("");
        let exec = Arc::new(FakeExecutor::new());
        exec.on("mkfs", Ok(CommandOutput::default()));
        let mounter = Mounter::with_proc_mounts_path(exec, f.path().to_path_buf());
        mounter.make_filesystem(Path::new("/dev/sdb1"), "ext4").await.unwrap();
    }
}
