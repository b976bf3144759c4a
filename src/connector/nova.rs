//! Attaches a Cinder volume to this host through the Nova compute API. Only
//! correct when this host is itself an OpenStack instance: device discovery
//! works by diffing `/sys/block` before and after the compute-side attach.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::cloud::block::BlockClient;
use crate::cloud::compute::ComputeClient;
use crate::constants::{DEVICE_SCAN_DELAY, DEVICE_SCAN_TIMEOUT, MONITOR_STATE_TIMEOUT, VOLUME_SCAN_DELAY};
use crate::error::{FuxiError, FuxiResult};
use crate::executor::Executor;
use crate::model::{DeviceRecord, LogicalVolume};
use crate::mount::BlockDeviceScanner;
use crate::state_monitor::StateMonitor;

use super::{stable_link_path, ConnectOpts, ConnectResult, Connector};

/// Size match tolerance in GiB: sysfs reports the device's raw sector count,
/// which can be a fraction of a GiB off from the volume's declared integer
/// size depending on backend rounding.
const SIZE_MATCH_TOLERANCE_GIB: f64 = 0.5;

pub struct NovaAttachConnector {
    block: Arc<dyn BlockClient>,
    compute: Arc<dyn ComputeClient>,
    executor: Arc<dyn Executor>,
    scanner: BlockDeviceScanner,
    server_id: String,
    // Serializes the whole connect sequence: concurrent attaches race on
    // the /sys/block diff in step 3.
    attach_lock: Mutex<()>,
}

impl NovaAttachConnector {
    pub fn new(
        block: Arc<dyn BlockClient>,
        compute: Arc<dyn ComputeClient>,
        executor: Arc<dyn Executor>,
        server_id: String,
    ) -> Self {
        Self {
            block,
            compute,
            executor,
            scanner: BlockDeviceScanner::new(),
            server_id,
            attach_lock: Mutex::new(()),
        }
    }

    async fn wait_for_new_device(&self, before: &crate::model::DeviceSet) -> FuxiResult<PathBuf> {
        let start = Instant::now();
        loop {
            let after = self.scanner.scan()?;
            let mut new_devices: Vec<&PathBuf> = after.difference(before).collect();
            new_devices.sort();
            if let Some(sys_path) = new_devices.first() {
                return Ok((*sys_path).clone());
            }
            if start.elapsed() > DEVICE_SCAN_TIMEOUT {
                return Err(FuxiError::DeviceNotFound);
            }
            tokio::time::sleep(DEVICE_SCAN_DELAY).await;
        }
    }
}

#[async_trait]
impl Connector for NovaAttachConnector {
    async fn connect(&self, volume: &LogicalVolume, _opts: &ConnectOpts) -> FuxiResult<ConnectResult> {
        let _guard = self.attach_lock.lock().await;

        let before = self.scanner.scan()?;
        self.compute.create_server_volume(&self.server_id, &volume.id).await?;

        let monitor = StateMonitor::new(
            "in-use",
            vec!["available".to_string(), "attaching".to_string()],
            MONITOR_STATE_TIMEOUT,
        )
        .with_poll_delay(VOLUME_SCAN_DELAY);
        monitor.wait_for(|| self.block.get_volume(&volume.id)).await?;

        let sys_path = self.wait_for_new_device(&before).await?;
        let record = DeviceRecord::from_sys_path(sys_path);

        let size = self.scanner.size_gib(&record.sys_path)?;
        if (size - volume.size_gib as f64).abs() > SIZE_MATCH_TOLERANCE_GIB {
            return Err(FuxiError::DeviceNotFound);
        }

        let link = stable_link_path(&volume.id);
        let dev_str = record.dev_path.to_string_lossy();
        let link_str = link.to_string_lossy();
        self.executor
            .run(&["ln", "-sfn", &dev_str, &link_str], true)
            .await?;

        Ok(ConnectResult { path: link })
    }

    async fn disconnect(&self, volume: &LogicalVolume, _opts: &ConnectOpts) -> FuxiResult<()> {
        let _guard = self.attach_lock.lock().await;

        let link = stable_link_path(&volume.id);
        let link_str = link.to_string_lossy();
        if let Err(e) = self.executor.run(&["rm", "-f", &link_str], true).await {
            log::warn!("failed to remove stale stable link {}: {}", link.display(), e);
        }

        self.compute.delete_server_volume(&self.server_id, &volume.id).await?;

        let monitor = StateMonitor::new(
            "available",
            vec!["in-use".to_string(), "detaching".to_string()],
            MONITOR_STATE_TIMEOUT,
        )
        .with_poll_delay(VOLUME_SCAN_DELAY);
        monitor.wait_for(|| self.block.get_volume(&volume.id)).await?;
        Ok(())
    }

    async fn device_path(&self, volume: &LogicalVolume) -> FuxiResult<PathBuf> {
        let link = stable_link_path(&volume.id);
        if std::fs::symlink_metadata(&link).is_err() {
            return Err(FuxiError::DeviceNotFound);
        }
        Ok(link)
    }
}
