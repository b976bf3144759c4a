//! Attaches a Cinder volume through os-brick style local initiators
//! (iSCSI, RBD, ...). Works on any Linux host, not just OpenStack
//! instances, because discovery goes through Cinder's
//! `initialize_connection` rather than a compute-side attach.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cloud::block::{BlockClient, ConnectorProperties};
use crate::error::{FuxiError, FuxiResult};
use crate::executor::Executor;
use crate::model::LogicalVolume;

use super::initiator;
use super::{stable_link_path, ConnectOpts, ConnectResult, Connector};

pub struct OsBrickConnector {
    block: Arc<dyn BlockClient>,
    executor: Arc<dyn Executor>,
    host_name: String,
    connector_properties: ConnectorProperties,
}

impl OsBrickConnector {
    pub fn new(
        block: Arc<dyn BlockClient>,
        executor: Arc<dyn Executor>,
        host_name: String,
        connector_properties: ConnectorProperties,
    ) -> Self {
        Self {
            block,
            executor,
            host_name,
            connector_properties,
        }
    }

    async fn do_connect(&self, volume: &LogicalVolume, opts: &ConnectOpts) -> FuxiResult<ConnectResult> {
        let connection = self
            .block
            .initialize_connection(&volume.id, &self.connector_properties)
            .await?;
        let local = initiator::for_driver_volume_type(&connection.driver_volume_type, self.executor.clone())?;
        let path = match local.connect_volume(&connection.data).await {
            Ok(path) => path,
            Err(e) => return Err(e),
        };

        let realpath = match std::fs::canonicalize(&path) {
            Ok(p) => p,
            Err(e) => {
                let _ = local.disconnect_volume(&connection.data).await;
                return Err(e.into());
            }
        };

        let link = stable_link_path(&volume.id);
        let realpath_str = realpath.to_string_lossy();
        let link_str = link.to_string_lossy();
        if let Err(e) = self.executor.run(&["ln", "-sfn", &realpath_str, &link_str], true).await {
            let _ = local.disconnect_volume(&connection.data).await;
            return Err(e);
        }

        if let Err(e) = self
            .block
            .attach(&volume.id, &self.host_name, opts.mountpoint_hint.as_deref())
            .await
        {
            let _ = self.executor.run(&["rm", "-f", &link_str], true).await;
            let _ = local.disconnect_volume(&connection.data).await;
            return Err(e);
        }

        Ok(ConnectResult { path: link })
    }
}

#[async_trait]
impl Connector for OsBrickConnector {
    async fn connect(&self, volume: &LogicalVolume, opts: &ConnectOpts) -> FuxiResult<ConnectResult> {
        self.block.reserve(&volume.id).await?;
        match self.do_connect(volume, opts).await {
            Ok(result) => Ok(result),
            Err(e) => {
                log::error!("os-brick connect failed for {}, rolling back: {}", volume.id, e);
                if let Err(unreserve_err) = self.block.unreserve(&volume.id).await {
                    log::warn!("unreserve failed during rollback for {}: {}", volume.id, unreserve_err);
                }
                Err(e)
            }
        }
    }

    async fn disconnect(&self, volume: &LogicalVolume, _opts: &ConnectOpts) -> FuxiResult<()> {
        let link = stable_link_path(&volume.id);
        let link_str = link.to_string_lossy();
        if let Err(e) = self.executor.run(&["rm", "-f", &link_str], true).await {
            log::warn!("failed to remove stale stable link {}: {}", link.display(), e);
        }

        let connection = self
            .block
            .initialize_connection(&volume.id, &self.connector_properties)
            .await?;
        let local = initiator::for_driver_volume_type(&connection.driver_volume_type, self.executor.clone())?;
        local.disconnect_volume(&connection.data).await?;

        let attachment_id = volume
            .attachments
            .iter()
            .find(|a| a.host_id == self.host_name)
            .and_then(|a| a.attachment_id.as_deref())
            .ok_or_else(|| FuxiError::NotMatchedState {
                name: volume.name.clone(),
                reason: format!("no attachment recorded for host {}", self.host_name),
            })?;
        self.block.detach(&volume.id, attachment_id).await
    }

    async fn device_path(&self, volume: &LogicalVolume) -> FuxiResult<PathBuf> {
        let link = stable_link_path(&volume.id);
        if std::fs::symlink_metadata(&link).is_err() {
            return Err(FuxiError::DeviceNotFound);
        }
        Ok(link)
    }
}
