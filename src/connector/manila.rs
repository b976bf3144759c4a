//! Grants/revokes host access to a Manila share and mounts it. Unlike the
//! Cinder connectors there is no block device: the protocol-specific local
//! initiator mounts the network share directly.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::cloud::share::{AccessRule, ShareClient};
use crate::constants::{ACCESS_DENY_TIMEOUT, MONITOR_STATE_TIMEOUT, SCAN_INTERVAL};
use crate::error::{FuxiError, FuxiResult};
use crate::model::LogicalVolume;
use crate::mount::Mounter;
use crate::state_monitor::StateMonitor;

use super::initiator;
use super::{ConnectOpts, ConnectResult, Connector};

#[derive(Debug, Clone)]
pub struct ManilaConnectorConfig {
    /// protocol (upper-cased) -> access_type, e.g. `NFS -> ip`.
    pub proto_access_type_map: BTreeMap<String, String>,
    pub my_ip: String,
    pub access_to_for_cert: Option<String>,
}

impl Default for ManilaConnectorConfig {
    fn default() -> Self {
        let mut proto_access_type_map = BTreeMap::new();
        proto_access_type_map.insert("NFS".to_string(), "ip".to_string());
        proto_access_type_map.insert("GLUSTERFS".to_string(), "cert".to_string());
        Self {
            proto_access_type_map,
            my_ip: String::new(),
            access_to_for_cert: None,
        }
    }
}

pub struct ManilaConnector {
    share: Arc<dyn ShareClient>,
    mounter: Arc<Mounter>,
    volume_dir: PathBuf,
    config: ManilaConnectorConfig,
}

impl ManilaConnector {
    pub fn new(share: Arc<dyn ShareClient>, mounter: Arc<Mounter>, volume_dir: PathBuf, config: ManilaConnectorConfig) -> Self {
        Self {
            share,
            mounter,
            volume_dir,
            config,
        }
    }

    fn access_type_and_to(&self, protocol: &str) -> FuxiResult<(String, String)> {
        let protocol = protocol.to_uppercase();
        let access_type = self
            .config
            .proto_access_type_map
            .get(&protocol)
            .ok_or_else(|| FuxiError::InvalidProtocol(protocol.clone()))?;

        let access_to = match access_type.as_str() {
            "ip" => {
                if self.config.my_ip.is_empty() {
                    return Err(FuxiError::InvalidAccessTo);
                }
                self.config.my_ip.clone()
            }
            "cert" => self.config.access_to_for_cert.clone().ok_or(FuxiError::InvalidAccessTo)?,
            other => return Err(FuxiError::InvalidAccessType(other.to_string())),
        };
        Ok((access_type.clone(), access_to))
    }

    fn mountpoint_for(&self, name: &str) -> PathBuf {
        self.volume_dir.join("manila").join(name)
    }

    async fn matching_rule(&self, share_id: &str, access_type: &str, access_to: &str) -> FuxiResult<Option<AccessRule>> {
        let rules = self.share.access_list(share_id).await?;
        Ok(rules
            .into_iter()
            .find(|r| r.access_type == access_type && r.access_to == access_to))
    }
}

#[async_trait]
impl Connector for ManilaConnector {
    async fn connect(&self, volume: &LogicalVolume, _opts: &ConnectOpts) -> FuxiResult<ConnectResult> {
        let protocol = volume
            .protocol
            .as_deref()
            .ok_or_else(|| FuxiError::InvalidProtocol("<none>".to_string()))?;
        let (access_type, access_to) = self.access_type_and_to(protocol)?;

        if !self.check_access_allowed(volume).await? {
            self.share.allow(&volume.id, &access_type, &access_to, "rw").await?;

            let monitor = StateMonitor::new("active", vec!["new".to_string()], MONITOR_STATE_TIMEOUT);
            monitor
                .wait_for(|| async {
                    let rules = self.share.access_list(&volume.id).await?;
                    rules
                        .into_iter()
                        .find(|r| r.access_type == access_type && r.access_to == access_to)
                        .ok_or_else(|| {
                            FuxiError::NotMatchedState {
                                name: volume.name.clone(),
                                reason: "access rule disappeared while waiting for it to activate".to_string(),
                            }
                        })
                })
                .await?;
        }

        let local = initiator::for_share_protocol(protocol, self.mounter.clone(), self.volume_dir.clone())?;
        let export = volume
            .export_locations
            .first()
            .ok_or_else(|| FuxiError::InvalidInput(format!("share {} has no export location", volume.name)))?;
        let path = local
            .connect_volume(&serde_json::json!({"export": export, "name": volume.name}))
            .await?;
        Ok(ConnectResult { path })
    }

    async fn disconnect(&self, volume: &LogicalVolume, _opts: &ConnectOpts) -> FuxiResult<()> {
        let mountpoint = self.mountpoint_for(&volume.name);
        self.mounter.unmount(&mountpoint).await?;

        let protocol = volume
            .protocol
            .as_deref()
            .ok_or_else(|| FuxiError::InvalidProtocol("<none>".to_string()))?;
        let (access_type, access_to) = self.access_type_and_to(protocol)?;

        let rule = self
            .matching_rule(&volume.id, &access_type, &access_to)
            .await?
            .ok_or_else(|| FuxiError::NotFound(format!("access rule for {} on share {}", access_to, volume.name)))?;
        self.share.deny(&volume.id, &rule.id).await?;

        let start = Instant::now();
        loop {
            let rules = self.share.access_list(&volume.id).await?;
            match rules.into_iter().find(|r| r.id == rule.id) {
                None => return Ok(()),
                Some(r) if r.state == "error" || r.state == "error_deleting" => {
                    return Err(FuxiError::NotMatchedState {
                        name: volume.name.clone(),
                        reason: format!("access rule deny entered state {}", r.state),
                    });
                }
                Some(_) => {}
            }
            if start.elapsed() > ACCESS_DENY_TIMEOUT {
                return Err(FuxiError::Timeout(ACCESS_DENY_TIMEOUT));
            }
            tokio::time::sleep(SCAN_INTERVAL).await;
        }
    }

    async fn device_path(&self, volume: &LogicalVolume) -> FuxiResult<PathBuf> {
        self.mountpoint(volume).await
    }

    async fn check_access_allowed(&self, volume: &LogicalVolume) -> FuxiResult<bool> {
        let protocol = volume
            .protocol
            .as_deref()
            .ok_or_else(|| FuxiError::InvalidProtocol("<none>".to_string()))?;
        let (access_type, access_to) = self.access_type_and_to(protocol)?;
        let rules = self.share.access_list(&volume.id).await?;
        Ok(rules
            .iter()
            .any(|r| r.access_type == access_type && r.access_to == access_to && r.state == "active"))
    }

    async fn mountpoint(&self, volume: &LogicalVolume) -> FuxiResult<PathBuf> {
        if !self.check_access_allowed(volume).await? {
            return Ok(PathBuf::new());
        }
        Ok(self.mountpoint_for(&volume.name))
    }
}
