//! Manila-backed share provider. Mirrors [`CinderProvider`](super::cinder)
//! with a few differences noted in the component design: creation accepts
//! `share_proto`, delete defers to the cloud when other hosts still hold
//! access, and mounting is entirely the connector's responsibility.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cloud::block::VolumeFilter;
use crate::cloud::identity::IdentitySession;
use crate::cloud::share::{CreateShareParams, ShareClient};
use crate::connector::{ConnectOpts, Connector};
use crate::constants::{MONITOR_STATE_TIMEOUT, VOLUME_SCAN_DELAY};
use crate::error::{FuxiError, FuxiResult};
use crate::model::{AttachmentState, LogicalVolume, VOLUME_FROM_KEY};
use crate::provider::parse_bool;
use crate::state_monitor::StateMonitor;

use super::{Provider, VolumeInfo};

pub struct ManilaProvider {
    share: Arc<dyn ShareClient>,
    connector: Arc<dyn Connector>,
    identity: Arc<dyn IdentitySession>,
    service_tag: String,
    default_size_gib: u64,
    default_share_proto: String,
}

impl ManilaProvider {
    pub fn new(
        share: Arc<dyn ShareClient>,
        connector: Arc<dyn Connector>,
        identity: Arc<dyn IdentitySession>,
        service_tag: String,
        default_size_gib: u64,
        default_share_proto: String,
    ) -> Self {
        Self {
            share,
            connector,
            identity,
            service_tag,
            default_size_gib,
            default_share_proto,
        }
    }

    /// Replays `op` exactly once, after rebuilding the identity session, if
    /// the first attempt reports expired/rejected credentials.
    async fn with_unauthorized_retry<T, F, Fut>(&self, mut op: F) -> FuxiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FuxiResult<T>>,
    {
        match op().await {
            Err(FuxiError::Unauthorized(reason)) => {
                log::warn!("manila operation unauthorized ({}), rebuilding session and retrying once", reason);
                self.identity.reauthenticate().await?;
                op().await
            }
            other => other,
        }
    }

    async fn docker_share(&self, name: &str) -> FuxiResult<LogicalVolume> {
        let mut metadata = BTreeMap::new();
        metadata.insert(VOLUME_FROM_KEY.to_string(), self.service_tag.clone());
        let filter = VolumeFilter {
            name: Some(name.to_string()),
            metadata,
        };
        let mut matches = self.share.list_shares(&filter).await?;
        if matches.len() > 1 {
            return Err(FuxiError::TooManyResources {
                name: name.to_string(),
                count: matches.len(),
            });
        }
        matches.pop().ok_or_else(|| FuxiError::NotFound(name.to_string()))
    }

    async fn state_for(&self, share: &LogicalVolume) -> FuxiResult<AttachmentState> {
        if self.connector.check_access_allowed(share).await? {
            Ok(AttachmentState::AttachToThis)
        } else {
            Ok(AttachmentState::NotAttached)
        }
    }

    async fn adopt(&self, name: &str, share_id: &str) -> FuxiResult<()> {
        let mut share = self.share.get_share(share_id).await?;
        if share.status != "available" {
            return Err(FuxiError::NotMatchedState {
                name: name.to_string(),
                reason: format!("share {} is in status {}, cannot adopt", share_id, share.status),
            });
        }
        if share.name != name {
            return Err(FuxiError::InvalidInput(format!(
                "volume_id {} has name {} which does not match requested name {}",
                share_id, share.name, name
            )));
        }
        let mut metadata = share.metadata.clone();
        metadata.insert(VOLUME_FROM_KEY.to_string(), self.service_tag.clone());
        self.share.update_all_metadata(share_id, &metadata).await?;
        share.metadata = metadata;
        self.connector.connect(&share, &ConnectOpts::default()).await?;
        Ok(())
    }

    async fn create_new(&self, name: &str, opts: &BTreeMap<String, String>) -> FuxiResult<()> {
        let share_proto = opts.get("share_proto").cloned().unwrap_or_else(|| self.default_share_proto.clone());
        let size_gib = opts
            .get("size")
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.default_size_gib);

        let mut metadata = BTreeMap::new();
        metadata.insert(VOLUME_FROM_KEY.to_string(), self.service_tag.clone());

        let params = CreateShareParams {
            name: name.to_string(),
            share_proto,
            size_gib,
            snapshot_id: opts.get("snapshot_id").cloned(),
            description: opts.get("description").cloned(),
            share_network: opts.get("share_network").cloned(),
            share_type: opts.get("share_type").cloned(),
            is_public: opts.get("is_public").map(|v| parse_bool(v)),
            availability_zone: opts.get("availability_zone").cloned(),
            consistency_group_id: opts.get("consistency_group_id").cloned(),
            metadata,
        };

        let created = self.share.create_share(&params).await?;
        let monitor = StateMonitor::new("available", vec!["creating".to_string()], MONITOR_STATE_TIMEOUT)
            .with_poll_delay(VOLUME_SCAN_DELAY);
        let share = monitor.wait_for(|| self.share.get_share(&created.id)).await?;

        self.connector.connect(&share, &ConnectOpts::default()).await?;
        Ok(())
    }
}

#[async_trait]
impl Provider for ManilaProvider {
    fn name(&self) -> &str {
        "manila"
    }

    async fn create(&self, name: &str, opts: &BTreeMap<String, String>) -> FuxiResult<()> {
        self.with_unauthorized_retry(|| async {
            match self.docker_share(name).await {
                Ok(share) => match self.state_for(&share).await? {
                    AttachmentState::AttachToThis => Ok(()),
                    _ => {
                        self.connector.connect(&share, &ConnectOpts::default()).await?;
                        Ok(())
                    }
                },
                Err(e) if e.is_not_found() => {
                    if let Some(share_id) = opts.get("volume_id") {
                        self.adopt(name, share_id).await
                    } else {
                        self.create_new(name, opts).await
                    }
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn delete(&self, name: &str) -> FuxiResult<bool> {
        self.with_unauthorized_retry(|| async {
            let share = match self.docker_share(name).await {
                Ok(s) => s,
                Err(e) if e.is_not_found() => return Ok(false),
                Err(e) => return Err(e),
            };

            if self.state_for(&share).await? == AttachmentState::AttachToThis {
                self.connector.disconnect(&share, &ConnectOpts::default()).await?;
            }

            let remaining_access = self.share.access_list(&share.id).await?;
            if remaining_access.is_empty() {
                self.share.delete_share(&share.id).await?;
            } else {
                log::info!(
                    "share {} still has {} access rule(s) from other hosts, leaving it in the backend",
                    name,
                    remaining_access.len()
                );
            }
            Ok(true)
        })
        .await
    }

    async fn mount(&self, name: &str) -> FuxiResult<PathBuf> {
        self.with_unauthorized_retry(|| async {
            let share = self.docker_share(name).await?;
            self.connector.connect(&share, &ConnectOpts::default()).await?;
            self.connector.mountpoint(&share).await
        })
        .await
    }

    async fn unmount(&self, _name: &str) -> FuxiResult<()> {
        Ok(())
    }

    async fn list(&self) -> FuxiResult<Vec<VolumeInfo>> {
        self.with_unauthorized_retry(|| async {
            let mut metadata = BTreeMap::new();
            metadata.insert(VOLUME_FROM_KEY.to_string(), self.service_tag.clone());
            let shares = self
                .share
                .list_shares(&VolumeFilter { name: None, metadata })
                .await?;

            let mut out = Vec::with_capacity(shares.len());
            for share in &shares {
                let mountpoint = self.connector.mountpoint(share).await.unwrap_or_default();
                out.push(VolumeInfo {
                    name: share.name.clone(),
                    mountpoint,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn show(&self, name: &str) -> FuxiResult<VolumeInfo> {
        self.with_unauthorized_retry(|| async {
            let share = self.docker_share(name).await?;
            let mountpoint = self.connector.mountpoint(&share).await.unwrap_or_default();
            Ok(VolumeInfo {
                name: name.to_string(),
                mountpoint,
            })
        })
        .await
    }

    async fn check_exist(&self, name: &str) -> FuxiResult<bool> {
        self.with_unauthorized_retry(|| async {
            match self.docker_share(name).await {
                Ok(_) => Ok(true),
                Err(e) if e.is_not_found() => Ok(false),
                Err(e) => Err(e),
            }
        })
        .await
    }
}
