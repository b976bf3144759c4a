//! Cinder-backed block volume provider. See the Create/Delete state tables
//! in the component design notes for the state-to-action mapping this
//! module implements.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::cloud::block::{BlockClient, CreateVolumeParams, VolumeFilter};
use crate::connector::{ConnectOpts, Connector};
use crate::constants::{DESTROY_VOLUME_TIMEOUT, MONITOR_STATE_TIMEOUT, VOLUME_SCAN_DELAY};
use crate::error::{FuxiError, FuxiResult};
use crate::model::{AttachmentState, LogicalVolume, FSTYPE_KEY, VOLUME_FROM_KEY};
use crate::mount::Mounter;
use crate::state_monitor::StateMonitor;

use super::{parse_bool, Provider, VolumeInfo};

pub struct CinderProvider {
    block: Arc<dyn BlockClient>,
    connector: Arc<dyn Connector>,
    mounter: Arc<Mounter>,
    volume_dir: PathBuf,
    service_tag: String,
    host_id: String,
    default_size_gib: u64,
    default_fstype: String,
}

impl CinderProvider {
    pub fn new(
        block: Arc<dyn BlockClient>,
        connector: Arc<dyn Connector>,
        mounter: Arc<Mounter>,
        volume_dir: PathBuf,
        service_tag: String,
        host_id: String,
        default_size_gib: u64,
        default_fstype: String,
    ) -> Self {
        Self {
            block,
            connector,
            mounter,
            volume_dir,
            service_tag,
            host_id,
            default_size_gib,
            default_fstype,
        }
    }

    fn mountpoint_for(&self, name: &str) -> PathBuf {
        self.volume_dir.join("cinder").join(name)
    }

    async fn docker_volume(&self, name: &str) -> FuxiResult<(Option<LogicalVolume>, AttachmentState)> {
        let mut metadata = BTreeMap::new();
        metadata.insert(VOLUME_FROM_KEY.to_string(), self.service_tag.clone());
        let filter = VolumeFilter {
            name: Some(name.to_string()),
            metadata,
        };
        let mut matches = self.block.list_volumes(&filter).await?;
        if matches.len() > 1 {
            return Err(FuxiError::TooManyResources {
                name: name.to_string(),
                count: matches.len(),
            });
        }
        let volume = matches.pop();
        let state = AttachmentState::classify(volume.as_ref(), &self.host_id);
        Ok((volume, state))
    }

    async fn adopt(&self, name: &str, volume_id: &str, opts: &BTreeMap<String, String>) -> FuxiResult<()> {
        let mut volume = self.block.get_volume(volume_id).await?;

        if volume.status != "available" && volume.status != "in-use" {
            return Err(FuxiError::NotMatchedState {
                name: name.to_string(),
                reason: format!("volume {} is in status {}, cannot adopt", volume_id, volume.status),
            });
        }
        if volume.status == "in-use" && !volume.attached_to(&self.host_id) {
            return Err(FuxiError::NotMatchedState {
                name: name.to_string(),
                reason: "volume is in-use on another host".to_string(),
            });
        }
        if volume.name != name {
            return Err(FuxiError::InvalidInput(format!(
                "volume_id {} has name {} which does not match requested name {}",
                volume_id, volume.name, name
            )));
        }
        if let Some(requested_fstype) = opts.get(FSTYPE_KEY) {
            if let Some(existing) = volume.fstype() {
                if existing != requested_fstype {
                    return Err(FuxiError::InvalidInput(format!(
                        "fstype {} does not match volume's existing fstype {}",
                        requested_fstype, existing
                    )));
                }
            }
        }

        let mut metadata = volume.metadata.clone();
        metadata.insert(VOLUME_FROM_KEY.to_string(), self.service_tag.clone());
        if let Some(fstype) = opts.get(FSTYPE_KEY) {
            metadata.insert(FSTYPE_KEY.to_string(), fstype.clone());
        }
        self.block.set_metadata(volume_id, &metadata).await?;
        volume.metadata = metadata;

        self.connector.connect(&volume, &ConnectOpts::default()).await?;
        Ok(())
    }

    async fn create_new(&self, name: &str, opts: &BTreeMap<String, String>) -> FuxiResult<()> {
        let size_gib = opts
            .get("size")
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.default_size_gib);
        let fstype = opts.get(FSTYPE_KEY).cloned().unwrap_or_else(|| self.default_fstype.clone());

        let mut metadata = BTreeMap::new();
        metadata.insert(VOLUME_FROM_KEY.to_string(), self.service_tag.clone());
        metadata.insert(FSTYPE_KEY.to_string(), fstype);

        let params = CreateVolumeParams {
            name: name.to_string(),
            size_gib,
            consistencygroup_id: opts.get("consistencygroup_id").cloned(),
            snapshot_id: opts.get("snapshot_id").cloned(),
            source_volid: opts.get("source_volid").cloned(),
            description: opts.get("description").cloned(),
            volume_type: opts.get("volume_type").cloned(),
            user_id: opts.get("user_id").cloned(),
            project_id: opts.get("project_id").cloned(),
            availability_zone: opts.get("availability_zone").cloned(),
            scheduler_hints: opts
                .get("scheduler_hints")
                .map(|v| serde_json::Value::String(v.clone())),
            source_replica: opts.get("source_replica").cloned(),
            multiattach: opts.get("multiattach").map(|v| parse_bool(v)).unwrap_or(false),
            metadata,
        };

        let created = self.block.create_volume(&params).await?;
        let monitor = StateMonitor::new("available", vec!["creating".to_string()], MONITOR_STATE_TIMEOUT)
            .with_poll_delay(VOLUME_SCAN_DELAY);
        let volume = monitor.wait_for(|| self.block.get_volume(&created.id)).await?;

        self.connector.connect(&volume, &ConnectOpts::default()).await?;
        Ok(())
    }

    async fn delete_volume_until_gone(&self, id: &str) -> FuxiResult<()> {
        self.block.delete_volume(id).await?;
        let start = Instant::now();
        loop {
            match self.block.get_volume(id).await {
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
                Ok(_) => {}
            }
            if start.elapsed() > DESTROY_VOLUME_TIMEOUT {
                return Err(FuxiError::Timeout(DESTROY_VOLUME_TIMEOUT));
            }
            tokio::time::sleep(VOLUME_SCAN_DELAY).await;
        }
    }

    /// Mountpoint if the device backing `volume` is currently mounted at
    /// this provider's canonical path for `name`, empty path otherwise.
    async fn current_mountpoint(&self, volume: &LogicalVolume, name: &str) -> FuxiResult<PathBuf> {
        let canonical = self.mountpoint_for(name);
        let link = match self.connector.device_path(volume).await {
            Ok(link) => link,
            Err(_) => return Ok(PathBuf::new()),
        };
        let realpath = std::fs::canonicalize(&link).unwrap_or(link);
        let mounted_at = self.mounter.mountpoints_for_device(&realpath)?;
        if mounted_at.contains(&canonical) {
            Ok(canonical)
        } else {
            Ok(PathBuf::new())
        }
    }
}

#[async_trait]
impl Provider for CinderProvider {
    fn name(&self) -> &str {
        "cinder"
    }

    async fn create(&self, name: &str, opts: &BTreeMap<String, String>) -> FuxiResult<()> {
        let (volume, state) = self.docker_volume(name).await?;
        match state {
            AttachmentState::AttachToThis => Ok(()),
            AttachmentState::NotAttached => {
                let volume = volume.expect("NotAttached implies a volume was found");
                self.connector.connect(&volume, &ConnectOpts::default()).await?;
                Ok(())
            }
            AttachmentState::AttachToOther => {
                let volume = volume.expect("AttachToOther implies a volume was found");
                if !volume.multiattach {
                    return Err(FuxiError::NotMatchedState {
                        name: name.to_string(),
                        reason: "volume is already attached to another host".to_string(),
                    });
                }
                if let Some(requested) = opts.get(FSTYPE_KEY) {
                    if volume.fstype().is_some_and(|existing| existing != requested) {
                        return Err(FuxiError::NotMatchedState {
                            name: name.to_string(),
                            reason: "fstype does not match existing multiattach volume".to_string(),
                        });
                    }
                }
                if !opts.get("multiattach").map(|v| parse_bool(v)).unwrap_or(false) {
                    return Err(FuxiError::NotMatchedState {
                        name: name.to_string(),
                        reason: "volume is multiattach but request did not ask for multiattach".to_string(),
                    });
                }
                self.connector.connect(&volume, &ConnectOpts::default()).await?;
                Ok(())
            }
            AttachmentState::Unknown => {
                if let Some(volume_id) = opts.get("volume_id") {
                    self.adopt(name, volume_id, opts).await
                } else {
                    self.create_new(name, opts).await
                }
            }
        }
    }

    async fn delete(&self, name: &str) -> FuxiResult<bool> {
        let (volume, state) = self.docker_volume(name).await?;
        match state {
            AttachmentState::Unknown => Ok(false),
            AttachmentState::AttachToOther => {
                log::info!("volume {} still attached to another host, skipping delete", name);
                Ok(true)
            }
            AttachmentState::NotAttached => {
                let volume = volume.expect("NotAttached implies a volume was found");
                self.delete_volume_until_gone(&volume.id).await?;
                Ok(true)
            }
            AttachmentState::AttachToThis => {
                let volume = volume.expect("AttachToThis implies a volume was found");
                let mountpoint = self.mountpoint_for(name);

                if let Ok(link) = self.connector.device_path(&volume).await {
                    let realpath = std::fs::canonicalize(&link).unwrap_or(link);
                    let mounted_at = self.mounter.mountpoints_for_device(&realpath)?;
                    if mounted_at.contains(&mountpoint) {
                        self.mounter.unmount(&mountpoint).await?;
                        let _ = std::fs::remove_dir(&mountpoint);
                    }
                    let remaining = self.mounter.mountpoints_for_device(&realpath)?;
                    if !remaining.is_empty() {
                        return Ok(true);
                    }
                }

                self.connector.disconnect(&volume, &ConnectOpts::default()).await?;

                let still_attached = matches!(
                    self.block.get_volume(&volume.id).await,
                    Ok(v) if !v.attachments.is_empty()
                );
                if still_attached {
                    return Ok(true);
                }
                self.delete_volume_until_gone(&volume.id).await?;
                Ok(true)
            }
        }
    }

    async fn mount(&self, name: &str) -> FuxiResult<PathBuf> {
        let (volume, state) = self.docker_volume(name).await?;
        let volume = match state {
            AttachmentState::AttachToThis => volume.expect("AttachToThis implies a volume was found"),
            AttachmentState::NotAttached => {
                let volume = volume.expect("NotAttached implies a volume was found");
                self.connector.connect(&volume, &ConnectOpts::default()).await?;
                volume
            }
            AttachmentState::AttachToOther => {
                let volume = volume.expect("AttachToOther implies a volume was found");
                if !volume.multiattach {
                    return Err(FuxiError::NotMatchedState {
                        name: name.to_string(),
                        reason: "attached to another host".to_string(),
                    });
                }
                self.connector.connect(&volume, &ConnectOpts::default()).await?;
                volume
            }
            AttachmentState::Unknown => return Err(FuxiError::NotFound(name.to_string())),
        };

        let link = match self.connector.device_path(&volume).await {
            Ok(path) => path,
            Err(_) => {
                let _ = self.connector.disconnect(&volume, &ConnectOpts::default()).await;
                self.connector.connect(&volume, &ConnectOpts::default()).await?.path
            }
        };
        let realpath = std::fs::canonicalize(&link)?;

        let mountpoint = self.mountpoint_for(name);
        std::fs::create_dir_all(&mountpoint)?;

        let fstype = volume.fstype().map(str::to_string).unwrap_or_else(|| self.default_fstype.clone());
        self.mounter.do_mount(&realpath, &mountpoint, &fstype).await?;
        Ok(mountpoint)
    }

    async fn unmount(&self, _name: &str) -> FuxiResult<()> {
        Ok(())
    }

    async fn list(&self) -> FuxiResult<Vec<VolumeInfo>> {
        let mut metadata = BTreeMap::new();
        metadata.insert(VOLUME_FROM_KEY.to_string(), self.service_tag.clone());
        let volumes = self.block.list_volumes(&VolumeFilter { name: None, metadata }).await?;

        let mut out = Vec::with_capacity(volumes.len());
        for volume in &volumes {
            let mountpoint = self.current_mountpoint(volume, &volume.name).await?;
            out.push(VolumeInfo {
                name: volume.name.clone(),
                mountpoint,
            });
        }
        Ok(out)
    }

    async fn show(&self, name: &str) -> FuxiResult<VolumeInfo> {
        let (volume, state) = self.docker_volume(name).await?;
        match state {
            AttachmentState::Unknown => Err(FuxiError::NotFound(name.to_string())),
            AttachmentState::AttachToThis => {
                let volume = volume.expect("AttachToThis implies a volume was found");
                let mountpoint = self.current_mountpoint(&volume, name).await?;
                Ok(VolumeInfo {
                    name: name.to_string(),
                    mountpoint,
                })
            }
            AttachmentState::NotAttached | AttachmentState::AttachToOther => Ok(VolumeInfo {
                name: name.to_string(),
                mountpoint: PathBuf::new(),
            }),
        }
    }

    async fn check_exist(&self, name: &str) -> FuxiResult<bool> {
        let (_, state) = self.docker_volume(name).await?;
        Ok(state != AttachmentState::Unknown)
    }
}
