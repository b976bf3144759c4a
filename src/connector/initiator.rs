//! Local-host half of an attach: given the connection data a cloud API
//! handed back, wire up the transport on this machine and hand back a
//! device or mount path. Selected by `driver_volume_type` / share protocol
//! string, never by downcasting.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{FuxiError, FuxiResult};
use crate::executor::Executor;
use crate::mount::Mounter;

#[async_trait]
pub trait LocalInitiator: Send + Sync {
    async fn connect_volume(&self, data: &Value) -> FuxiResult<PathBuf>;
    async fn disconnect_volume(&self, data: &Value) -> FuxiResult<()>;
}

fn require_str<'a>(data: &'a Value, key: &str) -> FuxiResult<&'a str> {
    data.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| FuxiError::InvalidInput(format!("connection data missing {}", key)))
}

/// `driver_volume_type == "iscsi"`: discovery, login, rescan; the resulting
/// device is the kernel's stable `/dev/disk/by-path/...` node.
pub struct IscsiInitiator {
    executor: Arc<dyn Executor>,
}

impl IscsiInitiator {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl LocalInitiator for IscsiInitiator {
    async fn connect_volume(&self, data: &Value) -> FuxiResult<PathBuf> {
        let portal = require_str(data, "target_portal")?;
        let iqn = require_str(data, "target_iqn")?;
        let lun = data.get("target_lun").and_then(Value::as_i64).unwrap_or(0);

        self.executor
            .run(&["iscsiadm", "-m", "discovery", "-t", "sendtargets", "-p", portal], true)
            .await?;
        self.executor
            .run(&["iscsiadm", "-m", "node", "-T", iqn, "-p", portal, "--login"], true)
            .await?;
        self.executor.run(&["udevadm", "settle"], true).await?;

        Ok(PathBuf::from(format!(
            "/dev/disk/by-path/ip-{}-iscsi-{}-lun-{}",
            portal, iqn, lun
        )))
    }

    async fn disconnect_volume(&self, data: &Value) -> FuxiResult<()> {
        let portal = require_str(data, "target_portal")?;
        let iqn = require_str(data, "target_iqn")?;
        self.executor
            .run(&["iscsiadm", "-m", "node", "-T", iqn, "-p", portal, "--logout"], true)
            .await?;
        Ok(())
    }
}

/// `driver_volume_type == "rbd"`: maps the RBD image via the kernel rbd
/// client rather than librbd, matching how os-brick's RBDConnector behaves
/// when `do_local_attach` is requested.
pub struct RbdInitiator {
    executor: Arc<dyn Executor>,
}

impl RbdInitiator {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl LocalInitiator for RbdInitiator {
    async fn connect_volume(&self, data: &Value) -> FuxiResult<PathBuf> {
        let pool = require_str(data, "pool")?;
        let image = require_str(data, "image")?;
        let out = self
            .executor
            .run(&["rbd", "map", &format!("{}/{}", pool, image)], true)
            .await?;
        let device = out.stdout.trim();
        if device.is_empty() {
            return Err(FuxiError::DeviceNotFound);
        }
        Ok(PathBuf::from(device))
    }

    async fn disconnect_volume(&self, data: &Value) -> FuxiResult<()> {
        let pool = require_str(data, "pool")?;
        let image = require_str(data, "image")?;
        self.executor
            .run(&["rbd", "unmap", &format!("{}/{}", pool, image)], true)
            .await?;
        Ok(())
    }
}

pub fn for_driver_volume_type(driver_volume_type: &str, executor: Arc<dyn Executor>) -> FuxiResult<Box<dyn LocalInitiator>> {
    match driver_volume_type {
        "iscsi" => Ok(Box::new(IscsiInitiator::new(executor))),
        "rbd" => Ok(Box::new(RbdInitiator::new(executor))),
        other => Err(FuxiError::InvalidInput(format!(
            "no local initiator for driver_volume_type {}",
            other
        ))),
    }
}

/// `protocol == "NFS"`: the share export is mounted directly, no separate
/// attach step.
pub struct NfsShareInitiator {
    mounter: Arc<Mounter>,
    volume_dir: PathBuf,
}

impl NfsShareInitiator {
    pub fn new(mounter: Arc<Mounter>, volume_dir: PathBuf) -> Self {
        Self { mounter, volume_dir }
    }

    fn mountpoint_for(&self, name: &str) -> PathBuf {
        self.volume_dir.join("manila").join(name)
    }
}

#[async_trait]
impl LocalInitiator for NfsShareInitiator {
    async fn connect_volume(&self, data: &Value) -> FuxiResult<PathBuf> {
        let export = require_str(data, "export")?;
        let name = require_str(data, "name")?;
        let mountpoint = self.mountpoint_for(name);
        std::fs::create_dir_all(&mountpoint)?;
        self.mounter
            .mount(Path::new(export), &mountpoint, Some("nfs"))
            .await?;
        Ok(mountpoint)
    }

    async fn disconnect_volume(&self, data: &Value) -> FuxiResult<()> {
        let name = require_str(data, "name")?;
        self.mounter.unmount(&self.mountpoint_for(name)).await
    }
}

/// `protocol == "GLUSTERFS"`.
pub struct GlusterfsShareInitiator {
    mounter: Arc<Mounter>,
    volume_dir: PathBuf,
}

impl GlusterfsShareInitiator {
    pub fn new(mounter: Arc<Mounter>, volume_dir: PathBuf) -> Self {
        Self { mounter, volume_dir }
    }

    fn mountpoint_for(&self, name: &str) -> PathBuf {
        self.volume_dir.join("manila").join(name)
    }
}

#[async_trait]
impl LocalInitiator for GlusterfsShareInitiator {
    async fn connect_volume(&self, data: &Value) -> FuxiResult<PathBuf> {
        let export = require_str(data, "export")?;
        let name = require_str(data, "name")?;
        let mountpoint = self.mountpoint_for(name);
        std::fs::create_dir_all(&mountpoint)?;
        self.mounter
            .mount(Path::new(export), &mountpoint, Some("glusterfs"))
            .await?;
        Ok(mountpoint)
    }

    async fn disconnect_volume(&self, data: &Value) -> FuxiResult<()> {
        let name = require_str(data, "name")?;
        self.mounter.unmount(&self.mountpoint_for(name)).await
    }
}

pub fn for_share_protocol(
    protocol: &str,
    mounter: Arc<Mounter>,
    volume_dir: PathBuf,
) -> FuxiResult<Box<dyn LocalInitiator>> {
    match protocol.to_uppercase().as_str() {
        "NFS" => Ok(Box::new(NfsShareInitiator::new(mounter, volume_dir))),
        "GLUSTERFS" => Ok(Box::new(GlusterfsShareInitiator::new(mounter, volume_dir))),
        other => Err(FuxiError::InvalidProtocol(other.to_string())),
    }
}
