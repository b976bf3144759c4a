//! Capability shared by the three attach strategies: take a
//! [`LogicalVolume`] from the cloud back-end and produce a stable local
//! path Docker can mount.

pub mod initiator;
pub mod manila;
pub mod nova;
pub mod osbrick;

pub use manila::ManilaConnector;
pub use nova::NovaAttachConnector;
pub use osbrick::OsBrickConnector;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{FuxiError, FuxiResult};
use crate::model::LogicalVolume;

#[derive(Debug, Clone, Default)]
pub struct ConnectOpts {
    pub mountpoint_hint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConnectResult {
    pub path: PathBuf,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, volume: &LogicalVolume, opts: &ConnectOpts) -> FuxiResult<ConnectResult>;

    async fn disconnect(&self, volume: &LogicalVolume, opts: &ConnectOpts) -> FuxiResult<()>;

    /// The stable device path for an already-attached volume, without
    /// performing any attach.
    async fn device_path(&self, volume: &LogicalVolume) -> FuxiResult<PathBuf>;

    /// Only meaningful for Manila connectors; Cinder connectors rely on
    /// `AttachmentState` instead.
    async fn check_access_allowed(&self, _volume: &LogicalVolume) -> FuxiResult<bool> {
        Err(FuxiError::InvalidInput(
            "check_access_allowed is only supported by share connectors".to_string(),
        ))
    }

    async fn mountpoint(&self, _volume: &LogicalVolume) -> FuxiResult<PathBuf> {
        Err(FuxiError::InvalidInput(
            "mountpoint is only supported by share connectors".to_string(),
        ))
    }
}

pub fn stable_link_path(volume_id: &str) -> PathBuf {
    PathBuf::from("/dev/disk/by-id").join(volume_id)
}

pub type ConnectorProperties = BTreeMap<String, String>;
