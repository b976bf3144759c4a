//! Cinder's volume API, scoped to the calls the Connector/Provider layer
//! actually drives.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FuxiResult;
use crate::model::LogicalVolume;

#[derive(Debug, Clone, Default)]
pub struct VolumeFilter {
    pub name: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateVolumeParams {
    pub name: String,
    pub size_gib: u64,
    pub consistencygroup_id: Option<String>,
    pub snapshot_id: Option<String>,
    pub source_volid: Option<String>,
    pub description: Option<String>,
    pub volume_type: Option<String>,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub availability_zone: Option<String>,
    pub scheduler_hints: Option<serde_json::Value>,
    pub source_replica: Option<String>,
    pub multiattach: bool,
    pub metadata: BTreeMap<String, String>,
}

/// Host-identifying properties handed to `initialize_connection` so Cinder
/// knows which transport (iSCSI/RBD/FC) and initiator to wire up.
pub type ConnectorProperties = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub driver_volume_type: String,
    pub data: serde_json::Value,
}

#[async_trait]
pub trait BlockClient: Send + Sync {
    async fn list_volumes(&self, filter: &VolumeFilter) -> FuxiResult<Vec<LogicalVolume>>;
    async fn get_volume(&self, id: &str) -> FuxiResult<LogicalVolume>;
    async fn create_volume(&self, params: &CreateVolumeParams) -> FuxiResult<LogicalVolume>;
    async fn delete_volume(&self, id: &str) -> FuxiResult<()>;
    async fn reserve(&self, id: &str) -> FuxiResult<()>;
    async fn unreserve(&self, id: &str) -> FuxiResult<()>;
    async fn initialize_connection(
        &self,
        id: &str,
        connector_properties: &ConnectorProperties,
    ) -> FuxiResult<Connection>;
    async fn terminate_connection(&self, id: &str, connector_properties: &ConnectorProperties) -> FuxiResult<()>;
    async fn attach(&self, id: &str, host_name: &str, mountpoint: Option<&str>) -> FuxiResult<String>;
    async fn detach(&self, id: &str, attachment_id: &str) -> FuxiResult<()>;
    async fn set_metadata(&self, id: &str, metadata: &BTreeMap<String, String>) -> FuxiResult<()>;
}
