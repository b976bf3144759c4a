//! Manila's share API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FuxiResult;
use crate::model::LogicalVolume;

use super::block::VolumeFilter;

#[derive(Debug, Clone, Default)]
pub struct CreateShareParams {
    pub name: String,
    pub share_proto: String,
    pub size_gib: u64,
    pub snapshot_id: Option<String>,
    pub description: Option<String>,
    pub share_network: Option<String>,
    pub share_type: Option<String>,
    pub is_public: Option<bool>,
    pub availability_zone: Option<String>,
    pub consistency_group_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessRule {
    pub id: String,
    pub access_type: String,
    pub access_to: String,
    pub access_level: String,
    pub state: String,
}

impl crate::state_monitor::HasStatus for AccessRule {
    fn status(&self) -> &str {
        &self.state
    }
}

#[async_trait]
pub trait ShareClient: Send + Sync {
    async fn list_shares(&self, filter: &VolumeFilter) -> FuxiResult<Vec<LogicalVolume>>;
    async fn get_share(&self, id: &str) -> FuxiResult<LogicalVolume>;
    async fn create_share(&self, params: &CreateShareParams) -> FuxiResult<LogicalVolume>;
    async fn delete_share(&self, id: &str) -> FuxiResult<()>;
    async fn allow(&self, id: &str, access_type: &str, access_to: &str, access_level: &str) -> FuxiResult<AccessRule>;
    async fn deny(&self, id: &str, access_id: &str) -> FuxiResult<()>;
    async fn access_list(&self, id: &str) -> FuxiResult<Vec<AccessRule>>;
    async fn update_all_metadata(&self, id: &str, metadata: &BTreeMap<String, String>) -> FuxiResult<()>;
}
