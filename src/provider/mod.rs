//! Implements the Docker volume verbs for one back-end family.

pub mod cinder;
pub mod manila;
pub mod registry;

pub use cinder::CinderProvider;
pub use manila::ManilaProvider;
pub use registry::ProviderRegistry;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::FuxiResult;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeInfo {
    pub name: String,
    pub mountpoint: PathBuf,
}

/// Docker passes boolean opts as strings; accept the common spellings.
pub(crate) fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn create(&self, name: &str, opts: &BTreeMap<String, String>) -> FuxiResult<()>;
    /// Returns whether this provider owned (and handled) the volume.
    async fn delete(&self, name: &str) -> FuxiResult<bool>;
    async fn mount(&self, name: &str) -> FuxiResult<PathBuf>;
    async fn unmount(&self, name: &str) -> FuxiResult<()>;
    async fn list(&self) -> FuxiResult<Vec<VolumeInfo>>;
    async fn show(&self, name: &str) -> FuxiResult<VolumeInfo>;
    async fn check_exist(&self, name: &str) -> FuxiResult<bool>;
}
