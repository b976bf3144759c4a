//! Nova's server-volume API — only the two calls the Nova-attach connector
//! path needs.

use async_trait::async_trait;

use crate::error::FuxiResult;

#[async_trait]
pub trait ComputeClient: Send + Sync {
    /// Attaches `volume_id` to `server_id`. Returns the attachment id Nova
    /// assigns, which later matches an entry in the volume's `attachments`.
    async fn create_server_volume(&self, server_id: &str, volume_id: &str) -> FuxiResult<String>;

    async fn delete_server_volume(&self, server_id: &str, volume_id: &str) -> FuxiResult<()>;
}
