//! Core data model shared by providers, connectors and the mount subsystem.
//!
//! None of these types are persisted: a [`LogicalVolume`] is always a fresh
//! snapshot from the cloud back-end, and a [`MountInfo`] is always a fresh
//! snapshot of `/proc/mounts`. See the module-level note in `provider::registry`
//! for why this daemon deliberately keeps no caches.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Key stamped into back-end metadata to mark a volume/share as owned by
/// this daemon. The value is the configured service tag (default `"fuxi"`).
pub const VOLUME_FROM_KEY: &str = "volume_from";
pub const FSTYPE_KEY: &str = "fstype";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub host_id: String,
    pub server_id: Option<String>,
    pub attachment_id: Option<String>,
}

/// Provider-visible abstraction over a Cinder volume or Manila share.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalVolume {
    pub id: String,
    pub name: String,
    pub size_gib: u64,
    pub status: String,
    pub attachments: Vec<Attachment>,
    pub multiattach: bool,
    pub metadata: std::collections::BTreeMap<String, String>,
    /// Only populated for Manila shares.
    pub protocol: Option<String>,
    /// Manila export location(s); empty for Cinder volumes.
    pub export_locations: Vec<String>,
}

impl LogicalVolume {
    /// A volume is owned by this daemon iff its metadata carries the
    /// service-tag sentinel.
    pub fn is_owned_by(&self, service_tag: &str) -> bool {
        self.metadata
            .get(VOLUME_FROM_KEY)
            .map(|v| v == service_tag)
            .unwrap_or(false)
    }

    pub fn fstype(&self) -> Option<&str> {
        self.metadata.get(FSTYPE_KEY).map(String::as_str)
    }

    pub fn attached_to(&self, host_id: &str) -> bool {
        self.attachments.iter().any(|a| a.host_id == host_id)
    }
}

/// Derived per-call classification of how (if at all) a volume is attached
/// to the local host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentState {
    Unknown,
    NotAttached,
    AttachToThis,
    AttachToOther,
}

impl AttachmentState {
    pub fn classify(volume: Option<&LogicalVolume>, host_id: &str) -> Self {
        match volume {
            None => AttachmentState::Unknown,
            Some(v) if v.attachments.is_empty() => AttachmentState::NotAttached,
            Some(v) if v.attached_to(host_id) => AttachmentState::AttachToThis,
            Some(_) => AttachmentState::AttachToOther,
        }
    }
}

impl crate::state_monitor::HasStatus for LogicalVolume {
    fn status(&self) -> &str {
        &self.status
    }
}

/// A single line parsed out of `/proc/mounts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub device: PathBuf,
    pub mountpoint: PathBuf,
    pub fstype: String,
    pub opts: String,
}

/// A `/sys/block/<name>` entry discovered during a device scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub sys_path: PathBuf,
    pub dev_path: PathBuf,
}

impl DeviceRecord {
    pub fn from_sys_path(sys_path: PathBuf) -> Self {
        let name = sys_path
            .file_name()
            .expect("sys_path always has a final component")
            .to_string_lossy()
            .into_owned();
        Self {
            dev_path: PathBuf::from("/dev").join(name),
            sys_path,
        }
    }
}

/// Ordered, deduplicated view of `/sys/block/*` paths, used to diff device
/// sets around an attach operation.
pub type DeviceSet = BTreeSet<PathBuf>;
