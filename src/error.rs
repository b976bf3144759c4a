use std::time::Duration;

use thiserror::Error;

/// Domain error taxonomy surfaced to Docker as a plugin `Err` string.
///
/// Every variant maps 1:1 onto a failure mode a provider, connector or the
/// mount/device subsystem can raise. The HTTP boundary is the only place
/// that ever turns one of these into a response body.
#[derive(Error, Debug)]
pub enum FuxiError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("volume or share not found: {0}")]
    NotFound(String),

    #[error("found {count} resources matching {name}, expected at most one")]
    TooManyResources { name: String, count: usize },

    #[error("volume {name} is not in a state that allows this operation: {reason}")]
    NotMatchedState { name: String, reason: String },

    #[error("object reached unexpected state {actual}, wanted {desired}")]
    UnexpectedState { desired: String, actual: String },

    #[error("timed out after {0:?} waiting for desired state")]
    Timeout(Duration),

    #[error("protocol {0} is not a recognized share protocol")]
    InvalidProtocol(String),

    #[error("access type {0} is not valid for this protocol")]
    InvalidAccessType(String),

    #[error("no access_to value configured for this access type")]
    InvalidAccessTo,

    #[error("mkfs failed for {device} ({fstype}): {stderr}")]
    MakeFilesystem {
        device: String,
        fstype: String,
        stderr: String,
    },

    #[error("mount of {device} at {mountpoint} failed: {stderr}")]
    Mount {
        device: String,
        mountpoint: String,
        stderr: String,
    },

    #[error("unmount of {target} failed: {stderr}")]
    Unmount { target: String, stderr: String },

    #[error("command {argv:?} exited with status {code}: {stderr}")]
    Execution {
        argv: Vec<String>,
        code: i32,
        stderr: String,
    },

    #[error("no new block device appeared within the scan timeout")]
    DeviceNotFound,

    #[error("cloud credentials expired or rejected: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("could not parse sysfs value: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
}

pub type FuxiResult<T> = Result<T, FuxiError>;

impl FuxiError {
    /// Errors that should be treated as "volume already gone" by delete paths.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FuxiError::NotFound(_))
    }
}
