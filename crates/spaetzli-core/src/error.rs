use thiserror::Error;

use crate::ids::{DeviceId, UploadId, UserId, WatcherId};

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("device not found: '{0}'")]
    DeviceNotFound(DeviceId),

    #[error("watcher not found: '{0}'")]
    WatcherNotFound(WatcherId),

    #[error("upload session not found: '{0}'")]
    UploadNotFound(UploadId),

    #[error("device limit ({limit}) reached for user '{user}'")]
    CapacityExceeded { user: UserId, limit: usize },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound(_) | Self::WatcherNotFound(_) | Self::UploadNotFound(_)
        )
    }
}

/// Failure while mirroring a committed backup to durable storage.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
