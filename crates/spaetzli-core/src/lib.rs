//! Core state for the spaetzli mock premium server.
//!
//! Holds the device, watcher and backup tables behind a single lock and
//! reassembles chunked backup uploads before committing them.

pub mod backup;
pub mod device;
pub mod error;
pub mod ids;
pub mod limits;
pub mod persist;
pub mod store;
pub mod upload;
pub mod watcher;

pub use backup::{BackupMetadata, ContentHash};
pub use device::Device;
pub use error::{PersistError, Result, StoreError};
pub use ids::{DeviceId, UploadId, UserId, WatcherId};
pub use limits::{PremiumCapabilities, PremiumLimits};
pub use persist::{DirectoryMirror, NullSink, PersistenceSink};
pub use store::StateStore;
pub use upload::{ContentRange, Fragment, FragmentOutcome, UploadManager};
pub use watcher::{Watcher, WatcherArgs};

/// User every request is attributed to while authentication is a stub.
pub const DEFAULT_USER: &str = "default";

#[cfg(test)]
mod testutil;
