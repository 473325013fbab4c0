use std::sync::{Arc, Mutex, OnceLock, Weak};

use crate::backup::BackupMetadata;
use crate::error::PersistError;
use crate::limits::PremiumLimits;
use crate::persist::PersistenceSink;
use crate::store::StateStore;
use crate::upload::UploadManager;

/// Sink that remembers every backup it was handed.
#[derive(Default)]
pub struct RecordingSink {
    pub written: Mutex<Vec<(BackupMetadata, Vec<u8>)>>,
}

impl RecordingSink {
    pub fn count(&self) -> usize {
        self.written.lock().unwrap().len()
    }
}

impl PersistenceSink for RecordingSink {
    fn persist_backup(&self, metadata: &BackupMetadata, data: &[u8]) -> Result<(), PersistError> {
        self.written
            .lock()
            .unwrap()
            .push((metadata.clone(), data.to_vec()));
        Ok(())
    }
}

/// Sink whose every write fails.
pub struct FailingSink;

impl PersistenceSink for FailingSink {
    fn persist_backup(&self, _metadata: &BackupMetadata, _data: &[u8]) -> Result<(), PersistError> {
        Err(PersistError::Io(std::io::Error::other("disk full")))
    }
}

/// What a re-entrant sink saw while a backup was being mirrored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorObservation {
    pub visible_size: Option<u64>,
    pub open_sessions: usize,
}

/// Sink that calls back into the store and the upload manager from inside
/// `persist_backup`. Deadlocks if either lock is still held.
#[derive(Default)]
pub struct ReentrantSink {
    pub uploads: OnceLock<Weak<UploadManager>>,
    pub seen: Mutex<Vec<MirrorObservation>>,
}

impl PersistenceSink for ReentrantSink {
    fn persist_backup(&self, metadata: &BackupMetadata, _data: &[u8]) -> Result<(), PersistError> {
        let Some(uploads) = self.uploads.get().and_then(Weak::upgrade) else {
            return Ok(());
        };
        let observation = MirrorObservation {
            visible_size: uploads
                .store()
                .get_backup_metadata(&metadata.user)
                .map(|m| m.data_size),
            open_sessions: uploads.session_count(),
        };
        self.seen.lock().unwrap().push(observation);
        Ok(())
    }
}

pub fn reentrant_uploads() -> (Arc<UploadManager>, Arc<ReentrantSink>) {
    let sink = Arc::new(ReentrantSink::default());
    let store = Arc::new(StateStore::new(PremiumLimits::default(), sink.clone()));
    let uploads = Arc::new(UploadManager::new(store));
    let _ = sink.uploads.set(Arc::downgrade(&uploads));
    (uploads, sink)
}

pub fn test_store(limit_of_devices: usize) -> (Arc<StateStore>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let limits = PremiumLimits {
        limit_of_devices,
        ..Default::default()
    };
    let store = Arc::new(StateStore::new(limits, sink.clone()));
    (store, sink)
}
