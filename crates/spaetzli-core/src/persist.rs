//! Best-effort durable mirrors for committed backups.
//!
//! The in-memory store stays authoritative; a sink only receives a copy
//! after each commit and its failures are logged, not surfaced.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

use tracing::debug;

use crate::backup::BackupMetadata;
use crate::error::PersistError;
use crate::ids::UserId;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Receives every committed backup after the in-memory commit.
pub trait PersistenceSink: Send + Sync + 'static {
    fn persist_backup(&self, metadata: &BackupMetadata, data: &[u8]) -> Result<(), PersistError>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PersistenceSink for NullSink {
    fn persist_backup(&self, _metadata: &BackupMetadata, _data: &[u8]) -> Result<(), PersistError> {
        Ok(())
    }
}

/// Writes `<user>_backup.bin` and `<user>_metadata.json` into a directory.
#[derive(Debug, Clone)]
pub struct DirectoryMirror {
    dir: PathBuf,
}

impl DirectoryMirror {
    /// Create the mirror, creating `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn data_path(&self, user: &UserId) -> PathBuf {
        self.dir.join(format!("{}_backup.bin", file_stem(user)))
    }

    pub fn metadata_path(&self, user: &UserId) -> PathBuf {
        self.dir.join(format!("{}_metadata.json", file_stem(user)))
    }
}

impl PersistenceSink for DirectoryMirror {
    fn persist_backup(&self, metadata: &BackupMetadata, data: &[u8]) -> Result<(), PersistError> {
        let data_path = self.data_path(&metadata.user);
        write_atomic(&data_path, data)?;

        let meta_json = serde_json::to_vec_pretty(metadata)?;
        write_atomic(&self.metadata_path(&metadata.user), &meta_json)?;

        debug!(path = %data_path.display(), bytes = data.len(), "mirrored backup to disk");
        Ok(())
    }
}

/// User ids outside `[A-Za-z0-9_.-]` are hex-encoded so the stem can never
/// escape the backups directory.
fn file_stem(user: &UserId) -> String {
    let raw = user.as_str();
    let safe = !raw.is_empty()
        && raw != "."
        && raw != ".."
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.');
    if safe {
        raw.to_string()
    } else {
        format!("x{}", hex::encode(raw.as_bytes()))
    }
}

/// Write to a unique temp file next to `path`, then rename over it.
fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let unique_id = TEMP_COUNTER.fetch_add(1, Relaxed);
    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let temp_path = path.with_file_name(format!(".tmp.{file_name}.{unique_id}"));

    if let Err(e) = std::fs::write(&temp_path, data) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }
    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}
