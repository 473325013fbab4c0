//! Chunked backup uploads.
//!
//! A backup arrives as one or more byte ranges. The first non-final range
//! opens a session; the range whose end reaches the declared total closes
//! it, and the fragments are concatenated by ascending offset and handed to
//! the [`StateStore`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::backup::BackupMetadata;
use crate::error::{Result, StoreError};
use crate::ids::{UploadId, UserId};
use crate::store::{lock_unpoisoned, StateStore};

/// A parsed `Content-Range: bytes <start>-<end>/<total>` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    /// Inclusive.
    pub end: u64,
    pub total: u64,
}

impl ContentRange {
    pub fn parse(header: &str) -> Option<Self> {
        let spec = header.trim().strip_prefix("bytes ")?;
        let (range, total) = spec.split_once('/')?;
        let (start, end) = range.split_once('-')?;
        Some(Self {
            start: start.trim().parse().ok()?,
            end: end.trim().parse().ok()?,
            total: total.trim().parse().ok()?,
        })
    }
}

/// One submitted byte range plus the attributes the client sent with it.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub data: Bytes,
    pub start: u64,
    /// Inclusive end of the range as declared by the client.
    pub end: u64,
    pub total_size: u64,
    pub last_modify_ts: i64,
    pub compression: String,
}

impl Fragment {
    pub fn from_range(
        data: impl Into<Bytes>,
        range: ContentRange,
        last_modify_ts: i64,
        compression: impl Into<String>,
    ) -> Self {
        Self {
            data: data.into(),
            start: range.start,
            end: range.end,
            total_size: range.total,
            last_modify_ts,
            compression: compression.into(),
        }
    }

    /// A fragment that covers the whole backup on its own.
    pub fn whole(
        data: impl Into<Bytes>,
        last_modify_ts: i64,
        compression: impl Into<String>,
    ) -> Self {
        let data = data.into();
        let len = data.len() as u64;
        Self {
            data,
            start: 0,
            end: len.saturating_sub(1),
            total_size: len,
            last_modify_ts,
            compression: compression.into(),
        }
    }

    /// Completion trusts the declared range end, not the bytes received.
    pub fn is_final(&self) -> bool {
        self.end.saturating_add(1) >= self.total_size
    }
}

/// Result of [`UploadManager::submit_fragment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// More fragments are expected for this session.
    InProgress { upload_id: UploadId },
    /// The backup was reassembled and committed. `upload_id` is `None` for
    /// the single-fragment shortcut.
    Committed {
        upload_id: Option<UploadId>,
        metadata: BackupMetadata,
    },
}

impl FragmentOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

#[derive(Debug)]
struct UploadSession {
    user: UserId,
    total_size: u64,
    received_size: u64,
    fragments: Vec<(u64, Bytes)>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UploadSession {
    fn new(user: UserId, total_size: u64) -> Self {
        let now = Utc::now();
        Self {
            user,
            total_size,
            received_size: 0,
            fragments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn push(&mut self, offset: u64, data: Bytes) {
        self.received_size += data.len() as u64;
        self.fragments.push((offset, data));
        self.updated_at = Utc::now();
    }

    /// Concatenate by ascending offset. The sort is stable, so fragments
    /// sharing an offset keep arrival order.
    fn assemble(mut self) -> Vec<u8> {
        self.fragments.sort_by_key(|(offset, _)| *offset);
        let mut out = Vec::with_capacity(self.received_size as usize);
        for (_, chunk) in &self.fragments {
            out.extend_from_slice(chunk);
        }
        out
    }
}

/// In-progress chunked uploads, guarded by their own lock.
pub struct UploadManager {
    store: Arc<StateStore>,
    sessions: Mutex<HashMap<UploadId, UploadSession>>,
}

impl UploadManager {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<UploadId, UploadSession>> {
        lock_unpoisoned(&self.sessions, "upload_sessions")
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    pub fn has_session(&self, id: &UploadId) -> bool {
        self.sessions().contains_key(id)
    }

    /// Open an empty session for `user`.
    pub fn begin(&self, user: &UserId, total_size: u64) -> UploadId {
        let id = UploadId::generate();
        self.sessions()
            .insert(id.clone(), UploadSession::new(user.clone(), total_size));
        debug!(upload = %id, user = %user, total_size, "upload session opened");
        id
    }

    /// Add a fragment at `offset` to an open session.
    pub fn append(&self, id: &UploadId, offset: u64, data: impl Into<Bytes>) -> Result<()> {
        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::UploadNotFound(id.clone()))?;
        session.push(offset, data.into());
        Ok(())
    }

    /// Close a session, reassemble it and commit the result.
    ///
    /// The session is removed before the commit; a second call with the
    /// same id reports [`StoreError::UploadNotFound`].
    pub fn finalize(
        &self,
        id: &UploadId,
        last_modify_ts: i64,
        compression: &str,
    ) -> Result<BackupMetadata> {
        let session = self
            .sessions()
            .remove(id)
            .ok_or_else(|| StoreError::UploadNotFound(id.clone()))?;
        Ok(self.commit(id, session, last_modify_ts, compression))
    }

    /// Route one fragment through the session state machine.
    pub fn submit_fragment(
        &self,
        upload_id: Option<&UploadId>,
        user: &UserId,
        fragment: Fragment,
    ) -> Result<FragmentOutcome> {
        let is_final = fragment.is_final();

        match upload_id {
            None if is_final => {
                let metadata = self.store.store_backup(
                    user,
                    fragment.data,
                    fragment.last_modify_ts,
                    &fragment.compression,
                );
                Ok(FragmentOutcome::Committed {
                    upload_id: None,
                    metadata,
                })
            }
            None => {
                let id = UploadId::generate();
                let mut session = UploadSession::new(user.clone(), fragment.total_size);
                session.push(fragment.start, fragment.data);
                self.sessions().insert(id.clone(), session);
                debug!(
                    upload = %id,
                    user = %user,
                    total_size = fragment.total_size,
                    "upload session opened"
                );
                Ok(FragmentOutcome::InProgress { upload_id: id })
            }
            Some(id) if !is_final => {
                self.append(id, fragment.start, fragment.data)?;
                Ok(FragmentOutcome::InProgress { upload_id: id.clone() })
            }
            Some(id) => {
                let session = {
                    let mut sessions = self.sessions();
                    let mut session = sessions
                        .remove(id)
                        .ok_or_else(|| StoreError::UploadNotFound(id.clone()))?;
                    session.push(fragment.start, fragment.data);
                    session
                };
                let metadata =
                    self.commit(id, session, fragment.last_modify_ts, &fragment.compression);
                Ok(FragmentOutcome::Committed {
                    upload_id: Some(id.clone()),
                    metadata,
                })
            }
        }
    }

    /// Must be called without the session lock held.
    fn commit(
        &self,
        id: &UploadId,
        session: UploadSession,
        last_modify_ts: i64,
        compression: &str,
    ) -> BackupMetadata {
        if session.received_size != session.total_size {
            warn!(
                upload = %id,
                received = session.received_size,
                declared = session.total_size,
                "upload finalized with a byte count different from the declared size"
            );
        }
        let user = session.user.clone();
        let fragments = session.fragments.len();
        let data = session.assemble();
        debug!(upload = %id, fragments, bytes = data.len(), "upload reassembled");
        self.store.store_backup(&user, data, last_modify_ts, compression)
    }

    /// Drop sessions with no activity for longer than `ttl`. Returns how
    /// many were removed.
    pub fn sweep_expired(&self, ttl: Duration) -> usize {
        let cutoff = Utc::now() - ttl;
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|id, session| {
            let keep = session.updated_at > cutoff;
            if !keep {
                debug!(
                    upload = %id,
                    opened = %session.created_at,
                    received = session.received_size,
                    "expiring abandoned upload session"
                );
            }
            keep
        });
        before - sessions.len()
    }
}
