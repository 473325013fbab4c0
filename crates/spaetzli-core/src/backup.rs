//! Backup metadata and content hashing.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::ids::UserId;

/// Compression scheme assumed when the client does not declare one.
pub const DEFAULT_COMPRESSION: &str = "zlib";

/// SHA-256 digest of a backup payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Lowercase hex, the form clients compare against.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> std::result::Result<Self, String> {
        let bytes = hex::decode(s).map_err(|e| format!("invalid hex: {e}"))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Describes the single most recent backup of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub user: UserId,
    /// Server time of the upload, unix seconds.
    pub upload_ts: i64,
    /// Client-declared last modification time, unix seconds.
    pub last_modify_ts: i64,
    pub data_hash: ContentHash,
    pub data_size: u64,
    pub compression: String,
}

impl BackupMetadata {
    /// Hash `data` and stamp the result with the current server time.
    pub fn for_payload(user: UserId, data: &[u8], last_modify_ts: i64, compression: &str) -> Self {
        Self {
            user,
            upload_ts: Utc::now().timestamp(),
            last_modify_ts,
            data_hash: ContentHash::compute(data),
            data_size: data.len() as u64,
            compression: compression.to_string(),
        }
    }
}
