//! Strongly typed identifiers for the store's tables.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Owner of devices, watchers and the backup.
    UserId
);

string_id!(
    /// Caller-supplied device identifier.
    DeviceId
);

string_id!(
    /// Server-generated watcher identifier.
    WatcherId
);

string_id!(
    /// Opaque token correlating the fragments of one chunked upload.
    UploadId
);

/// 16 random bytes, hex-encoded.
fn random_token() -> String {
    let mut buf = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

impl WatcherId {
    /// Generate a fresh random watcher identifier.
    pub fn generate() -> Self {
        Self(random_token())
    }
}

impl UploadId {
    /// Generate a fresh random session token.
    pub fn generate() -> Self {
        Self(random_token())
    }
}
