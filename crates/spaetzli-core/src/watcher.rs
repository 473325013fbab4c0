use std::collections::BTreeMap;

use serde::Serialize;

use crate::ids::{UserId, WatcherId};

/// Watcher arguments: arbitrary JSON values keyed by name.
pub type WatcherArgs = BTreeMap<String, serde_json::Value>;

/// A price-alert definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Watcher {
    pub identifier: WatcherId,
    #[serde(rename = "type")]
    pub watcher_type: String,
    pub args: WatcherArgs,
    #[serde(skip)]
    pub user: UserId,
}

impl Watcher {
    /// Build a watcher with a freshly generated identifier.
    pub fn new(user: UserId, watcher_type: impl Into<String>, args: WatcherArgs) -> Self {
        Self {
            identifier: WatcherId::generate(),
            watcher_type: watcher_type.into(),
            args,
            user,
        }
    }
}
