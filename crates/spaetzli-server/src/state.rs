use std::path::PathBuf;
use std::sync::Arc;

use spaetzli_core::{PersistenceSink, StateStore, UploadManager, UserId, DEFAULT_USER};

use crate::config::ServerConfig;

/// Shared application state, wrapped in Arc for axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub config: ServerConfig,
    pub data_dir: PathBuf,
    pub store: Arc<StateStore>,
    pub uploads: UploadManager,
}

impl AppState {
    pub fn new(config: ServerConfig, sink: Arc<dyn PersistenceSink>) -> Self {
        let data_dir = PathBuf::from(&config.server.data_dir);
        let store = Arc::new(StateStore::new(config.limits.clone(), sink));
        let uploads = UploadManager::new(Arc::clone(&store));

        Self {
            inner: Arc::new(AppStateInner {
                config,
                data_dir,
                store,
                uploads,
            }),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    pub fn uploads(&self) -> &UploadManager {
        &self.inner.uploads
    }

    /// Every request belongs to the default user until auth resolves keys
    /// to accounts.
    pub fn user(&self) -> UserId {
        UserId::new(DEFAULT_USER)
    }
}

pub fn backups_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("backups")
}
