//! `/api/1/` routes: backup metadata, premium components, watchers.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use spaetzli_core::{BackupMetadata, Watcher, WatcherArgs, WatcherId};
use tracing::debug;

use crate::error::ServerError;
use crate::state::AppState;

const PREMIUM_COMPONENTS_FILE: &str = "premium_components.js";

/// Served when no `premium_components.js` exists in the data directory.
const PREMIUM_COMPONENTS_STUB: &str = r#"
// Spaetzli Mock Premium Components
(function() {
    const components = {
        PremiumStatistics: {
            template: '<div class="premium-mock">Premium Statistics (Mock)</div>',
            name: 'PremiumStatistics'
        },
        EthStaking: {
            template: '<div class="premium-mock">ETH Staking View (Mock)</div>',
            name: 'EthStaking'
        },
        AssetAmountAndValueOverTime: {
            template: '<div class="premium-mock">Asset Chart (Mock)</div>',
            name: 'AssetAmountAndValueOverTime'
        },
        ThemeManager: {
            template: '<div></div>',
            name: 'ThemeManager'
        }
    };

    const PremiumComponents = {
        install(app) {
            Object.entries(components).forEach(([name, component]) => {
                app.component(name, component);
            });
        },
        ...components
    };

    window.PremiumComponents = PremiumComponents;
})();
"#;

/// Wire shape of backup metadata. All-zero when no backup exists.
#[derive(Debug, Default, Serialize)]
pub struct MetadataBody {
    pub upload_ts: i64,
    pub last_modify_ts: i64,
    pub data_hash: String,
    pub data_size: u64,
}

impl From<BackupMetadata> for MetadataBody {
    fn from(meta: BackupMetadata) -> Self {
        Self {
            upload_ts: meta.upload_ts,
            last_modify_ts: meta.last_modify_ts,
            data_hash: meta.data_hash.to_hex(),
            data_size: meta.data_size,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WatchersBody {
    pub watchers: Vec<Watcher>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NewWatcher {
    #[serde(default, rename = "type")]
    pub watcher_type: String,
    #[serde(default)]
    pub args: WatcherArgs,
}

#[derive(Debug, Default, Deserialize)]
pub struct WatcherEdit {
    pub identifier: Option<WatcherId>,
    #[serde(default)]
    pub args: WatcherArgs,
}

#[derive(Debug, Deserialize)]
pub struct WatchersRequest<T> {
    #[serde(default = "Vec::new")]
    pub watchers: Vec<T>,
}

/// GET / — service banner.
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "spaetzli-mock-premium",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /health — unauthenticated health check.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// POST /api/1/usage_analytics — anonymous telemetry, accepted and dropped.
pub async fn usage_analytics() -> impl IntoResponse {
    Json(serde_json::json!({ "success": true }))
}

/// GET /api/1/last_data_metadata — also how clients verify premium status,
/// so a missing backup is an empty record rather than an error.
pub async fn last_data_metadata(State(state): State<AppState>) -> Json<MetadataBody> {
    let body = state
        .store()
        .get_backup_metadata(&state.user())
        .map(MetadataBody::from)
        .unwrap_or_default();
    Json(body)
}

/// GET /api/1/statistics_rendererv2
pub async fn statistics_renderer(State(state): State<AppState>) -> Result<Response, ServerError> {
    let path = state.inner.data_dir.join(PREMIUM_COMPONENTS_FILE);
    let js_code = match tokio::fs::read_to_string(&path).await {
        Ok(code) => code,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => PREMIUM_COMPONENTS_STUB.to_string(),
        Err(e) => return Err(ServerError::Internal(e.to_string())),
    };
    Ok(Json(serde_json::json!({ "data": js_code })).into_response())
}

/// GET /api/1/watchers
pub async fn list_watchers(State(state): State<AppState>) -> Json<WatchersBody> {
    Json(WatchersBody {
        watchers: state.store().list_watchers(&state.user()),
    })
}

/// PUT /api/1/watchers — returns only the watchers created by this call.
pub async fn add_watchers(
    State(state): State<AppState>,
    Json(body): Json<WatchersRequest<NewWatcher>>,
) -> Json<WatchersBody> {
    let user = state.user();
    let watchers = body
        .watchers
        .into_iter()
        .map(|w| state.store().add_watcher(&user, &w.watcher_type, w.args))
        .collect();
    Json(WatchersBody { watchers })
}

/// PATCH /api/1/watchers — unknown identifiers are skipped.
pub async fn edit_watchers(
    State(state): State<AppState>,
    Json(body): Json<WatchersRequest<WatcherEdit>>,
) -> Json<WatchersBody> {
    let mut updated = Vec::new();
    for edit in body.watchers {
        let Some(id) = edit.identifier else {
            continue;
        };
        match state.store().update_watcher_args(&id, edit.args) {
            Ok(watcher) => updated.push(watcher),
            Err(e) => debug!(error = %e, "skipping watcher edit"),
        }
    }
    Json(WatchersBody { watchers: updated })
}

/// DELETE /api/1/watchers — returns the remaining watchers.
pub async fn delete_watchers(
    State(state): State<AppState>,
    Json(body): Json<WatchersRequest<WatcherId>>,
) -> Json<WatchersBody> {
    for id in body.watchers {
        if let Err(e) = state.store().remove_watcher(&id) {
            debug!(error = %e, "skipping watcher delete");
        }
    }
    list_watchers(State(state)).await
}
