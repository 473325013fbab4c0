pub mod api;
pub mod nest;

#[cfg(test)]
pub(crate) mod test_helpers;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, Request};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ServerError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let body_limit = state.inner.config.limits.max_backup_bytes();

    let authed = Router::new()
        .route("/api/1/last_data_metadata", get(api::last_data_metadata))
        .route("/api/1/statistics_rendererv2", get(api::statistics_renderer))
        .route(
            "/api/1/watchers",
            get(api::list_watchers)
                .put(api::add_watchers)
                .patch(api::edit_watchers)
                .delete(api::delete_watchers),
        )
        .route("/nest/1/limits", get(nest::limits))
        .route(
            "/nest/1/devices",
            get(nest::list_devices)
                .put(nest::register_device)
                .patch(nest::edit_device)
                .delete(nest::delete_device),
        )
        .route("/nest/1/devices/check", post(nest::check_device))
        .route("/nest/1/backup", get(nest::download_backup))
        .route("/nest/1/backup/range", post(nest::upload_backup_range))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Health and telemetry endpoints are unauthenticated
    let public = Router::new()
        .route("/", get(api::root))
        .route("/health", get(api::health))
        .route("/api/1/usage_analytics", post(api::usage_analytics));

    public
        .merge(authed)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Accept any non-empty API key. In signature mode an API-SIGN header must
/// also be present; its value is not checked.
async fn auth_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let has_key = has_header(req.headers(), "API-KEY");
    let has_sign = has_header(req.headers(), "API-SIGN");

    if !has_key {
        return ServerError::Unauthorized("API KEY signature mismatch".into()).into_response();
    }
    if state.inner.config.server.validate_signatures && !has_sign {
        return ServerError::Unauthorized("Missing API-SIGN header".into()).into_response();
    }
    next.run(req).await
}

fn has_header(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.is_empty())
}
