//! `/nest/1/` routes: limits, devices, backup download and upload.

use axum::body::Body;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use spaetzli_core::backup::DEFAULT_COMPRESSION;
use spaetzli_core::{
    ContentRange, Device, DeviceId, Fragment, FragmentOutcome, PremiumCapabilities,
    PremiumLimits, UploadId,
};
use tracing::debug;

use super::api::MetadataBody;
use crate::error::ServerError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct LimitsBody {
    #[serde(flatten)]
    pub limits: PremiumLimits,
    #[serde(flatten)]
    pub capabilities: PremiumCapabilities,
}

#[derive(Debug, Serialize)]
pub struct DevicesBody {
    pub devices: Vec<Device>,
    pub limit: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceRequest {
    #[serde(default)]
    pub device_identifier: String,
    pub device_name: Option<String>,
    pub platform: Option<String>,
}

/// GET /nest/1/limits
pub async fn limits(State(state): State<AppState>) -> Json<LimitsBody> {
    let config = &state.inner.config;
    Json(LimitsBody {
        limits: config.limits.clone(),
        capabilities: config.capabilities.clone(),
    })
}

/// GET /nest/1/devices
pub async fn list_devices(State(state): State<AppState>) -> Json<DevicesBody> {
    Json(DevicesBody {
        devices: state.store().list_devices(&state.user()),
        limit: state.store().limits().limit_of_devices,
    })
}

/// POST /nest/1/devices/check — 200 when registered, 404 otherwise.
pub async fn check_device(
    State(state): State<AppState>,
    Json(body): Json<DeviceRequest>,
) -> Result<Response, ServerError> {
    let id = DeviceId::new(body.device_identifier);
    state.store().touch_device(&id)?;
    Ok(StatusCode::OK.into_response())
}

/// PUT /nest/1/devices — 201 on registration, 409 if the identifier is
/// taken, 422 when the device limit is reached.
pub async fn register_device(
    State(state): State<AppState>,
    Json(body): Json<DeviceRequest>,
) -> Result<Response, ServerError> {
    let id = DeviceId::new(body.device_identifier);
    if state.store().device_exists(&id) {
        return Err(ServerError::Conflict(format!("device '{id}' already registered")));
    }

    let device = Device::new(
        id,
        body.device_name.unwrap_or_else(|| "Unknown Device".to_string()),
        body.platform.unwrap_or_else(|| "Unknown".to_string()),
        state.user(),
    );
    state.store().add_device(device)?;
    Ok(StatusCode::CREATED.into_response())
}

/// PATCH /nest/1/devices — rename.
pub async fn edit_device(
    State(state): State<AppState>,
    Json(body): Json<DeviceRequest>,
) -> Result<Response, ServerError> {
    let name = body.device_name.unwrap_or_default();
    if name.is_empty() {
        return Err(ServerError::BadRequest("device_name required".into()));
    }
    state
        .store()
        .rename_device(&DeviceId::new(body.device_identifier), &name)?;
    Ok(StatusCode::OK.into_response())
}

/// DELETE /nest/1/devices
pub async fn delete_device(
    State(state): State<AppState>,
    Json(body): Json<DeviceRequest>,
) -> Result<Response, ServerError> {
    state
        .store()
        .remove_device(&DeviceId::new(body.device_identifier))?;
    Ok(StatusCode::OK.into_response())
}

/// GET /nest/1/backup — the raw encrypted database.
pub async fn download_backup(State(state): State<AppState>) -> Result<Response, ServerError> {
    let data = state
        .store()
        .get_backup_data(&state.user())
        .ok_or_else(|| ServerError::NotFound("No backup found".into()))?;

    Ok((
        StatusCode::OK,
        [
            ("Content-Type", "application/octet-stream".to_string()),
            ("Content-Length", data.len().to_string()),
        ],
        Body::from(data),
    )
        .into_response())
}

/// Form fields of a backup range upload.
#[derive(Debug, Default)]
struct BackupRangeForm {
    chunk: Option<Bytes>,
    file_hash: Option<String>,
    last_modify_ts: Option<i64>,
    compression: Option<String>,
    total_size: Option<u64>,
    upload_id: Option<String>,
}

impl BackupRangeForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ServerError> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ServerError::BadRequest(format!("invalid multipart body: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "chunk_data" {
                let chunk = field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("invalid chunk_data: {e}")))?;
                form.chunk = Some(chunk);
                continue;
            }

            let value = field
                .text()
                .await
                .map_err(|e| ServerError::BadRequest(format!("invalid field '{name}': {e}")))?;
            match name.as_str() {
                "file_hash" => form.file_hash = Some(value),
                "last_modify_ts" => form.last_modify_ts = Some(parse_field(&name, &value)?),
                "compression" => form.compression = Some(value),
                "total_size" => form.total_size = Some(parse_field(&name, &value)?),
                "upload_id" => form.upload_id = Some(value).filter(|v| !v.is_empty()),
                _ => debug!(field = %name, "ignoring unknown form field"),
            }
        }
        Ok(form)
    }
}

fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ServerError> {
    value
        .trim()
        .parse()
        .map_err(|_| ServerError::Unprocessable(format!("invalid value for '{name}': {value}")))
}

fn required<T>(value: Option<T>, name: &str) -> Result<T, ServerError> {
    value.ok_or_else(|| ServerError::Unprocessable(format!("missing form field '{name}'")))
}

/// POST /nest/1/backup/range — one byte range of a backup.
///
/// Answers 206 with the session id while the upload is incomplete and 200
/// with the new metadata once the backup is committed. Without a parseable
/// `Content-Range` header the chunk is taken as the whole backup.
pub async fn upload_backup_range(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, ServerError> {
    let form = BackupRangeForm::read(multipart).await?;
    let chunk = required(form.chunk, "chunk_data")?;
    let file_hash = required(form.file_hash, "file_hash")?;
    let last_modify_ts = required(form.last_modify_ts, "last_modify_ts")?;
    let total_size = required(form.total_size, "total_size")?;
    let compression = form
        .compression
        .unwrap_or_else(|| DEFAULT_COMPRESSION.to_string());

    let range = headers
        .get("Content-Range")
        .and_then(|v| v.to_str().ok())
        .and_then(ContentRange::parse);
    if let Some(range) = range {
        if range.total != total_size {
            debug!(
                header_total = range.total,
                form_total = total_size,
                "content-range total differs from form"
            );
        }
    }
    debug!(
        bytes = chunk.len(),
        ?range,
        upload_id = form.upload_id.as_deref().unwrap_or("-"),
        client_hash = %file_hash,
        "backup range received"
    );

    let fragment = match range {
        Some(range) => Fragment::from_range(chunk, range, last_modify_ts, compression),
        None => Fragment::whole(chunk, last_modify_ts, compression),
    };
    let upload_id = form.upload_id.map(UploadId::new);
    let user = state.user();

    // A completing fragment hashes and mirrors the backup; keep that off
    // the async workers.
    let worker = state.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        worker
            .uploads()
            .submit_fragment(upload_id.as_ref(), &user, fragment)
    })
    .await??;

    let response = match outcome {
        FragmentOutcome::InProgress { upload_id } => (
            StatusCode::PARTIAL_CONTENT,
            Json(serde_json::json!({ "upload_id": upload_id })),
        )
            .into_response(),
        FragmentOutcome::Committed { metadata, .. } => {
            (StatusCode::OK, Json(MetadataBody::from(metadata))).into_response()
        }
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;
    use spaetzli_core::{ContentHash, UserId};

    use super::super::test_helpers::*;

    fn range_fields<'a>(total: &'a str, upload_id: Option<&'a str>) -> Vec<(&'a str, &'a str)> {
        let mut fields = vec![
            ("file_hash", "ignored"),
            ("last_modify_ts", "1700000000"),
            ("compression", "zlib"),
            ("total_size", total),
        ];
        if let Some(id) = upload_id {
            fields.push(("upload_id", id));
        }
        fields
    }

    #[tokio::test]
    async fn limits_are_flattened() {
        let (router, state, _tmp) = setup_app(10);
        let resp = authed_get(router, "/nest/1/limits").await;
        assert_status(&resp, StatusCode::OK);
        let body = body_json(resp).await;
        let config = &state.inner.config;
        assert_eq!(body["limit_of_devices"], 10);
        assert_eq!(body["history_events_limit"], config.limits.history_events_limit);
        assert_eq!(body["graphs_view"], config.capabilities.graphs_view);
        assert_eq!(body["eth_staked_limit"], 32_000);
    }

    #[tokio::test]
    async fn device_lifecycle() {
        let (router, _state, _tmp) = setup_app(10);
        let device_id = "test-device-abc";

        let resp = authed_json(
            router.clone(),
            "POST",
            "/nest/1/devices/check",
            json!({"device_identifier": device_id}),
        )
        .await;
        assert_status(&resp, StatusCode::NOT_FOUND);

        let resp = authed_json(
            router.clone(),
            "PUT",
            "/nest/1/devices",
            json!({
                "device_identifier": device_id,
                "device_name": "Test Device",
                "platform": "Linux"
            }),
        )
        .await;
        assert_status(&resp, StatusCode::CREATED);

        let resp = authed_json(
            router.clone(),
            "PUT",
            "/nest/1/devices",
            json!({"device_identifier": device_id}),
        )
        .await;
        assert_status(&resp, StatusCode::CONFLICT);

        let resp = authed_json(
            router.clone(),
            "POST",
            "/nest/1/devices/check",
            json!({"device_identifier": device_id}),
        )
        .await;
        assert_status(&resp, StatusCode::OK);

        let resp = authed_get(router.clone(), "/nest/1/devices").await;
        let body = body_json(resp).await;
        assert_eq!(body["limit"], 10);
        assert_eq!(body["devices"].as_array().unwrap().len(), 1);
        assert_eq!(body["devices"][0]["device_identifier"], device_id);
        assert_eq!(body["devices"][0]["platform"], "Linux");

        let resp = authed_json(
            router.clone(),
            "PATCH",
            "/nest/1/devices",
            json!({"device_identifier": device_id, "device_name": "New Name"}),
        )
        .await;
        assert_status(&resp, StatusCode::OK);

        let resp = authed_json(
            router.clone(),
            "PATCH",
            "/nest/1/devices",
            json!({"device_identifier": device_id, "device_name": ""}),
        )
        .await;
        assert_status(&resp, StatusCode::BAD_REQUEST);

        let resp = authed_json(
            router.clone(),
            "DELETE",
            "/nest/1/devices",
            json!({"device_identifier": device_id}),
        )
        .await;
        assert_status(&resp, StatusCode::OK);

        let resp = authed_json(
            router.clone(),
            "DELETE",
            "/nest/1/devices",
            json!({"device_identifier": device_id}),
        )
        .await;
        assert_status(&resp, StatusCode::NOT_FOUND);

        let resp = authed_get(router, "/nest/1/devices").await;
        assert_eq!(body_json(resp).await["devices"], json!([]));
    }

    #[tokio::test]
    async fn device_limit_maps_to_unprocessable() {
        let (router, _state, _tmp) = setup_app(1);

        let resp = authed_json(
            router.clone(),
            "PUT",
            "/nest/1/devices",
            json!({"device_identifier": "first"}),
        )
        .await;
        assert_status(&resp, StatusCode::CREATED);

        let resp = authed_json(
            router,
            "PUT",
            "/nest/1/devices",
            json!({"device_identifier": "second"}),
        )
        .await;
        assert_status(&resp, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(resp).await["detail"], "Device limit (1) exceeded");
    }

    #[tokio::test]
    async fn download_without_backup_is_not_found() {
        let (router, _state, _tmp) = setup_app(10);
        let resp = authed_get(router, "/nest/1/backup").await;
        assert_status(&resp, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn single_range_upload_commits() {
        let (router, state, tmp) = setup_app(10);
        let data = b"encrypted database content";

        let resp = post_backup_range(
            router.clone(),
            data,
            &range_fields("26", None),
            Some("bytes 0-25/26"),
        )
        .await;
        assert_status(&resp, StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data_size"], 26);
        assert_eq!(body["last_modify_ts"], 1_700_000_000);
        assert_eq!(body["data_hash"], ContentHash::compute(data).to_hex());
        assert_eq!(state.uploads().session_count(), 0);

        let resp = authed_get(router, "/nest/1/backup").await;
        assert_status(&resp, StatusCode::OK);
        assert_eq!(body_bytes(resp).await, data);

        let mirrored = tmp.path().join("backups").join("default_backup.bin");
        assert_eq!(std::fs::read(mirrored).unwrap(), data);
        assert!(tmp.path().join("backups").join("default_metadata.json").exists());
    }

    #[tokio::test]
    async fn upload_without_content_range_is_whole_backup() {
        let (router, state, _tmp) = setup_app(10);

        let resp = post_backup_range(router, b"small", &range_fields("5", None), None).await;
        assert_status(&resp, StatusCode::OK);
        assert_eq!(
            state.store().get_backup_data(&UserId::new("default")).unwrap(),
            &b"small"[..]
        );
    }

    #[tokio::test]
    async fn chunked_upload_round_trip() {
        let (router, state, _tmp) = setup_app(10);

        let resp = post_backup_range(
            router.clone(),
            b"AAAA",
            &range_fields("8", None),
            Some("bytes 0-3/8"),
        )
        .await;
        assert_status(&resp, StatusCode::PARTIAL_CONTENT);
        let upload_id = body_json(resp).await["upload_id"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(state.uploads().session_count(), 1);

        let resp = post_backup_range(
            router.clone(),
            b"BBBB",
            &range_fields("8", Some(&upload_id)),
            Some("bytes 4-7/8"),
        )
        .await;
        assert_status(&resp, StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data_size"], 8);
        assert_eq!(body["data_hash"], ContentHash::compute(b"AAAABBBB").to_hex());
        assert_eq!(state.uploads().session_count(), 0);

        let resp = authed_get(router.clone(), "/nest/1/backup").await;
        assert_eq!(body_bytes(resp).await, b"AAAABBBB");

        // The session was consumed by the final fragment.
        let resp = post_backup_range(
            router,
            b"BBBB",
            &range_fields("8", Some(&upload_id)),
            Some("bytes 4-7/8"),
        )
        .await;
        assert_status(&resp, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn three_chunk_upload_keeps_session_until_final() {
        let (router, state, _tmp) = setup_app(10);

        let resp = post_backup_range(
            router.clone(),
            b"aa",
            &range_fields("6", None),
            Some("bytes 0-1/6"),
        )
        .await;
        let upload_id = body_json(resp).await["upload_id"]
            .as_str()
            .unwrap()
            .to_string();

        let resp = post_backup_range(
            router.clone(),
            b"bb",
            &range_fields("6", Some(&upload_id)),
            Some("bytes 2-3/6"),
        )
        .await;
        assert_status(&resp, StatusCode::PARTIAL_CONTENT);
        assert_eq!(body_json(resp).await["upload_id"], upload_id.as_str());

        let resp = post_backup_range(
            router,
            b"cc",
            &range_fields("6", Some(&upload_id)),
            Some("bytes 4-5/6"),
        )
        .await;
        assert_status(&resp, StatusCode::OK);
        assert_eq!(
            state.store().get_backup_data(&UserId::new("default")).unwrap(),
            &b"aabbcc"[..]
        );
    }

    #[tokio::test]
    async fn unknown_upload_id_is_not_found() {
        let (router, state, _tmp) = setup_app(10);

        let resp = post_backup_range(
            router,
            b"AAAA",
            &range_fields("8", Some("missing-session")),
            Some("bytes 0-3/8"),
        )
        .await;
        assert_status(&resp, StatusCode::NOT_FOUND);
        assert!(state
            .store()
            .get_backup_metadata(&UserId::new("default"))
            .is_none());
    }

    #[tokio::test]
    async fn missing_form_field_is_rejected() {
        let (router, _state, _tmp) = setup_app(10);

        let resp = post_backup_range(
            router,
            b"AAAA",
            &[("file_hash", "x"), ("total_size", "4")],
            Some("bytes 0-3/4"),
        )
        .await;
        assert_status(&resp, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
