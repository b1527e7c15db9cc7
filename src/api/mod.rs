use std::path::PathBuf;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::Error;
use crate::ftp::FtpError;
use crate::installer::{ConnectRequest, InstallerManager, UploadRequest};

pub fn routes() -> Router<InstallerManager> {
    Router::new()
        .route("/status", get(get_status))
        .route("/volumes", get(get_volumes))
        .route("/connect", post(connect))
        .route("/local", post(open_local))
        .route("/disconnect", post(disconnect))
        .route("/scan", post(scan))
        .route("/refresh", post(refresh))
        .route("/upload", post(upload))
        .route("/cancel", post(cancel))
        .route("/logs", get(get_logs))
}

/// Maps manager failures onto HTTP status codes.
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<Error>() {
            Some(Error::Busy) | Some(Error::NoBackend) => StatusCode::CONFLICT,
            Some(Error::InvalidRequest(_)) | Some(Error::Ftp(FtpError::InvalidConfig(_))) => {
                StatusCode::BAD_REQUEST
            }
            Some(Error::Ftp(_)) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn get_status(State(manager): State<InstallerManager>) -> Json<serde_json::Value> {
    let status = manager.status().await;
    Json(json!(status))
}

#[derive(Serialize)]
struct VolumeView {
    path: String,
    label: String,
    removable: bool,
    free: String,
    total: String,
}

async fn get_volumes(State(manager): State<InstallerManager>) -> ApiResult<Vec<VolumeView>> {
    let volumes = manager.volumes().await?;
    Ok(Json(
        volumes
            .into_iter()
            .map(|v| VolumeView {
                path: v.path.display().to_string(),
                label: v.label,
                removable: v.is_removable,
                free: format_bytes(v.available_bytes),
                total: format_bytes(v.total_bytes),
            })
            .collect(),
    ))
}

async fn connect(
    State(manager): State<InstallerManager>,
    Json(req): Json<ConnectRequest>,
) -> ApiResult<serde_json::Value> {
    let status = manager.connect(req).await?;
    Ok(Json(json!({ "status": "ok", "backend": status })))
}

#[derive(Deserialize)]
struct LocalRequest {
    path: PathBuf,
}

async fn open_local(
    State(manager): State<InstallerManager>,
    Json(req): Json<LocalRequest>,
) -> ApiResult<serde_json::Value> {
    let status = manager.open_local(req.path).await?;
    Ok(Json(json!({ "status": "ok", "backend": status })))
}

async fn disconnect(State(manager): State<InstallerManager>) -> ApiResult<serde_json::Value> {
    manager.disconnect().await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn scan(State(manager): State<InstallerManager>) -> ApiResult<serde_json::Value> {
    let locations = manager.scan().await?;
    Ok(Json(json!({ "count": locations.len(), "locations": locations })))
}

#[derive(Deserialize)]
struct RefreshRequest {
    path: String,
}

async fn refresh(
    State(manager): State<InstallerManager>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<serde_json::Value> {
    let location = manager.refresh(req.path).await?;
    Ok(Json(json!(location)))
}

async fn upload(
    State(manager): State<InstallerManager>,
    Json(req): Json<UploadRequest>,
) -> ApiResult<serde_json::Value> {
    let operation_id = manager.upload(req).await?;
    Ok(Json(json!({ "status": "started", "operation_id": operation_id })))
}

async fn cancel(State(manager): State<InstallerManager>) -> Json<serde_json::Value> {
    let cancelled = manager.cancel();
    Json(json!({ "cancelled": cancelled }))
}

#[derive(Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

async fn get_logs(
    State(manager): State<InstallerManager>,
    Query(query): Query<LogsQuery>,
) -> Json<serde_json::Value> {
    let logs: Vec<_> = manager
        .logs(Some(query.limit.unwrap_or(100)))
        .into_iter()
        .map(|log| {
            json!({
                "timestamp": chrono::DateTime::from_timestamp(log.timestamp, 0)
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_else(|| log.timestamp.to_string()),
                "level": log.level,
                "message": log.message,
                "location": log.location,
            })
        })
        .collect();
    Json(json!({ "logs": logs }))
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1_048_576 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1_073_741_824 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else {
        format!("{:.2} GB", bytes as f64 / 1_073_741_824.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(8192), "8.0 KB");
        assert_eq!(format_bytes(5 * 1_073_741_824), "5.00 GB");
    }

    #[test]
    fn test_error_status_codes() {
        let busy = ApiError(Error::Busy.into()).into_response();
        assert_eq!(busy.status(), StatusCode::CONFLICT);

        let invalid = ApiError(Error::from(FtpError::InvalidConfig("Host is required".into())).into())
            .into_response();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let other = ApiError(anyhow::anyhow!("boom")).into_response();
        assert_eq!(other.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
