//! REST surface under `/api`.
//!
//! | Route | Handler |
//! |---|---|
//! | `GET /api/config` | validated configuration |
//! | `GET /api/sensors` | cache snapshot |
//! | `GET /api/files` | default upload directory listing |
//! | `DELETE /api/delete/{filename}` | delete from the default upload directory |
//! | `GET /api/system` | host metrics, also pushed as `system_update` |
//! | `POST /api/upload` | multipart upload |
//! | `POST /api/download` | file stream, or JSON error |
//! | `POST /api/action` | publish a button action |
//! | `GET /api/browse` | immediate children of a download root path |
//!
//! Every failure is a [`BridgeError`] rendered at this boundary with a
//! status code and `success: false`.

use std::collections::BTreeMap;
use std::path::Path as FsPath;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tabbridge_kernel::{BrowseListing, DownloadTarget, FileEntry, StagedUpload};
use tabbridge_middleware::{ActionDispatcher, HubEvent};
use tabbridge_types::{BridgeError, Configuration, SensorReading};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::server::AppState;
use crate::system::SystemStats;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/config", get(get_config))
        .route("/api/sensors", get(get_sensors))
        .route("/api/files", get(list_files))
        .route("/api/delete/{filename}", delete(delete_file))
        .route("/api/system", get(get_system))
        .route("/api/upload", post(upload))
        .route("/api/download", post(download))
        .route("/api/action", post(action))
        .route("/api/browse", get(browse))
}

// ---------------------------------------------------------------------------
// Error rendering
// ---------------------------------------------------------------------------

pub fn status_for(err: &BridgeError) -> StatusCode {
    match err {
        BridgeError::Validation(_) => StatusCode::BAD_REQUEST,
        BridgeError::NotFound(_) => StatusCode::NOT_FOUND,
        BridgeError::AccessDenied => StatusCode::FORBIDDEN,
        BridgeError::BrokerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        BridgeError::Decode(_) | BridgeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `{success:false, error}` with the mapped status.
#[derive(Debug)]
pub struct ApiError(pub BridgeError);

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        } else {
            debug!(error = %self.0, "request rejected");
        }
        (status, Json(json!({"success": false, "error": self.0.to_string()}))).into_response()
    }
}

/// Body of upload responses and download errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub filename: String,
    pub success: bool,
    pub error: String,
}

impl FileOutcome {
    fn respond(filename: &str, result: Result<(), BridgeError>) -> Response {
        match result {
            Ok(()) => {
                let body = Self {
                    filename: filename.to_string(),
                    success: true,
                    error: String::new(),
                };
                (StatusCode::OK, Json(body)).into_response()
            }
            Err(err) => {
                debug!(file = %filename, error = %err, "file request rejected");
                let body = Self {
                    filename: filename.to_string(),
                    success: false,
                    error: err.to_string(),
                };
                (status_for(&err), Json(body)).into_response()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Read-only endpoints
// ---------------------------------------------------------------------------

async fn get_config(State(state): State<AppState>) -> Json<Configuration> {
    Json(state.config.config().clone())
}

async fn get_sensors(State(state): State<AppState>) -> Json<BTreeMap<String, SensorReading>> {
    Json(state.cache.snapshot())
}

async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<FileEntry>>, ApiError> {
    Ok(Json(state.files.list_files().await?))
}

async fn delete_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.files.delete_file(&filename).await?;
    Ok(Json(json!({"success": true})))
}

async fn get_system(State(state): State<AppState>) -> Result<Json<SystemStats>, ApiError> {
    let stats = state.probe.snapshot().await?;
    let data = serde_json::to_value(&stats)
        .map_err(|e| BridgeError::Io(std::io::Error::other(e)))?;
    state.hub.broadcast(HubEvent::SystemUpdate { data });
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
struct BrowseQuery {
    #[serde(default)]
    path: String,
    button_name: Option<String>,
}

async fn browse(
    State(state): State<AppState>,
    Query(query): Query<BrowseQuery>,
) -> Result<Json<BrowseListing>, ApiError> {
    let listing = state
        .files
        .browse(query.button_name.as_deref(), &query.path)
        .await?;
    Ok(Json(listing))
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

#[derive(Default)]
struct UploadForm {
    button_name: Option<String>,
    staged: Option<StagedUpload>,
}

async fn upload(State(state): State<AppState>, multipart: Multipart) -> Response {
    let mut form = UploadForm::default();
    if let Err(err) = read_upload_form(&state.staging_dir, multipart, &mut form).await {
        let filename = match form.staged.take() {
            Some(staged) => {
                remove_staged(&staged.path).await;
                staged.file_name
            }
            None => String::new(),
        };
        return FileOutcome::respond(&filename, Err(err));
    }

    let Some(staged) = form.staged else {
        return FileOutcome::respond(
            "",
            Err(BridgeError::Validation("no file in request".to_string())),
        );
    };
    let requested = staged.file_name.clone();
    match state
        .files
        .finalize_upload(form.button_name.as_deref(), staged)
        .await
    {
        Ok(stored) => FileOutcome::respond(&stored.file_name, Ok(())),
        Err(err) => FileOutcome::respond(&requested, Err(err)),
    }
}

/// Fields may arrive in any order; the file is staged as soon as it is seen.
async fn read_upload_form(
    staging_dir: &FsPath,
    mut multipart: Multipart,
    form: &mut UploadForm,
) -> Result<(), BridgeError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("button_name") => {
                let name = field.text().await.map_err(multipart_error)?;
                let name = name.trim();
                if !name.is_empty() {
                    form.button_name = Some(name.to_string());
                }
            }
            Some("file") => {
                if form.staged.is_some() {
                    return Err(BridgeError::Validation(
                        "only one file per upload".to_string(),
                    ));
                }
                form.staged = Some(stage_field(staging_dir, field).await?);
            }
            other => debug!(field = ?other, "ignoring multipart field"),
        }
    }
    Ok(())
}

async fn stage_field(
    staging_dir: &FsPath,
    mut field: Field<'_>,
) -> Result<StagedUpload, BridgeError> {
    let file_name = field
        .file_name()
        .map(str::to_string)
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| BridgeError::Validation("file name is required".to_string()))?;

    tokio::fs::create_dir_all(staging_dir).await?;
    let path = staging_dir.join(format!("upload-{}.part", Uuid::new_v4().simple()));
    let mut file = tokio::fs::File::create(&path).await?;

    let mut size = 0u64;
    let written: Result<(), BridgeError> = async {
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            file.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(())
    }
    .await;
    drop(file);

    if let Err(err) = written {
        remove_staged(&path).await;
        return Err(err);
    }
    Ok(StagedUpload {
        path,
        file_name,
        size,
    })
}

async fn remove_staged(path: &FsPath) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "failed to remove staged upload");
    }
}

fn multipart_error(err: MultipartError) -> BridgeError {
    BridgeError::Validation(err.body_text())
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    filename: String,
    #[serde(default)]
    button_name: Option<String>,
}

async fn download(
    State(state): State<AppState>,
    body: Result<Json<DownloadRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return FileOutcome::respond(
                "",
                Err(BridgeError::Validation(rejection.body_text())),
            );
        }
    };

    let target = state
        .files
        .resolve_download(request.button_name.as_deref(), &request.filename)
        .await;
    match target {
        Ok(target) => match stream_file(target).await {
            Ok(response) => response,
            Err(err) => FileOutcome::respond(&request.filename, Err(err)),
        },
        Err(err) => FileOutcome::respond(&request.filename, Err(err)),
    }
}

async fn stream_file(target: DownloadTarget) -> Result<Response, BridgeError> {
    let file = tokio::fs::File::open(&target.path).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        target.file_name.replace(['"', '\\'], "_")
    );
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, target.size)
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| BridgeError::Io(std::io::Error::other(e)))
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Echo of the action id.
    pub ack: String,
    pub success: bool,
    pub error: String,
}

/// Shared by `POST /api/action` and WebSocket action messages.
pub async fn run_action(
    dispatcher: &ActionDispatcher,
    request: &ActionRequest,
) -> (StatusCode, ActionOutcome) {
    match dispatcher
        .dispatch(&request.action, request.value.as_ref())
        .await
    {
        Ok(_) => (
            StatusCode::OK,
            ActionOutcome {
                ack: request.action.clone(),
                success: true,
                error: String::new(),
            },
        ),
        Err(err) => {
            debug!(action = %request.action, error = %err, "action rejected");
            (
                status_for(&err),
                ActionOutcome {
                    ack: request.action.clone(),
                    success: false,
                    error: err.to_string(),
                },
            )
        }
    }
}

async fn action(
    State(state): State<AppState>,
    body: Result<Json<ActionRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(request)) => {
            let (status, outcome) = run_action(&state.dispatcher, &request).await;
            (status, Json(outcome)).into_response()
        }
        Err(rejection) => {
            let outcome = ActionOutcome {
                ack: String::new(),
                success: false,
                error: rejection.body_text(),
            };
            (StatusCode::BAD_REQUEST, Json(outcome)).into_response()
        }
    }
}
