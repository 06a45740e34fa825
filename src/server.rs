//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/upload` | Extract base64 files into a session |
//! | `DELETE` | `/sessions/{id}` | Discard a session's uploads |
//! | `POST`   | `/ask` | Answer a question over uploads, paths and lookups |
//! | `POST`   | `/crossref` | Cross-reference a session's uploads |
//! | `GET`    | `/paths` | List configured paths |
//! | `POST`   | `/paths` | Add a configured path |
//! | `POST`   | `/paths/validate` | Check a location without saving it |
//! | `PUT`    | `/paths/{id}` | Replace a configured path |
//! | `DELETE` | `/paths/{id}` | Remove a configured path record |
//! | `POST`   | `/paths/{id}/scan` | Rescan a configured path |
//! | `GET`    | `/paths/search?q=` | Search file names and contents |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `timeout` (408), `internal` (500).
//!
//! A model outage is not an error: `/ask` answers 200 with
//! `"status": "unavailable"`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::assistant::{AskError, AskRequest, AskResponse, Assistant};
use crate::compose::Composer;
use crate::config::Config;
use crate::crossref::{cross_reference_files, render_report};
use crate::extract::extract_upload;
use crate::llm::LlmClient;
use crate::lookup::LookupService;
use crate::models::{ConfiguredPath, CrossReference, FileKind, PathValidation, SearchHit, UploadedFile};
use crate::paths::{PathError, PathIndex};
use crate::session::SessionStore;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    paths: Arc<PathIndex>,
    sessions: Arc<SessionStore>,
    assistant: Arc<Assistant>,
}

impl AppState {
    /// Opens the path store and wires the ask pipeline from `config`.
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let paths = Arc::new(PathIndex::open(config).await?);
        let lookup = Arc::new(LookupService::new(&config.lookup)?);
        let composer = Composer::standard(&config.context, paths.clone(), lookup);
        let llm = LlmClient::from_config(&config.llm)?;

        Ok(Self {
            config: Arc::new(config.clone()),
            paths,
            sessions: Arc::new(SessionStore::new()),
            assistant: Arc::new(Assistant::new(composer, llm)),
        })
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/upload", post(handle_upload))
        .route("/sessions/{id}", delete(handle_delete_session))
        .route("/ask", post(handle_ask))
        .route("/crossref", post(handle_crossref))
        .route("/paths", get(handle_list_paths).post(handle_add_path))
        .route("/paths/validate", post(handle_validate_path))
        .route("/paths/search", get(handle_search_paths))
        .route(
            "/paths/{id}",
            put(handle_update_path).delete(handle_remove_path),
        )
        .route("/paths/{id}/scan", post(handle_scan_path))
        .layer(cors)
        .with_state(state)
}

/// Binds to `[server].bind` and serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::new(config).await?;
    let app = router(state);

    let bind_addr = &config.server.bind;
    info!(%bind_addr, model = %config.llm.provider, "starting server");
    println!("storelens listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "conflict",
        message: message.into(),
    }
}

fn timeout_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::REQUEST_TIMEOUT,
        code: "timeout",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<PathError> for AppError {
    fn from(err: PathError) -> Self {
        match &err {
            PathError::UnknownId(_) => not_found(err.to_string()),
            PathError::Duplicate { .. } => conflict(err.to_string()),
            e if e.is_validation() => bad_request(err.to_string()),
            _ => {
                error!(error = %err, "path store failure");
                internal(err.to_string())
            }
        }
    }
}

impl From<AskError> for AppError {
    fn from(err: AskError) -> Self {
        match err {
            AskError::EmptyQuestion => bad_request(err.to_string()),
            AskError::TimedOut(_) => timeout_error(err.to_string()),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    sessions: usize,
    model_enabled: bool,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.sessions.count().await,
        model_enabled: state.config.llm.is_enabled(),
    })
}

// ============ POST /upload ============

#[derive(Deserialize)]
struct UploadRequest {
    session_id: Option<String>,
    #[serde(default)]
    files: Vec<UploadBody>,
}

#[derive(Deserialize)]
struct UploadBody {
    filename: String,
    content_base64: String,
    kind: Option<String>,
}

#[derive(Serialize)]
struct FileSummary {
    filename: String,
    kind: FileKind,
    size_bytes: usize,
    char_count: usize,
    row_count: usize,
    sheets: Vec<String>,
    headers: Vec<String>,
    parsed: bool,
    error: Option<String>,
    content: String,
}

impl From<&UploadedFile> for FileSummary {
    fn from(f: &UploadedFile) -> Self {
        Self {
            filename: f.filename.clone(),
            kind: f.kind,
            size_bytes: f.size_bytes,
            char_count: f.char_count,
            row_count: f.row_count(),
            sheets: f.sheets.iter().map(|s| s.name.clone()).collect(),
            headers: f
                .sheets
                .first()
                .map(|s| s.headers().to_vec())
                .unwrap_or_default(),
            parsed: f.is_parsed(),
            error: f.parse_error.clone(),
            content: f.extracted_text.clone(),
        }
    }
}

/// Zero files is not an error: the response is `{"status": "nothing_to_do"}`.
async fn handle_upload(
    State(state): State<AppState>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if req.files.is_empty() {
        return Ok(Json(serde_json::json!({ "status": "nothing_to_do" })));
    }

    let mut decoded = Vec::with_capacity(req.files.len());
    for body in req.files {
        if body.filename.trim().is_empty() {
            return Err(bad_request("filename must not be empty"));
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(body.content_base64.trim())
            .map_err(|e| bad_request(format!("{}: invalid base64: {}", body.filename, e)))?;
        let kind = match body.kind.as_deref() {
            None => None,
            Some(k) => Some(
                FileKind::parse(k)
                    .ok_or_else(|| bad_request(format!("{}: unknown file kind '{}'", body.filename, k)))?,
            ),
        };
        decoded.push((body.filename, bytes, kind));
    }

    let uploads = tokio::task::spawn_blocking(move || {
        decoded
            .into_iter()
            .map(|(name, bytes, kind)| extract_upload(&name, bytes, kind))
            .collect::<Vec<_>>()
    })
    .await
    .map_err(|e| internal(format!("extraction task failed: {}", e)))?;

    let summaries: Vec<FileSummary> = uploads.iter().map(FileSummary::from).collect();
    let session_id = state.sessions.add(req.session_id.as_deref(), uploads).await;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "session_id": session_id,
        "files": summaries,
    })))
}

// ============ DELETE /sessions/{id} ============

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !state.sessions.remove(&id).await {
        return Err(not_found(format!("no session with id: {}", id)));
    }
    Ok(Json(serde_json::json!({ "status": "deleted", "session_id": id })))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskBody {
    question: String,
    session_id: Option<String>,
    #[serde(default)]
    file_context: Vec<FileContextBody>,
    #[serde(default = "default_use_paths")]
    use_paths: bool,
}

fn default_use_paths() -> bool {
    true
}

#[derive(Deserialize)]
struct FileContextBody {
    filename: String,
    content: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(body): Json<AskBody>,
) -> Result<Json<AskResponse>, AppError> {
    let mut uploads = match body.session_id.as_deref() {
        Some(id) => state
            .sessions
            .files(id)
            .await
            .ok_or_else(|| not_found(format!("no session with id: {}", id)))?,
        None => Vec::new(),
    };
    uploads.extend(
        body.file_context
            .into_iter()
            .map(|f| extract_upload(&f.filename, f.content.into_bytes(), None)),
    );

    let request = AskRequest {
        question: body.question,
        uploads,
        use_paths: body.use_paths,
    };

    let limit = Duration::from_secs(state.config.server.request_timeout_secs);
    let response = state.assistant.ask_within(&request, limit).await?;

    Ok(Json(response))
}

// ============ POST /crossref ============

#[derive(Deserialize)]
struct CrossrefBody {
    session_id: String,
}

#[derive(Serialize)]
struct CrossrefResponse {
    files: Vec<String>,
    cross_references: Vec<CrossReference>,
    report: String,
}

async fn handle_crossref(
    State(state): State<AppState>,
    Json(body): Json<CrossrefBody>,
) -> Result<Json<CrossrefResponse>, AppError> {
    let uploads = state
        .sessions
        .files(&body.session_id)
        .await
        .ok_or_else(|| not_found(format!("no session with id: {}", body.session_id)))?;

    let refs = cross_reference_files(&uploads);

    Ok(Json(CrossrefResponse {
        files: uploads.iter().map(|f| f.filename.clone()).collect(),
        report: render_report(&refs),
        cross_references: refs,
    }))
}

// ============ /paths ============

#[derive(Deserialize)]
struct PathBody {
    name: String,
    location: String,
    description: Option<String>,
}

#[derive(Deserialize)]
struct ValidateBody {
    location: String,
}

#[derive(Deserialize)]
struct SearchParams {
    q: String,
}

async fn handle_list_paths(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConfiguredPath>>, AppError> {
    Ok(Json(state.paths.list().await?))
}

async fn handle_add_path(
    State(state): State<AppState>,
    Json(body): Json<PathBody>,
) -> Result<(StatusCode, Json<ConfiguredPath>), AppError> {
    let record = state
        .paths
        .add(&body.name, &body.location, body.description.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn handle_validate_path(
    State(state): State<AppState>,
    Json(body): Json<ValidateBody>,
) -> Result<Json<PathValidation>, AppError> {
    Ok(Json(state.paths.validate(&body.location).await?))
}

async fn handle_update_path(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PathBody>,
) -> Result<Json<ConfiguredPath>, AppError> {
    let record = state
        .paths
        .update(&id, &body.name, &body.location, body.description.as_deref())
        .await?;
    Ok(Json(record))
}

async fn handle_remove_path(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConfiguredPath>, AppError> {
    Ok(Json(state.paths.remove(&id).await?))
}

async fn handle_scan_path(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConfiguredPath>, AppError> {
    Ok(Json(state.paths.scan(&id).await?))
}

async fn handle_search_paths(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchHit>>, AppError> {
    if params.q.trim().is_empty() {
        return Err(bad_request("q must not be empty"));
    }
    Ok(Json(state.paths.search(&params.q).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn app(tmp: &TempDir) -> Router {
        let mut config = Config::minimal();
        config.db.path = tmp.path().join("db/storelens.sqlite");
        router(AppState::new(&config).await.unwrap())
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn b64(s: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(s)
    }

    #[tokio::test]
    async fn health_reports_version() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp).await;
        let (status, json) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(json["sessions"], 0);
        assert_eq!(json["model_enabled"], false);
    }

    #[tokio::test]
    async fn empty_upload_is_nothing_to_do() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp).await;
        let (status, json) =
            call(&app, "POST", "/upload", Some(serde_json::json!({ "files": [] }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "nothing_to_do");
    }

    #[tokio::test]
    async fn upload_then_crossref() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp).await;
        let (status, json) = call(
            &app,
            "POST",
            "/upload",
            Some(serde_json::json!({
                "files": [
                    { "filename": "sales.csv", "content_base64": b64("Store-ID,Revenue\nVM_DL_001,100000\n") },
                    { "filename": "inventory.csv", "content_base64": b64("Store-ID,Stock\nVM_DL_001,50\n") },
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["files"][0]["kind"], "csv");
        assert_eq!(json["files"][0]["row_count"], 2);
        assert_eq!(json["files"][0]["headers"], serde_json::json!(["Store-ID", "Revenue"]));
        assert!(json["files"][1]["content"]
            .as_str()
            .unwrap()
            .contains("VM_DL_001,50"));
        let session = json["session_id"].as_str().unwrap().to_string();

        let (status, json) = call(
            &app,
            "POST",
            "/crossref",
            Some(serde_json::json!({ "session_id": session })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let refs = json["cross_references"].as_array().unwrap();
        assert!(refs
            .iter()
            .any(|r| r["kind"] == "store-id" && r["value"] == "VM_DL_001"));
        assert!(json["report"].as_str().unwrap().contains("inventory.csv ↔ sales.csv"));

        let (status, _) = call(&app, "DELETE", &format!("/sessions/{}", session), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, json) = call(&app, "DELETE", &format!("/sessions/{}", session), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn invalid_base64_is_bad_request() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp).await;
        let (status, json) = call(
            &app,
            "POST",
            "/upload",
            Some(serde_json::json!({
                "files": [{ "filename": "a.csv", "content_base64": "***" }]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn nonexistent_path_rejected_and_not_listed() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp).await;
        let missing = tmp.path().join("missing");
        let (status, json) = call(
            &app,
            "POST",
            "/paths",
            Some(serde_json::json!({ "name": "Gone", "location": missing.to_str().unwrap() })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"]["message"].as_str().unwrap().contains("does not exist"));

        let (status, json) = call(&app, "GET", "/paths", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!([]));
    }

    #[tokio::test]
    async fn path_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("master");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("stores.csv"), "store_id,city\nVM_DL_001,Delhi\n").unwrap();
        let app = app(&tmp).await;

        let body = serde_json::json!({ "name": "Master", "location": data.to_str().unwrap() });
        let (status, created) = call(&app, "POST", "/paths", Some(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["file_count"], 1);
        let id = created["id"].as_str().unwrap().to_string();

        let (status, json) = call(&app, "POST", "/paths", Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"]["code"], "conflict");

        std::fs::write(data.join("sales.csv"), "store_id\nVM_DL_001\n").unwrap();
        let (status, json) = call(&app, "POST", &format!("/paths/{}/scan", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["file_count"], 2);

        let (status, json) = call(&app, "GET", "/paths/search?q=delhi", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["file"], "stores.csv");

        let (status, _) = call(&app, "DELETE", &format!("/paths/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, json) = call(&app, "POST", &format!("/paths/{}/scan", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "not_found");
        assert!(data.join("stores.csv").exists());
    }

    #[tokio::test]
    async fn ask_validates_and_degrades() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp).await;

        let (status, json) =
            call(&app, "POST", "/ask", Some(serde_json::json!({ "question": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["message"], "question must not be empty");

        let (status, json) = call(
            &app,
            "POST",
            "/ask",
            Some(serde_json::json!({
                "question": "What sold best?",
                "file_context": [{ "filename": "notes.txt", "content": "SKU-1001 sold 40 units" }],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["sources"][0]["label"], "notes.txt");
    }
}
