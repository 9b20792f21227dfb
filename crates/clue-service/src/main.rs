use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use clue_api::{BlobUpload, ClueApi, ListQuery, DEFAULT_AUTH_TOKEN, UPLOAD_FIELD};
use clue_core::{Clue, ClueError};
use clue_store_memory::MemoryStore;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

const SUCCESS_CODE: i32 = 0;
const ERROR_CODE: i32 = -1000;
const SUCCESS: &str = "success";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: ClueApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    code: i32,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    code: i32,
    error: String,
    #[serde(skip)]
    status: StatusCode,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "clue-service")]
#[command(about = "HTTP service for clue records and file uploads")]
struct Args {
    #[arg(long, env = "CLUE_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,
    #[arg(long, env = "CLUE_UPLOAD_DIR", default_value = ".")]
    upload_dir: PathBuf,
    #[arg(long, env = "CLUE_AUTH_TOKEN", default_value = DEFAULT_AUTH_TOKEN, hide_env_values = true)]
    auth_token: String,
    #[arg(long, env = "CLUE_MAX_UPLOAD_BYTES", default_value_t = 32 * 1024 * 1024)]
    max_upload_bytes: usize,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceError {
    fn new(message: impl Into<String>) -> Self {
        Self { code: ERROR_CODE, error: message.into(), status: StatusCode::BAD_REQUEST }
    }
}

impl From<ClueError> for ServiceError {
    fn from(err: ClueError) -> Self {
        tracing::debug!(kind = err.kind(), error = %err, "request failed");
        Self::new(err.to_string())
    }
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.body_text())
    }
}

impl From<QueryRejection> for ServiceError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(rejection.body_text())
    }
}

impl From<MultipartRejection> for ServiceError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::new(rejection.body_text())
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope { code: SUCCESS_CODE, data }
}

fn success() -> Json<ServiceEnvelope<&'static str>> {
    Json(envelope(SUCCESS))
}

fn app(state: ServiceState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/openapi", get(openapi))
        .route("/clues", get(clue_list).post(create_clue))
        .route("/clues/:id", get(clue_info).put(update_clue).delete(delete_clue))
        .route("/blob", post(upload_file))
        .fallback(fallback)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    std::fs::create_dir_all(&args.upload_dir)
        .with_context(|| format!("failed to create upload dir {}", args.upload_dir.display()))?;

    let api = ClueApi::new(Arc::new(MemoryStore::new()), args.auth_token, args.upload_dir.clone());
    let state = ServiceState { api };
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    tracing::info!(
        bind = %args.bind,
        upload_dir = %args.upload_dir.display(),
        version = env!("CARGO_PKG_VERSION"),
        "clue service listening"
    );
    axum::serve(listener, app(state, args.max_upload_bytes))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("clue service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [(header::CONTENT_TYPE, "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn fallback() -> ServiceError {
    ServiceError { status: StatusCode::NOT_FOUND, ..ServiceError::new("route not found") }
}

async fn create_clue(
    State(state): State<ServiceState>,
    payload: Result<Json<Clue>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<&'static str>>, ServiceError> {
    let Json(clue) = payload?;
    state.api.create_clue(clue)?;
    Ok(success())
}

async fn clue_list(
    State(state): State<ServiceState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ServiceEnvelope<Vec<Clue>>>, ServiceError> {
    let Query(query) = query?;
    let clues = state.api.list_clues(&query)?;
    Ok(Json(envelope(clues)))
}

async fn clue_info(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<ServiceEnvelope<Clue>>, ServiceError> {
    let clue = state.api.clue_info(&id)?;
    Ok(Json(envelope(clue)))
}

async fn update_clue(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    payload: Result<Json<Clue>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<&'static str>>, ServiceError> {
    let Json(clue) = payload?;
    state.api.update_clue(&id, clue)?;
    Ok(success())
}

async fn delete_clue(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ServiceEnvelope<&'static str>>, ServiceError> {
    let authorization = headers.get(header::AUTHORIZATION).and_then(|value| value.to_str().ok());
    state.api.delete_clue(authorization, &id)?;
    Ok(success())
}

async fn upload_file(
    State(state): State<ServiceState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ServiceEnvelope<BTreeMap<String, String>>>, ServiceError> {
    let mut multipart = multipart?;
    let mut batch = state.api.begin_upload();
    // Any early return drops `batch`, which removes the files it already wrote.
    store_parts(&mut multipart, &mut batch).await?;
    let files = batch.finish()?;
    Ok(Json(envelope(files)))
}

async fn store_parts(multipart: &mut Multipart, batch: &mut BlobUpload) -> Result<(), ClueError> {
    while let Some(mut field) = multipart.next_field().await.map_err(read_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        // A part without a file name is a form value, not a file.
        let Some(original) = field.file_name().filter(|name| !name.is_empty()).map(str::to_string)
        else {
            continue;
        };

        let mut writer = batch.create(&original)?;
        tracing::debug!(original = %original, stored = writer.stored_name(), "receiving upload part");
        while let Some(chunk) = field.chunk().await.map_err(read_error)? {
            writer.write_chunk(&chunk)?;
        }
        batch.complete(writer)?;
    }
    Ok(())
}

fn read_error(err: axum::extract::multipart::MultipartError) -> ClueError {
    ClueError::io("read upload part", std::io::Error::other(err.to_string()))
}
