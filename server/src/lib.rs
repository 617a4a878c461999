use anyhow::{Context, Result};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use linkrec_core::engine::RunSummary;
use linkrec_core::{EngineError, JsonSource, LinkEngine, SettingsUpdate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchParams {
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
}
fn default_batch_size() -> i64 { 10 }

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationParams {
    #[serde(default)]
    pub page_id: String,
    pub limit: Option<usize>,
    pub min_similarity: Option<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub success: bool,
    pub calculated: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub idf_terms: usize,
    pub documents: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<LinkEngine>,
    pub admin_token: Option<String>,
}

impl AppState {
    pub fn new(engine: Arc<LinkEngine>, admin_token: Option<String>) -> Self {
        Self { engine, admin_token }
    }
}

/// JSON error body `{success: false, message}` with a matching status.
pub struct ApiError(StatusCode, String);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = if err.is_client_error() { StatusCode::BAD_REQUEST } else { StatusCode::INTERNAL_SERVER_ERROR };
        if status.is_server_error() {
            tracing::error!(error = %err, "engine operation failed");
        }
        ApiError(status, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "success": false, "message": self.1 }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub fn open_engine(db: &str, content: &str) -> Result<Arc<LinkEngine>> {
    let source = JsonSource::new(content).with_context(|| format!("opening content source {content}"))?;
    let engine = LinkEngine::open(db, Arc::new(source)).with_context(|| format!("opening index database {db}"))?;
    Ok(Arc::new(engine))
}

pub fn build_app(engine: Arc<LinkEngine>) -> Router {
    let admin_token = std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty());

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    router(AppState::new(engine, admin_token)).layer(cors).layer(TraceLayer::new_for_http())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/index/start", post(start_indexing))
        .route("/index/stats", get(index_stats))
        .route("/index/clear", post(clear_index))
        .route("/index/batch", post(process_batch))
        .route("/index/similarities", post(refresh_similarities))
        .route("/recommendations", get(recommendations))
        .route("/settings", get(get_settings).put(update_settings))
        .with_state(state)
}

/// Run a synchronous engine call off the async executor.
async fn blocking<T, F>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&LinkEngine) -> linkrec_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let engine = state.engine.clone();
    let out = tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, format!("worker failed: {e}")))??;
    Ok(Json(out))
}

async fn start_indexing(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<linkrec_core::indexer::StartIndexingResponse> {
    authorize(&state, &headers)?;
    blocking(&state, |engine| engine.start_indexing()).await
}

async fn index_stats(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<linkrec_core::indexer::IndexStats> {
    authorize(&state, &headers)?;
    blocking(&state, |engine| engine.get_index_stats()).await
}

async fn clear_index(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<linkrec_core::engine::ClearResponse> {
    authorize(&state, &headers)?;
    blocking(&state, |engine| engine.clear_index()).await
}

async fn process_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: std::result::Result<Json<BatchParams>, JsonRejection>,
) -> ApiResult<linkrec_core::indexer::BatchResponse> {
    authorize(&state, &headers)?;
    let Json(params) = params?;
    let batch_size = usize::try_from(params.batch_size)
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ApiError(StatusCode::BAD_REQUEST, "batchSize must be a positive integer".into()))?;
    blocking(&state, move |engine| engine.process_batch(batch_size)).await
}

async fn refresh_similarities(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<RefreshResponse> {
    authorize(&state, &headers)?;
    blocking(&state, |engine| {
        let (idf, sims) = engine.refresh_similarities()?;
        Ok(RefreshResponse {
            success: sims.success,
            calculated: sims.calculated,
            message: sims.message,
            idf_terms: idf.terms,
            documents: idf.documents,
        })
    })
    .await
}

async fn recommendations(
    State(state): State<AppState>,
    params: std::result::Result<Query<RecommendationParams>, QueryRejection>,
) -> ApiResult<linkrec_core::recommend::RecommendationResponse> {
    let Query(params) = params?;
    blocking(&state, move |engine| engine.get_similar_content(&params.page_id, params.limit, params.min_similarity)).await
}

async fn get_settings(State(state): State<AppState>) -> ApiResult<linkrec_core::Settings> {
    blocking(&state, |engine| engine.settings()).await
}

async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    update: std::result::Result<Json<SettingsUpdate>, JsonRejection>,
) -> ApiResult<linkrec_core::Settings> {
    authorize(&state, &headers)?;
    let Json(update) = update?;
    blocking(&state, move |engine| engine.update_settings(&update)).await
}

/// Index in the background once at start-up, for installs with `auto_index` on.
pub fn spawn_auto_index(engine: Arc<LinkEngine>, batch_size: usize) -> tokio::task::JoinHandle<Option<RunSummary>> {
    tokio::task::spawn_blocking(move || match engine.run_to_completion(batch_size) {
        Ok(summary) => {
            tracing::info!(processed = summary.processed, calculated = summary.similarities.calculated, "auto index finished");
            Some(summary)
        }
        Err(err) => {
            tracing::error!(error = %err, "auto index failed");
            None
        }
    })
}

fn authorize(state: &AppState, headers: &HeaderMap) -> std::result::Result<(), ApiError> {
    let Some(required) = &state.admin_token else { return Ok(()) };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err(ApiError(StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}
