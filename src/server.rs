//! HTTP API server.
//!
//! Exposes papers, users, recommendation feeds and content requests as a
//! JSON API for the web and mobile clients. Generated audio and HTML files
//! are served as static files under `/artifacts`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/papers?category=&limit=` | Latest papers |
//! | `GET`  | `/papers/{id}` | Paper with its content artifacts |
//! | `GET`  | `/papers/{id}/similar?limit=` | Nearest papers by embedding |
//! | `POST` | `/papers/{id}/content` | Queue `{kind, language}` generation |
//! | `POST` | `/users` | Create a user |
//! | `GET`  | `/users/{id}/recommendations?offset=&limit=` | Ranked feed window |
//! | `POST` | `/users/{id}/interactions` | Record `{paper_id, kind}` |
//! | `GET`  | `/users/{id}/library` | Liked and bookmarked papers |
//! | `GET`  | `/artifacts/...` | Generated files |
//!
//! `{id}` on user routes accepts the user id or name.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "limit must be between 1 and 200" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `embeddings_disabled` (400),
//! `enrichment_disabled` (400), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db;
use crate::enrichment;
use crate::get::{get_paper, PaperResponse};
use crate::models::{
    ContentArtifact, ContentKind, Interaction, InteractionKind, Paper, Recommendation, User,
};
use crate::papers;
use crate::recommend;
use crate::users;

const MAX_PAGE: usize = 200;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (wrapped in `Arc` for cheap cloning across handlers).
    pub config: Arc<Config>,
    pub pool: SqlitePool,
}

impl AppState {
    pub fn new(config: Config, pool: SqlitePool) -> Self {
        Self {
            config: Arc::new(config),
            pool,
        }
    }
}

/// Build the router with every route and middleware layer.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let artifacts = ServeDir::new(&state.config.enrichment.artifacts_dir);

    Router::new()
        .route("/health", get(handle_health))
        .route("/papers", get(handle_list_papers))
        .route("/papers/{id}", get(handle_get_paper))
        .route("/papers/{id}/similar", get(handle_similar))
        .route("/papers/{id}/content", post(handle_request_content))
        .route("/users", post(handle_create_user))
        .route("/users/{id}/recommendations", get(handle_recommendations))
        .route("/users/{id}/interactions", post(handle_interaction))
        .route("/users/{id}/library", get(handle_library))
        .nest_service("/artifacts", artifacts)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated. This is the entry point used by `pfeed serve`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    let app = router(AppState::new(config.clone(), pool));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    println!("pfeed server listening on http://{}", bind_addr);

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
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = %self.code, message = %self.message, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

/// Maps core errors to HTTP errors. Core functions signal client errors
/// through their messages ("not found", "invalid ...") so the library does
/// not need a dedicated error type.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let msg = err.to_string();
        if msg.contains("not found") {
            app_error(StatusCode::NOT_FOUND, "not_found", msg)
        } else if msg.contains("no embedding") {
            app_error(StatusCode::BAD_REQUEST, "embeddings_disabled", msg)
        } else if msg.contains("invalid") || msg.contains("must not be empty") {
            bad_request(msg)
        } else {
            app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", msg)
        }
    }
}

fn check_limit(limit: usize, max: usize) -> Result<usize, AppError> {
    if limit == 0 || limit > max {
        return Err(bad_request(format!("limit must be between 1 and {}", max)));
    }
    Ok(limit)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Papers ============

#[derive(Deserialize)]
struct PapersQuery {
    category: Option<String>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct PapersResponse {
    papers: Vec<Paper>,
}

async fn handle_list_papers(
    State(state): State<AppState>,
    Query(q): Query<PapersQuery>,
) -> Result<Json<PapersResponse>, AppError> {
    let limit = check_limit(q.limit.unwrap_or(20), MAX_PAGE)?;
    let category = q.category.as_deref().filter(|c| !c.trim().is_empty());
    let papers = papers::list_latest(&state.pool, category, limit as i64).await?;
    Ok(Json(PapersResponse { papers }))
}

async fn handle_get_paper(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PaperResponse>, AppError> {
    Ok(Json(get_paper(&state.pool, &id).await?))
}

#[derive(Deserialize)]
struct SimilarQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct SimilarResponse {
    papers: Vec<Recommendation>,
}

async fn handle_similar(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<SimilarQuery>,
) -> Result<Json<SimilarResponse>, AppError> {
    if !state.config.embedding.is_enabled() {
        return Err(app_error(
            StatusCode::BAD_REQUEST,
            "embeddings_disabled",
            "embedding provider is disabled",
        ));
    }
    let limit = check_limit(q.limit.unwrap_or(10), MAX_PAGE)?;
    let papers = recommend::similar_papers(&state.pool, &state.config, &id, limit).await?;
    Ok(Json(SimilarResponse { papers }))
}

#[derive(Deserialize)]
struct ContentRequest {
    kind: String,
    language: Option<String>,
}

async fn handle_request_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ContentRequest>,
) -> Result<(StatusCode, Json<ContentArtifact>), AppError> {
    if !state.config.enrichment.is_enabled() {
        return Err(app_error(
            StatusCode::BAD_REQUEST,
            "enrichment_disabled",
            "content enrichment is disabled",
        ));
    }
    let kind: ContentKind = req
        .kind
        .parse()
        .map_err(|e: anyhow::Error| bad_request(e.to_string()))?;
    let language = req
        .language
        .unwrap_or_else(|| state.config.enrichment.default_language.clone());

    let artifact = enrichment::request_content(&state.pool, &id, kind, &language).await?;
    Ok((StatusCode::ACCEPTED, Json(artifact)))
}

// ============ Users ============

#[derive(Deserialize)]
struct CreateUserRequest {
    name: String,
    #[serde(default)]
    categories: Vec<String>,
    language: Option<String>,
}

async fn handle_create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let language = req
        .language
        .unwrap_or_else(|| state.config.enrichment.default_language.clone());
    let user = users::create_user(&state.pool, &req.name, &req.categories, &language).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Deserialize)]
struct FeedQuery {
    offset: Option<usize>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct FeedResponse {
    user_id: String,
    offset: usize,
    limit: usize,
    recommendations: Vec<Recommendation>,
}

async fn handle_recommendations(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<FeedQuery>,
) -> Result<Json<FeedResponse>, AppError> {
    let final_limit = state.config.ranking.final_limit;
    let limit = check_limit(q.limit.unwrap_or(final_limit), final_limit)?;
    let offset = q.offset.unwrap_or(0);

    let user = users::require_user(&state.pool, &id).await?;
    let recommendations =
        recommend::recommend_for_user(&state.pool, &state.config, &user.id, offset, limit).await?;

    Ok(Json(FeedResponse {
        user_id: user.id,
        offset,
        limit,
        recommendations,
    }))
}

#[derive(Deserialize)]
struct InteractionRequest {
    paper_id: String,
    kind: String,
}

async fn handle_interaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<InteractionRequest>,
) -> Result<Json<Interaction>, AppError> {
    let kind: InteractionKind = req
        .kind
        .parse()
        .map_err(|e: anyhow::Error| bad_request(e.to_string()))?;
    let user = users::require_user(&state.pool, &id).await?;
    let interaction = users::record_interaction(&state.pool, &user.id, &req.paper_id, kind).await?;
    Ok(Json(interaction))
}

#[derive(Serialize)]
struct LibraryResponse {
    user_id: String,
    papers: Vec<Paper>,
}

async fn handle_library(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LibraryResponse>, AppError> {
    let user = users::require_user(&state.pool, &id).await?;
    let papers = users::library(&state.pool, &user.id).await?;
    Ok(Json(LibraryResponse {
        user_id: user.id,
        papers,
    }))
}
