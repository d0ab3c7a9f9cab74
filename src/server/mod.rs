//! Authoritative store server.
//!
//! Serves the board tree over a small REST surface plus server-sent-event
//! subscriptions, persisted in SQLite. Everything under `/api` requires
//! the pre-shared key when one is configured.

mod auth;
mod handlers;
mod repository;

pub use auth::API_KEY_HEADER;
pub use repository::{init_database, init_memory_database, RevisionInfo, TreeChange, TreeRepository};

use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::errors::{AppError, AppErrorWithRevision};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<TreeRepository>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Open the database named by `config` and load the tree.
    pub async fn open(config: Config) -> Result<Self, AppError> {
        let pool = init_database(&config.db_path).await?;
        let repo = TreeRepository::load(pool).await?;
        Ok(Self {
            repo: Arc::new(repo),
            config: Arc::new(config),
        })
    }
}

/// Success response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub revision_id: i64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T, revision_id: i64) -> Self {
        Self {
            success: true,
            data,
            revision_id,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, AppErrorWithRevision>;

pub fn success<T: Serialize>(data: T, revision_id: i64) -> ApiResult<T> {
    Ok(ApiResponse::new(data, revision_id))
}

pub fn error<T: Serialize>(err: AppError, revision_id: i64) -> ApiResult<T> {
    Err(AppErrorWithRevision {
        error: err,
        revision_id,
    })
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let psk = state.config.api_psk.clone();

    let api_routes = Router::new()
        .route("/revision", get(handlers::get_revision))
        .route("/tree", get(handlers::get_root))
        .route("/tree/{*path}", get(handlers::get_node))
        .route("/tree/{*path}", put(handlers::put_node))
        .route("/tree/{*path}", delete(handlers::delete_node))
        .route("/subscribe/{*path}", get(handlers::subscribe))
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required); clients probe it for connectivity.
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
