pub mod chats;
pub mod devices;
pub mod error;
pub mod middleware;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use murmur_db::Database;
use tracing::error;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub history_page: u32,
}

/// REST routes. Everything except `/health` requires a Bearer token.
pub fn routes(state: AppState) -> Router {
    let protected = Router::new()
        .route("/chats", get(chats::list_chats))
        .route("/chats/delete", post(chats::delete_chats))
        .route("/devices", post(devices::register_device))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state);

    Router::new().route("/health", get(health)).merge(protected)
}

async fn health() -> &'static str {
    "ok"
}

/// Run blocking DB work off the async runtime.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> murmur_db::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.to_string())
        })?
        .map_err(ApiError::from)
}
