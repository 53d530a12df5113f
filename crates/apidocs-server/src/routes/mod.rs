//! Route definitions for the HTTP API.

pub mod health;
pub mod index;
pub mod services;
pub mod swaggers;

use axum::{Router, http::Uri};

use crate::error::ApiError;
use crate::state::AppState;

/// Build the complete router with all routes.
///
/// Documentation routes live under the configured base path.
pub fn build_router(state: AppState) -> Router {
    let base = state.config().base_path();
    Router::new()
        .merge(health::routes())
        .merge(index::routes(&base))
        .merge(services::routes(&base))
        .merge(swaggers::routes(&base))
        .fallback(not_found)
        .with_state(state)
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("route {}", uri.path()))
}
