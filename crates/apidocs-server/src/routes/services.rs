//! Module listing consumed by the documentation UI.

use apidocs_core::ServiceEntry;
use axum::{Json, Router, extract::State, routing::get};

use crate::state::AppState;

/// Route prefix the UI resolves listing URLs against.
pub const LISTING_ROUTE_PREFIX: &str = "swaggers";

/// GET {base}/static/services.json - One entry per registered module.
async fn list_services(State(state): State<AppState>) -> Json<Vec<ServiceEntry>> {
    Json(state.registry().list(LISTING_ROUTE_PREFIX))
}

/// Build listing routes under `base`.
pub fn routes(base: &str) -> Router<AppState> {
    Router::new().route(&format!("{base}/static/services.json"), get(list_services))
}
