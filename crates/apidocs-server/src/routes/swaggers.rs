//! Per-module documentation content.

use axum::{
    Router,
    extract::{Path, Request, State},
    routing::any,
};

use crate::resolver::Content;
use crate::state::AppState;

/// {base}/swaggers/{module} - File contents, proxied upstream response, or `{}`.
///
/// Any method is accepted so proxied sources see the caller's method.
async fn get_swagger(
    State(state): State<AppState>,
    Path(module): Path<String>,
    request: Request,
) -> Content {
    state.resolver().resolve(&module, request).await
}

/// Build content routes under `base`.
pub fn routes(base: &str) -> Router<AppState> {
    Router::new().route(&format!("{base}/swaggers/{{module}}"), any(get_swagger))
}
