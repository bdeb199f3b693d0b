//! Proxy Routes
//!
//! Endpoints:
//! - GET /api/v1/proxy/:token - Verify a proxy token and return its record
//!
//! Fetching the original stays with the edge resolver; this only checks a
//! token's signature and age.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::error::Result;
use crate::proxy::ProxyAddress;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/proxy/:token", get(inspect_token))
}

/// GET /api/v1/proxy/:token
async fn inspect_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ProxyAddress>> {
    let record = state
        .signer()
        .decode(&token, Some(state.config().proxy_max_age()))?;
    Ok(Json(record))
}
