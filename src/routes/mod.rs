//! Route modules for the rehost server

pub mod health;
pub mod proxy;
pub mod tasks;
pub mod upload;

use axum::{routing::get, Router};

use crate::state::AppState;

/// All HTTP routes, without middleware layers
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .merge(upload::router(&state))
        .nest("/api/v1", tasks::router().merge(proxy::router()))
        .with_state(state)
}
