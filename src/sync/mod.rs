use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub mod dto;
pub mod engine;
pub mod handlers;
pub mod store;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/forest", get(handlers::fetch_forest))
        .route("/sync", post(handlers::sync_forest))
}
