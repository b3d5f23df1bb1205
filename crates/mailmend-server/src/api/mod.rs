//! HTTP API for invoking repair sessions.

pub mod repair;

use axum::Router;

use crate::AppState;

pub fn router(_state: AppState) -> Router<AppState> {
    Router::new().nest("/repair", repair::router())
}
