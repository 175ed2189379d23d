// Route table for the Invoker API

use crate::handlers;
use crate::AppState;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/status", get(handlers::health_check))
        .route(
            "/api/exec/:image_name/:tag",
            get(handlers::exec_get).post(handlers::exec_post),
        )
}
