use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use crate::server::routes::generate::generate;
use crate::server::routes::output::{health, serve_video};
use crate::server::state::AppState;

mod generate;
mod output;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/generate", get(generate))
        .route("/output/videos/{name}", get(serve_video))
        .route("/health", get(health))
}
