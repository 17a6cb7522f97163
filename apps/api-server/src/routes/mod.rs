mod diary;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use diary_pipeline::{DiaryPipeline, DiaryStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<DiaryPipeline>,
    pub store: Arc<dyn DiaryStore>,
    /// Request body ceiling, replaces axum's 2 MB default for uploads.
    pub max_upload_bytes: usize,
}

pub fn get_routes(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);
    Router::new()
        .route("/", get(|| async { "diary api server" }))
        .nest(
            "/api/v1",
            Router::new()
                .route("/analyze/", post(diary::analyze))
                .route("/generate/", post(diary::generate))
                .route("/diary/", post(diary::create_diary).get(diary::list_diaries))
                .route("/diary/:id", get(diary::get_diary)),
        )
        .layer(body_limit)
        .with_state(state)
}
