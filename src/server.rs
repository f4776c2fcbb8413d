use crate::error::{classify, PipelineError};
use crate::pipeline::Pipeline;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    username: Option<String>,
}

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/api/analyze", post(api_analyze))
        .route("/health", get(health))
        .with_state(pipeline)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn error_response(err: &PipelineError) -> Response {
    let classification = classify(err);
    (
        classification.status,
        Json(serde_json::json!({
            "error": classification.message,
            "details": err.message,
        })),
    )
        .into_response()
}

fn bad_request(details: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": "username is required",
            "details": details,
        })),
    )
        .into_response()
}

async fn api_analyze(
    State(pipeline): State<Arc<Pipeline>>,
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Response {
    // Credential check comes first so a misconfigured server fails every request alike.
    if let Err(e) = pipeline.ensure_configured() {
        return error_response(&e);
    }

    let username = match body {
        Ok(Json(req)) => req.username,
        Err(rejection) => return bad_request(&rejection.body_text()),
    };
    let Some(username) = username.filter(|u| !u.trim().is_empty()) else {
        return bad_request("missing 'username' field");
    };

    match pipeline.run(&username).await {
        Ok(scored) => Json(scored).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
