use crate::{inference::InferenceError, server::SharedState};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        tracing::warn!("Inference service call failed: {}", self);
        (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

type ProxyResult = Result<Json<Value>, ProxyError>;

#[instrument(skip(state))]
pub async fn health(State(state): State<SharedState>) -> ProxyResult {
    Ok(Json(state.detector.health().await?))
}

#[instrument(skip(state))]
pub async fn setup(State(state): State<SharedState>) -> ProxyResult {
    Ok(Json(state.detector.setup(None).await?))
}

#[instrument(skip(state, body))]
pub async fn configure(State(state): State<SharedState>, Json(body): Json<Value>) -> ProxyResult {
    Ok(Json(state.detector.setup(Some(body)).await?))
}

#[instrument(skip(state, body))]
pub async fn predict(State(state): State<SharedState>, Json(body): Json<Value>) -> ProxyResult {
    Ok(Json(state.detector.forward("predict", body).await?))
}

#[instrument(skip(state, body))]
pub async fn webhook(State(state): State<SharedState>, Json(body): Json<Value>) -> ProxyResult {
    Ok(Json(state.detector.forward("webhook", body).await?))
}

#[instrument(skip(state, body))]
pub async fn image_exists(
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> ProxyResult {
    Ok(Json(state.detector.forward("image_exists", body).await?))
}
