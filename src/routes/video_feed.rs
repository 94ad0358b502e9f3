use crate::{encoder, live::LiveStreamError, live::LiveStreamSession, server::SharedState};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum VideoFeedError {
    #[error("Camera {0} not found")]
    UnknownCamera(i64),
    #[error(transparent)]
    Stream(#[from] LiveStreamError),
    #[error("HTTP builder failed: {0}")]
    HttpBuilder(String),
}

#[instrument(skip(state))]
pub async fn video_feed(
    State(state): State<SharedState>,
    Path(camera_id): Path<i64>,
) -> Result<Response, VideoFeedError> {
    let camera = state
        .cameras
        .get_camera(camera_id)
        .ok_or(VideoFeedError::UnknownCamera(camera_id))?;

    let session = LiveStreamSession::connect(
        state.opener.clone(),
        camera,
        state.detector.clone(),
        state.stream_settings.clone(),
        state.shutdown.child_token(),
    )
    .await?
    .with_metrics(state.metrics.clone());

    let body = Body::from_stream(session.into_stream());

    let response = Response::builder()
        .header(header::CONTENT_TYPE, encoder::CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .map_err(|e| VideoFeedError::HttpBuilder(e.to_string()))?;

    Ok(response)
}

impl IntoResponse for VideoFeedError {
    fn into_response(self) -> Response {
        let status = match &self {
            VideoFeedError::UnknownCamera(_) => StatusCode::NOT_FOUND,
            VideoFeedError::Stream(LiveStreamError::Connect { .. }) => StatusCode::BAD_GATEWAY,
            VideoFeedError::Stream(LiveStreamError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            VideoFeedError::Stream(LiveStreamError::Join(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            VideoFeedError::HttpBuilder(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Video feed failed: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}
