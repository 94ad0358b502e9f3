use crate::{
    recording::{list_recordings, RecordingError, RecordingFile, RecordingStatus},
    server::SharedState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum RecordingRouteError {
    #[error("Camera {0} not found")]
    UnknownCamera(i64),
    #[error(transparent)]
    Recording(#[from] RecordingError),
    #[error("Failed to list recordings: {0}")]
    Listing(#[from] std::io::Error),
}

impl IntoResponse for RecordingRouteError {
    fn into_response(self) -> Response {
        let status = match &self {
            RecordingRouteError::UnknownCamera(_) => StatusCode::NOT_FOUND,
            RecordingRouteError::Recording(RecordingError::AlreadyRecording(_))
            | RecordingRouteError::Recording(RecordingError::NotRecording(_)) => {
                StatusCode::CONFLICT
            }
            RecordingRouteError::Recording(RecordingError::Connect { .. }) => {
                StatusCode::BAD_GATEWAY
            }
            RecordingRouteError::Recording(_) | RecordingRouteError::Listing(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!("Recording request failed: {}", self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
pub struct RecordingAck {
    camera_id: i64,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<String>,
}

#[derive(Serialize)]
pub struct CameraRecording {
    camera_id: i64,
    recording: bool,
    details: Option<RecordingStatus>,
}

#[derive(Serialize)]
pub struct RecordingListing {
    files: Vec<RecordingFile>,
    active: Vec<RecordingStatus>,
}

fn ensure_camera(state: &SharedState, camera_id: i64) -> Result<(), RecordingRouteError> {
    state
        .cameras
        .get_camera(camera_id)
        .map(|_| ())
        .ok_or(RecordingRouteError::UnknownCamera(camera_id))
}

#[instrument(skip(state))]
pub async fn start_recording(
    State(state): State<SharedState>,
    Path(camera_id): Path<i64>,
) -> Result<Json<RecordingAck>, RecordingRouteError> {
    let camera = state
        .cameras
        .get_camera(camera_id)
        .ok_or(RecordingRouteError::UnknownCamera(camera_id))?;

    let ticket = state.recordings.start(&camera).await?;
    let file = ticket
        .file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());

    tokio::spawn(async move {
        match ticket.task.await {
            Ok(outcome) => tracing::debug!(camera_id, reason = ?outcome.reason, "Recording task joined"),
            Err(e) => tracing::error!(camera_id, "Recording task panicked: {}", e),
        }
    });

    Ok(Json(RecordingAck {
        camera_id,
        status: "recording",
        file,
    }))
}

#[instrument(skip(state))]
pub async fn stop_recording(
    State(state): State<SharedState>,
    Path(camera_id): Path<i64>,
) -> Result<Json<RecordingAck>, RecordingRouteError> {
    ensure_camera(&state, camera_id)?;
    state.recordings.stop(camera_id)?;

    Ok(Json(RecordingAck {
        camera_id,
        status: "stopping",
        file: None,
    }))
}

#[instrument(skip(state))]
pub async fn recording_status(
    State(state): State<SharedState>,
    Path(camera_id): Path<i64>,
) -> Result<Json<CameraRecording>, RecordingRouteError> {
    ensure_camera(&state, camera_id)?;
    let details = state.recordings.status(camera_id);

    Ok(Json(CameraRecording {
        camera_id,
        recording: details.as_ref().is_some_and(|status| status.running),
        details,
    }))
}

pub async fn recordings_index(
    State(state): State<SharedState>,
) -> Result<Json<RecordingListing>, RecordingRouteError> {
    let files = list_recordings(state.recordings.directory()).await?;

    Ok(Json(RecordingListing {
        files,
        active: state.recordings.active(),
    }))
}
