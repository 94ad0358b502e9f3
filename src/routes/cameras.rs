use crate::{camera::CameraRef, server::SharedState};
use axum::{extract::State, response::Json};

pub async fn list_cameras(State(state): State<SharedState>) -> Json<Vec<CameraRef>> {
    Json(state.cameras.list_cameras())
}
