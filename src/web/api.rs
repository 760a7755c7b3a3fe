use crate::video::recorder::{fourcc_from_tag, RecorderCommand};
use crate::web::server::StreamState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_CODEC: &str = "MJPG";

#[derive(Deserialize, Default)]
pub struct ScreenshotRequest {
    pub path: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct StartRecordingRequest {
    pub path: Option<String>,
    pub codec: Option<String>,
}

/// Schedule a one-shot write of the next frame to an image file.
pub async fn take_screenshot(
    State(state): State<Arc<StreamState>>,
    body: Option<Json<ScreenshotRequest>>,
) -> Result<Json<Value>, StatusCode> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let path = request
        .path
        .map(PathBuf::from)
        .unwrap_or_else(|| timestamped_name("screenshot", "png"));

    send_command(&state, RecorderCommand::Screenshot(path.clone()))?;
    Ok(Json(json!({ "screenshot": path })))
}

/// Begin a continuous video recording session.
pub async fn start_recording(
    State(state): State<Arc<StreamState>>,
    body: Option<Json<StartRecordingRequest>>,
) -> Result<Json<Value>, StatusCode> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let codec = request.codec.as_deref().unwrap_or(DEFAULT_CODEC);
    let fourcc = fourcc_from_tag(codec).map_err(|e| {
        tracing::warn!("rejected recording request: {e}");
        StatusCode::BAD_REQUEST
    })?;
    let path = request
        .path
        .map(PathBuf::from)
        .unwrap_or_else(|| timestamped_name("recording", "avi"));

    send_command(
        &state,
        RecorderCommand::StartRecording {
            path: path.clone(),
            fourcc,
        },
    )?;
    Ok(Json(json!({ "recording": path, "codec": codec })))
}

/// End the active recording session, if any.
pub async fn stop_recording(
    State(state): State<Arc<StreamState>>,
) -> Result<Json<Value>, StatusCode> {
    send_command(&state, RecorderCommand::StopRecording)?;
    Ok(Json(json!({ "recording": Value::Null })))
}

fn send_command(state: &StreamState, command: RecorderCommand) -> Result<(), StatusCode> {
    state.recorder.send(command).map_err(|_| {
        tracing::warn!("recorder channel closed, rejecting control request");
        StatusCode::SERVICE_UNAVAILABLE
    })
}

fn timestamped_name(prefix: &str, ext: &str) -> PathBuf {
    PathBuf::from(format!(
        "{prefix}-{}.{ext}",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ))
}
