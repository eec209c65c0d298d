// Stream Commands
// Launch and control of test-pattern streams

use serde::Serialize;

use crate::commands::timestamp;
use crate::models::StreamSnapshot;
use crate::services::{FFmpegHandler, LaunchError, StreamControlError};

/// Acknowledgement returned once FFmpeg has been spawned.
/// It only proves the launch, not that the ingest accepted the stream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStarted {
    pub message: String,
    pub id: String,
    pub stream_url: String,
    pub duration: String,
    pub timestamp: String,
    pub note: String,
}

/// Launch a test-pattern stream without waiting for it to finish
pub fn start_stream(ffmpeg_handler: &FFmpegHandler) -> Result<StreamStarted, LaunchError> {
    let launched = ffmpeg_handler.start()?;
    let duration = ffmpeg_handler.profile().duration_label();

    Ok(StreamStarted {
        message: "YouTube stream started".to_string(),
        id: launched.id,
        stream_url: launched.target.url().to_string(),
        note: format!("Stream will run for {duration} due to the configured duration limit"),
        duration,
        timestamp: timestamp(),
    })
}

pub fn list_streams(ffmpeg_handler: &FFmpegHandler) -> Vec<StreamSnapshot> {
    ffmpeg_handler.registry().list()
}

pub fn get_stream(ffmpeg_handler: &FFmpegHandler, id: &str) -> Result<StreamSnapshot, StreamControlError> {
    ffmpeg_handler
        .registry()
        .get(id)
        .ok_or_else(|| StreamControlError::NotFound(id.to_string()))
}

pub fn stop_stream(ffmpeg_handler: &FFmpegHandler, id: &str) -> Result<StreamSnapshot, StreamControlError> {
    ffmpeg_handler.stop(id)
}
