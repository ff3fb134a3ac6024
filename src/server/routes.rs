use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info_span, Instrument, Span};

use super::{response::attachment, AppState};
use crate::{
    result::{Error, Result},
    types::{Timestamp, VideoSection},
};

static NEXT_REQUEST: AtomicU64 = AtomicU64::new(1);

fn request_span(route: &'static str) -> Span {
    let id = NEXT_REQUEST.fetch_add(1, Ordering::Relaxed);
    info_span!("request", id, route)
}

fn decode<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| Error::MalformedRequest(rejection.body_text()))
}

#[derive(Debug, Deserialize)]
pub struct FrameRequest {
    pub video_url: String,
    /// Position of the frame, in seconds
    pub time: Timestamp,
}

#[derive(Debug, Deserialize)]
pub struct ClipMergeRequest {
    pub video_urls: Vec<String>,
    pub video_parts: Vec<VideoSection>,
}

/// `GET /`
pub async fn root() -> Json<Value> {
    Json(json!({
        "message": "Video Processing API",
        "endpoints": {
            "POST /extract-frame": "Extract a frame from a video URL at a specific time",
            "POST /clip-and-merge": "Clip sections out of videos and merge them into one video",
            "GET /health": "Health check",
        }
    }))
}

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// `POST /extract-frame`
pub async fn extract_frame(
    State(state): State<AppState>,
    payload: std::result::Result<Json<FrameRequest>, JsonRejection>,
) -> Result<Response> {
    let request = decode(payload)?;

    let png = state
        .frames
        .run(&request.video_url, request.time)
        .instrument(request_span("extract-frame"))
        .await?;

    Ok(attachment("image/png", "frame.png", png))
}

/// `POST /clip-and-merge`
pub async fn clip_and_merge(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ClipMergeRequest>, JsonRejection>,
) -> Result<Response> {
    let request = decode(payload)?;

    let video = state
        .merger
        .run(&request.video_urls, &request.video_parts)
        .instrument(request_span("clip-and-merge"))
        .await?;

    Ok(attachment("video/mp4", "merged_video.mp4", video))
}
