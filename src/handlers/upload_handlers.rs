//! HTTP handlers for video and thumbnail uploads.
//! The file part is streamed straight into the ingest pipeline; nothing is
//! buffered in memory beyond a single multipart chunk.

use crate::{
    errors::{AppError, PipelineError},
    models::{asset::AssetKind, video::Video},
    services::pipeline::Upload,
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::{HeaderMap, StatusCode},
};
use futures::StreamExt;
use std::io;
use uuid::Uuid;

/// `POST /api/video_upload/{video_id}` with a multipart `video` field.
pub async fn upload_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<Video>, AppError> {
    upload(state, AssetKind::Video, &video_id, &headers, multipart).await
}

/// `POST /api/thumbnail_upload/{video_id}` with a multipart `thumbnail` field.
pub async fn upload_thumbnail(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<Video>, AppError> {
    upload(state, AssetKind::Thumbnail, &video_id, &headers, multipart).await
}

pub fn parse_video_id(raw: &str) -> Result<Uuid, PipelineError> {
    Uuid::parse_str(raw).map_err(|_| PipelineError::MalformedRequest("invalid video id".into()))
}

async fn upload(
    state: AppState,
    kind: AssetKind,
    raw_id: &str,
    headers: &HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Video>, AppError> {
    let video_id = parse_video_id(raw_id)?;
    let user_id = state.auth.authenticate(headers)?;

    let field_name = kind.form_field();
    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|err| PipelineError::MalformedRequest(format!("unable to parse form: {err}")))?
            .ok_or_else(|| PipelineError::MalformedRequest(format!("missing `{field_name}` file field")))?;

        if field.name() != Some(field_name) {
            tracing::debug!(field = ?field.name(), "skipping unrelated form field");
            continue;
        }

        let upload = Upload {
            content_type: field.content_type().map(str::to_string),
            body: field.map(|chunk| chunk.map_err(multipart_io_error)),
        };
        let video = state
            .pipeline
            .ingest(user_id, video_id, kind, upload)
            .await?;
        return Ok(Json(video));
    }
}

/// Keep the cause visible to the stager: oversize bodies stay oversize,
/// everything else is a malformed request body.
fn multipart_io_error(err: MultipartError) -> io::Error {
    let kind = if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        io::ErrorKind::FileTooLarge
    } else {
        io::ErrorKind::InvalidData
    };
    io::Error::new(kind, err)
}
