//! HTTP handlers for video records and memory-backed assets.

use crate::{
    errors::{AppError, PipelineError},
    handlers::upload_handlers::parse_video_id,
    models::video::Video,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

/// Request body for `POST /api/videos`.
#[derive(Debug, Deserialize)]
pub struct CreateVideoReq {
    pub title: String,
    pub description: Option<String>,
}

/// `POST /api/videos` - create a record owned by the caller.
pub async fn create_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateVideoReq>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = state.auth.authenticate(&headers)?;
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(PipelineError::MalformedRequest("title must not be empty".into()).into());
    }

    let video = state
        .videos
        .create(user_id, title, payload.description.as_deref())
        .await?;
    tracing::info!(video_id = %video.id, %user_id, "created video");
    Ok((StatusCode::CREATED, Json(video)))
}

/// `GET /api/videos/{video_id}` - owner only.
pub async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Video>, AppError> {
    let video_id = parse_video_id(&video_id)?;
    let user_id = state.auth.authenticate(&headers)?;

    match state.videos.get(video_id).await? {
        Some(video) if video.user_id == user_id => Ok(Json(video)),
        _ => Err(PipelineError::Forbidden("user is not the video owner".into()).into()),
    }
}

/// `GET /api/assets/{*key}` - serve an asset from the memory backend.
pub async fn get_memory_asset(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let asset = state
        .memory_assets
        .get(&key)
        .await
        .ok_or_else(|| PipelineError::NotFound(format!("asset `{key}`")))?;

    let mut response = Response::new(Body::from(asset.data));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&asset.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    Ok(response)
}
