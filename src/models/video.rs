//! Represents a video record and the references attached to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A video's metadata record.
///
/// The record is owned by exactly one user. Uploaded media never lives in this
/// row; only the public reference produced by a publisher is stored here.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Video {
    /// Stable identifier, also the path parameter of the upload routes.
    pub id: Uuid,

    /// ID of the user who owns this record.
    pub user_id: Uuid,

    pub title: String,

    pub description: Option<String>,

    /// URL or `data:` URL of the thumbnail, once one has been published.
    pub thumbnail_url: Option<String>,

    /// URL of the published video, once one has been published.
    pub video_url: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}
