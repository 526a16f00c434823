//! The kinds of media the pipeline ingests.

use serde::Serialize;

/// Which asset of a video an upload targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Video,
    Thumbnail,
}

const VIDEO_TYPES: &[&str] = &["video/mp4"];
const THUMBNAIL_TYPES: &[&str] = &["image/jpeg", "image/png"];

impl AssetKind {
    /// Name of the multipart field carrying the file.
    pub fn form_field(self) -> &'static str {
        match self {
            AssetKind::Video => "video",
            AssetKind::Thumbnail => "thumbnail",
        }
    }

    /// Media types (essence only, no parameters) accepted for this kind.
    pub fn allowed_types(self) -> &'static [&'static str] {
        match self {
            AssetKind::Video => VIDEO_TYPES,
            AssetKind::Thumbnail => THUMBNAIL_TYPES,
        }
    }

    /// Column of the `videos` table holding this kind's reference.
    pub fn reference_column(self) -> &'static str {
        match self {
            AssetKind::Video => "video_url",
            AssetKind::Thumbnail => "thumbnail_url",
        }
    }
}

/// Byte ceilings per asset kind.
#[derive(Clone, Copy, Debug)]
pub struct UploadLimits {
    pub video: u64,
    pub thumbnail: u64,
}

impl UploadLimits {
    pub fn for_kind(&self, kind: AssetKind) -> u64 {
        match kind {
            AssetKind::Video => self.video,
            AssetKind::Thumbnail => self.thumbnail,
        }
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            video: 1 << 30,
            thumbnail: 10 << 20,
        }
    }
}
