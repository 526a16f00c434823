//! Upload validation: declared media type against the per-kind allow-list.
//!
//! Runs before any scratch file exists. The size ceiling is not checked here;
//! it is enforced while staging by capping the inbound stream.

use crate::{
    errors::{PipelineError, PipelineResult},
    models::asset::AssetKind,
};

/// The outcome of a successful validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedUpload {
    /// Media type essence, e.g. `video/mp4`, with parameters stripped.
    pub media_type: String,
    /// File extension derived from the subtype, e.g. `mp4`.
    pub extension: String,
}

/// Parse `declared` and check it against `kind`'s allow-list.
pub fn validate_media_type(kind: AssetKind, declared: Option<&str>) -> PipelineResult<ValidatedUpload> {
    let raw = declared
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PipelineError::MalformedRequest("missing content type".into()))?;

    let parsed: mime::Mime = raw
        .parse()
        .map_err(|err| PipelineError::MalformedRequest(format!("unable to parse media type: {err}")))?;

    let essence = parsed.essence_str().to_ascii_lowercase();
    if !kind.allowed_types().contains(&essence.as_str()) {
        return Err(PipelineError::UnsupportedMediaType(essence));
    }

    Ok(ValidatedUpload {
        extension: parsed.subtype().as_str().to_ascii_lowercase(),
        media_type: essence,
    })
}
