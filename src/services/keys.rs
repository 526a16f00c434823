//! Storage key generation: `[category/]token.extension`.

use crate::errors::{PipelineError, PipelineResult};
use rand::{TryRngCore, rngs::OsRng};
use std::fmt;

/// Bytes of OS randomness per key token.
pub const TOKEN_BYTES: usize = 16;

/// An immutable, collision-resistant object key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    /// Build a key from a fresh random token.
    ///
    /// Only the operating system's generator is used; if it is unavailable the
    /// upload fails rather than falling back to a weaker source.
    pub fn generate(category: Option<&str>, extension: &str) -> PipelineResult<Self> {
        let mut raw = [0u8; TOKEN_BYTES];
        OsRng
            .try_fill_bytes(&mut raw)
            .map_err(|err| PipelineError::RandomnessUnavailable(err.to_string()))?;
        Ok(Self::compose(category, &hex::encode(raw), extension))
    }

    fn compose(category: Option<&str>, token: &str, extension: &str) -> Self {
        match category {
            Some(prefix) => Self(format!("{prefix}/{token}.{extension}")),
            None => Self(format!("{token}.{extension}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
