//! Temporary staging of inbound uploads on scratch storage.
//!
//! A `StagedFile` owns both the open handle and the path of its scratch file.
//! Dropping it closes the handle and then unlinks the file, so every exit from
//! a request (success, error, or a cancelled future) releases the scratch space.

use crate::errors::{PipelineError, PipelineResult};
use bytes::Bytes;
use futures::{Stream, pin_mut};
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
};
use tempfile::TempPath;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::io::StreamReader;

/// Bytes on scratch storage, removed when dropped.
#[derive(Debug)]
pub struct StagedFile {
    // Field order matters: the handle must be dropped before the path unlinks the file.
    file: File,
    path: TempPath,
    content_type: String,
    len: u64,
}

impl StagedFile {
    /// Take ownership of an existing scratch file, e.g. a transform output.
    pub async fn adopt(path: TempPath, content_type: impl Into<String>) -> PipelineResult<Self> {
        let file = File::open(&path).await?;
        let len = file.metadata().await?.len();
        Ok(Self {
            file,
            path,
            content_type: content_type.into(),
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    /// Reposition the read cursor at the start and hand out the handle.
    pub async fn reader(&mut self) -> PipelineResult<&mut File> {
        self.file.seek(SeekFrom::Start(0)).await?;
        Ok(&mut self.file)
    }
}

/// Creates scratch files under a fixed directory.
#[derive(Clone, Debug)]
pub struct Stager {
    dir: PathBuf,
}

impl Stager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Copy `stream` into a fresh scratch file, reading at most `limit` bytes.
    ///
    /// The stream is capped rather than pre-read: one byte past `limit` is enough
    /// to reject the upload. Stream errors of kind `InvalidData` come from a broken
    /// request body and are reported as malformed requests; `FileTooLarge` means an
    /// outer body limit tripped first.
    pub async fn stage<S>(
        &self,
        stream: S,
        content_type: &str,
        extension: &str,
        limit: u64,
    ) -> PipelineResult<StagedFile>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let named = tempfile::Builder::new()
            .prefix("ingest-upload-")
            .suffix(&format!(".{extension}"))
            .tempfile_in(&self.dir)?;
        let (std_file, path) = named.into_parts();
        let mut file = File::from_std(std_file);

        pin_mut!(stream);
        let mut capped = StreamReader::new(stream).take(limit.saturating_add(1));
        let copied = tokio::io::copy(&mut capped, &mut file)
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::InvalidData => PipelineError::MalformedRequest(err.to_string()),
                ErrorKind::FileTooLarge => PipelineError::PayloadTooLarge { limit },
                _ => PipelineError::StorageIo(err),
            })?;
        if copied > limit {
            return Err(PipelineError::PayloadTooLarge { limit });
        }

        file.flush().await?;
        file.seek(SeekFrom::Start(0)).await?;

        tracing::debug!(path = %path.display(), bytes = copied, "staged upload");
        Ok(StagedFile {
            file,
            path,
            content_type: content_type.to_string(),
            len: copied,
        })
    }
}
