//! Optional post-staging transform: the MP4 fast-start rewrite.
//!
//! The rewrite moves the `moov` atom ahead of the sample data with a stream copy,
//! so audio and video are never re-encoded.

use crate::errors::{PipelineError, PipelineResult};
use async_trait::async_trait;
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use tempfile::TempPath;
use tokio::process::Command;

/// Appended to the input path to name the transform output.
pub const OUTPUT_SUFFIX: &str = ".processing";

#[async_trait]
pub trait MediaTransformer: Send + Sync {
    /// Write a transformed copy of `input` and return it as a scratch file.
    ///
    /// The output must be owned by a `TempPath` before any bytes are written, so
    /// failure and cancellation both remove it.
    async fn transform(&self, input: &Path) -> PipelineResult<TempPath>;
}

pub fn output_path(input: &Path) -> PathBuf {
    let mut name = OsString::from(input.as_os_str());
    name.push(OUTPUT_SUFFIX);
    PathBuf::from(name)
}

/// Fast-start rewrite with the `ffmpeg` executable.
#[derive(Clone, Debug)]
pub struct FastStartTransformer {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl FastStartTransformer {
    pub fn new(program: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    async fn run(&self, input: &Path, output: &Path) -> PipelineResult<()> {
        let run = Command::new(&self.program)
            .arg("-i")
            .arg(input)
            .args(["-c", "copy", "-movflags", "faststart", "-f", "mp4", "-y"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
                PipelineError::TransformFailed(format!("ffmpeg timed out after {limit:?}"))
            })?,
            None => run.await,
        }
        .map_err(|err| PipelineError::TransformFailed(format!("unable to run ffmpeg: {err}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail = stderr.lines().last().unwrap_or_default().trim().to_string();
            return Err(PipelineError::TransformFailed(format!(
                "ffmpeg exited with {}: {}",
                result.status, tail
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaTransformer for FastStartTransformer {
    async fn transform(&self, input: &Path) -> PipelineResult<TempPath> {
        let output = TempPath::try_from_path(output_path(input))?;
        self.run(input, &output).await?;
        Ok(output)
    }
}

/// Write an executable `sh` script standing in for an external tool.
#[cfg(all(test, unix))]
pub(crate) fn stub_program(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::{io::Write, os::unix::fs::PermissionsExt};

    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh\n{body}").unwrap();
    file.sync_all().unwrap();
    drop(file);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
