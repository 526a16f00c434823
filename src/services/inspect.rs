//! Media inspection and aspect-ratio classification.
//!
//! `MediaInspector` is the capability seam: the default implementation shells
//! out to `ffprobe`, tests substitute a fixed answer.

use crate::errors::{PipelineError, PipelineResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::{path::Path, path::PathBuf, process::Stdio, time::Duration};
use tokio::process::Command;

/// Accepted distance from an exact 16:9 or 9:16 ratio.
pub const RATIO_TOLERANCE: f64 = 0.01;
const LANDSCAPE_RATIO: f64 = 16.0 / 9.0;
const PORTRAIT_RATIO: f64 = 9.0 / 16.0;

/// Technical properties of the first elementary stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
}

/// Orientation category, used as the storage key prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AspectClass {
    /// 16:9
    Landscape,
    /// 9:16
    Portrait,
    Other,
}

impl AspectClass {
    pub fn as_str(self) -> &'static str {
        match self {
            AspectClass::Landscape => "landscape",
            AspectClass::Portrait => "portrait",
            AspectClass::Other => "other",
        }
    }
}

/// Classify by `width / height`.
///
/// A ratio matches when it lies strictly inside the tolerance band; a distance of
/// exactly `RATIO_TOLERANCE` falls through to the next category. A zero height
/// yields a non-finite ratio and therefore `Other`.
pub fn classify(info: StreamInfo) -> AspectClass {
    let ratio = f64::from(info.width) / f64::from(info.height);
    if (ratio - LANDSCAPE_RATIO).abs() < RATIO_TOLERANCE {
        AspectClass::Landscape
    } else if (ratio - PORTRAIT_RATIO).abs() < RATIO_TOLERANCE {
        AspectClass::Portrait
    } else {
        AspectClass::Other
    }
}

#[async_trait]
pub trait MediaInspector: Send + Sync {
    async fn inspect(&self, path: &Path) -> PipelineResult<StreamInfo>;
}

/// ffprobe JSON output, reduced to what classification needs.
#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

/// Extract the first stream's dimensions from `ffprobe -show_streams` JSON.
pub fn parse_probe_output(stdout: &[u8]) -> PipelineResult<StreamInfo> {
    let probe: ProbeOutput = serde_json::from_slice(stdout)
        .map_err(|err| PipelineError::InspectionFailed(format!("unparseable ffprobe output: {err}")))?;
    let first = probe.streams.first().ok_or(PipelineError::NoStreamData)?;
    Ok(StreamInfo {
        width: first.width.unwrap_or(0),
        height: first.height.unwrap_or(0),
    })
}

/// Inspects files with the `ffprobe` executable.
#[derive(Clone, Debug)]
pub struct FfprobeInspector {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl FfprobeInspector {
    pub fn new(program: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl MediaInspector for FfprobeInspector {
    async fn inspect(&self, path: &Path) -> PipelineResult<StreamInfo> {
        let run = Command::new(&self.program)
            .args(["-v", "error", "-print_format", "json", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
                PipelineError::InspectionFailed(format!("ffprobe timed out after {limit:?}"))
            })?,
            None => run.await,
        }
        .map_err(|err| PipelineError::InspectionFailed(format!("unable to run ffprobe: {err}")))?;

        if !output.status.success() {
            return Err(PipelineError::InspectionFailed(format!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_probe_output(&output.stdout)
    }
}
