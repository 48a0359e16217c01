//! Frame ingestion sources.
//!
//! This module provides two ways of pulling frames from a capture device:
//! - `PollingSource`: blocks the caller's thread on each device read
//!   (video files, generic capture handles)
//! - `PushSource`: an owned capture thread feeding a capacity-2 `FrameBuffer`
//!   (hardware cameras)
//!
//! Device backends:
//! - Synthetic `stub://` devices (testing, demos)
//! - Local video files (feature: ingest-file-ffmpeg)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! Both source kinds implement `FrameSource`, so the pipeline never needs to
//! know which one it is driving. Ingestion is local-only: network URLs are
//! rejected.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod polling;
pub mod push;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};
use crate::frame::{Frame, PixelFormat};

pub use polling::PollingSource;
pub use push::{CameraControls, PushOptions, PushSource};
pub use synthetic::{SyntheticConfig, SyntheticCounters, SyntheticDevice};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Device;

// ----------------------------------------------------------------------------
// Device and source traits
// ----------------------------------------------------------------------------

/// A blocking capture handle.
///
/// A device is driven either directly by a `PollingSource` or from the
/// capture thread of a `PushSource`; in both cases exactly one thread owns it.
pub trait CaptureDevice: Send {
    /// Human-readable device identifier (URI or path).
    fn name(&self) -> &str;

    /// Acquire the underlying handle.
    fn open(&mut self) -> Result<()>;

    /// Apply exposure / white-balance controls after opening.
    fn apply_controls(&mut self, _controls: &CameraControls) -> Result<()> {
        Ok(())
    }

    /// Block until the next frame. `Ok(None)` signals end of stream.
    fn read(&mut self) -> Result<Option<Frame>>;

    /// Stop streaming. Called before `close`.
    fn halt(&mut self) {}

    /// Release the handle. Called exactly once per successful or failed `open`.
    fn close(&mut self);

    /// Hardware devices get a settle delay between `halt` and `close`.
    fn is_physical(&self) -> bool {
        false
    }

    /// Total frame count when the resource is finite and the count is known.
    fn frame_count_hint(&self) -> Option<u64> {
        None
    }
}

/// Outcome of one fetch attempt.
#[derive(Debug)]
pub enum Fetch {
    Frame(Frame),
    /// No frame arrived within the wait bound. Retry.
    Pending,
    /// The source is exhausted or already shut down. Not an error.
    EndOfStream,
}

/// Pull interface shared by polling and push sources.
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    /// Fetch the next frame.
    ///
    /// A capture failure is returned exactly once; afterwards the source is
    /// released and every call yields `Fetch::EndOfStream`.
    fn next_frame(&mut self) -> PipelineResult<Fetch>;

    /// Release the device. Idempotent; returns only once capture has fully stopped.
    fn stop(&mut self);

    /// True while the source can still produce frames.
    fn is_live(&self) -> bool;

    fn stats(&self) -> SourceStats;

    fn frame_count_hint(&self) -> Option<u64> {
        None
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub name: String,
    /// Frames handed to the consumer.
    pub frames_delivered: u64,
    /// Frames discarded because the hand-off buffer was full.
    pub frames_dropped: u64,
}

// ----------------------------------------------------------------------------
// Source configuration
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Independent capture thread feeding a lossy buffer.
    Push,
    /// Reads happen on the consumer's thread.
    #[default]
    Polling,
}

impl std::str::FromStr for SourceKind {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "push" | "camera" => Ok(Self::Push),
            "polling" | "poll" | "file" => Ok(Self::Polling),
            other => Err(PipelineError::Config(format!(
                "unknown source kind '{}'; expected push or polling",
                other
            ))),
        }
    }
}

/// Descriptor of a capture source. Two equal configs describe the same
/// logical camera; any change forces teardown and re-initialisation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// `stub://name[?frames=N][&fail_after=M]`, `/dev/videoN`, or a local file path.
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub target_fps: u32,
    pub warmup_ms: u64,
    pub settle_ms: u64,
    pub frame_wait_ms: u64,
    pub startup_timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Polling,
            uri: "stub://camera".to_string(),
            width: 800,
            height: 600,
            format: PixelFormat::Bgr24,
            target_fps: 30,
            warmup_ms: 2_000,
            settle_ms: 300,
            frame_wait_ms: 1_000,
            startup_timeout_ms: 5_000,
        }
    }
}

impl SourceConfig {
    pub fn push_options(&self) -> PushOptions {
        PushOptions {
            warmup: Duration::from_millis(self.warmup_ms),
            settle: Duration::from_millis(self.settle_ms),
            frame_wait: Duration::from_millis(self.frame_wait_ms),
            startup_timeout: Duration::from_millis(self.startup_timeout_ms),
            controls: CameraControls::default(),
        }
    }
}

/// Open the source described by `config`.
pub fn open_source(config: &SourceConfig) -> PipelineResult<Box<dyn FrameSource>> {
    let device = build_device(config)?;
    match config.kind {
        SourceKind::Polling => Ok(Box::new(PollingSource::open(device)?)),
        SourceKind::Push => Ok(Box::new(PushSource::start(device, config.push_options())?)),
    }
}

fn build_device(config: &SourceConfig) -> PipelineResult<Box<dyn CaptureDevice>> {
    let uri = config.uri.trim();
    if uri.starts_with("stub://") {
        let synthetic = SyntheticConfig::from_uri(uri, config)
            .map_err(|err| PipelineError::open(uri, format!("{err:#}")))?;
        return Ok(Box::new(SyntheticDevice::new(synthetic)));
    }
    if is_video_device(uri) {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(V4l2Device::new(config.clone())));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            return Err(PipelineError::open(
                uri,
                "camera capture requires the ingest-v4l2 feature",
            ));
        }
    }
    file::open_file_device(config).map_err(|err| PipelineError::open(uri, format!("{err:#}")))
}

/// `/dev/videoN` or a bare device index.
pub(crate) fn is_video_device(uri: &str) -> bool {
    if !uri.is_empty() && uri.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    uri.strip_prefix("/dev/video")
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
}
