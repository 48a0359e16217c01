//! Error taxonomy for the capture + inference pipeline.
//!
//! Only fatal conditions are errors. "No frame yet" and "end of stream" are
//! ordinary fetch outcomes (see [`crate::ingest::Fetch`]) and never appear here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The device or file could not be opened. Fatal to the run.
    #[error("failed to open source {source_name}: {reason}")]
    OpenFailure { source_name: String, reason: String },

    /// Sticky failure raised mid-stream by the capture device.
    #[error("capture failed on {source_name}: {reason}")]
    CaptureFailure { source_name: String, reason: String },

    /// The inference backend failed on a frame. Ends the run.
    #[error("inference failed in backend {backend}: {reason}")]
    InferenceFailure { backend: String, reason: String },

    /// The render sink rejected a frame.
    #[error("render sink failed: {0}")]
    Sink(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn open(source_name: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::OpenFailure {
            source_name: source_name.into(),
            reason: err.to_string(),
        }
    }

    pub fn capture(source_name: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::CaptureFailure {
            source_name: source_name.into(),
            reason: err.to_string(),
        }
    }

    pub fn inference(backend: impl Into<String>, err: &anyhow::Error) -> Self {
        // `{:#}` keeps the whole anyhow context chain on one line.
        Self::InferenceFailure {
            backend: backend.into(),
            reason: format!("{err:#}"),
        }
    }

    /// True for the kinds that end a run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
