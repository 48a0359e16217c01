//! Edge Vision
//!
//! Live camera / video capture with per-frame inference and rolling
//! performance statistics.
//!
//! # Architecture
//!
//! ```text
//! FrameSource ─► Frame ─► InferenceStage ─► AnnotatedFrame + latency
//!                                   │
//!                 MetricsWindow ◄───┘
//!                       │
//!                PipelineRunner ─► FrameSink (render / complete)
//! ```
//!
//! A push-style source owns a capture thread that feeds a capacity-2
//! `FrameBuffer`; when the consumer falls behind, incoming frames are dropped
//! rather than queued. Capture failures are sticky: reported once, after
//! which the source only reports end of stream.
//!
//! # Module Structure
//!
//! - `frame`: `Frame`, `PixelFormat`, the lossy `FrameBuffer`
//! - `ingest`: capture devices and `FrameSource` implementations
//! - `detect`: inference backends, `InferenceStage`, box and stats-banner drawing
//! - `metrics`: rolling and cumulative throughput statistics
//! - `pipeline`: stream and bulk run loops
//! - `registry`: process-wide camera slots keyed by source configuration
//! - `config`: JSON + environment configuration
//! - `ui`: console and snapshot sinks used by the binaries

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod ui;

pub use config::{InferenceSettings, PipelineConfig};
pub use detect::{
    AnnotatedFrame, BackendRegistry, Detection, InferenceBackend, InferenceParams,
    InferenceStage, ObjectClass,
};
pub use error::{PipelineError, PipelineResult};
pub use frame::{Frame, FrameBuffer, PixelFormat, FRAME_BUFFER_CAPACITY};
pub use ingest::{
    open_source, CaptureDevice, Fetch, FrameSource, PollingSource, PushOptions, PushSource,
    SourceConfig, SourceKind, SourceStats,
};
pub use metrics::{
    CumulativeMetrics, MemorySampler, MetricsSnapshot, MetricsWindow, METRICS_WINDOW,
};
pub use pipeline::{
    FnSink, FrameReport, FrameSink, PipelineRunner, Progress, RunOutcome, RunSummary,
    RunnerConfig,
};
pub use registry::{CameraRegistry, PipelineState};

/// External stop signal shared between a run loop and whoever ends it
/// (Ctrl-C handler, UI, tests). Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arm the handle for another run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
