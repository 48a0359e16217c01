//! Inference on captured frames.
//!
//! The pipeline treats the model as an opaque collaborator behind
//! `InferenceBackend`. This module is responsible for:
//! - timing each backend call (`InferenceStage`)
//! - turning backend failures into `PipelineError::InferenceFailure`
//! - drawing detection boxes and the performance banner onto frames
//!
//! It MUST NOT decide which model runs; that is configuration.

mod annotate;
mod backend;
mod backends;
mod overlay;
mod registry;
mod result;
mod stage;

pub use annotate::draw_detections;
pub use backend::{InferenceBackend, InferenceParams, DEFAULT_CONFIDENCE};
pub use backends::{CpuBackend, StubBackend};
pub use overlay::{draw_stats_banner, stats_text};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::BackendRegistry;
pub use result::{AnnotatedFrame, Detection, ObjectClass};
pub use stage::InferenceStage;
