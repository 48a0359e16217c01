//! The inference collaborator seam: backend trait and per-call parameters.

use anyhow::Result;

use crate::detect::result::AnnotatedFrame;
use crate::frame::Frame;

/// Default minimum confidence for a detection to be reported.
pub const DEFAULT_CONFIDENCE: f32 = 0.25;

/// Per-call inference parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InferenceParams {
    /// Detections below this score are discarded. 0..=1.
    pub confidence: f32,
    /// Draw detection boxes onto the returned frame.
    pub annotate: bool,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            annotate: true,
        }
    }
}

/// Inference backend trait.
///
/// A backend is loaded once and then called repeatedly, one frame at a time,
/// from the pipeline's consumer thread. Implementations:
/// - take ownership of the frame and return it (optionally drawn on) inside
///   the `AnnotatedFrame`, with unchanged dimensions
/// - return an error instead of a partial annotation when the model fails
/// - MUST NOT retain the frame after `infer` returns
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run inference on one frame.
    fn infer(&mut self, frame: Frame, params: &InferenceParams) -> Result<AnnotatedFrame>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
