use anyhow::Result;

use crate::detect::backend::{InferenceBackend, InferenceParams};
use crate::detect::result::AnnotatedFrame;
use crate::frame::Frame;

/// Stub backend for testing. Returns every frame untouched with no detections.
#[derive(Default)]
pub struct StubBackend {
    frames_seen: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, frame: Frame, _params: &InferenceParams) -> Result<AnnotatedFrame> {
        self.frames_seen += 1;
        Ok(AnnotatedFrame::passthrough(frame))
    }
}
