//! Timed, error-mapped wrapper around one inference backend.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::detect::backend::{InferenceBackend, InferenceParams};
use crate::detect::result::AnnotatedFrame;
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

/// Runs one backend call per frame and measures it.
///
/// The stage holds no pipeline state. The measured duration covers only the
/// backend call: lock acquisition and the dimension check happen outside
/// the timed region.
pub struct InferenceStage {
    backend: Arc<Mutex<dyn InferenceBackend>>,
    backend_name: String,
    params: InferenceParams,
    calls: u64,
}

impl InferenceStage {
    pub fn new(backend: Arc<Mutex<dyn InferenceBackend>>, params: InferenceParams) -> Self {
        let backend_name = backend
            .lock()
            .map(|guard| guard.name().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            backend,
            backend_name,
            params,
            calls: 0,
        }
    }

    /// Wrap an owned backend.
    pub fn from_backend<B: InferenceBackend + 'static>(backend: B, params: InferenceParams) -> Self {
        Self::new(Arc::new(Mutex::new(backend)), params)
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    pub fn params(&self) -> &InferenceParams {
        &self.params
    }

    pub fn set_params(&mut self, params: InferenceParams) {
        self.params = params;
    }

    /// Number of completed `infer` calls (successful or not).
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn warm_up(&self) -> PipelineResult<()> {
        let mut guard = self.lock()?;
        guard
            .warm_up()
            .map_err(|err| PipelineError::inference(self.backend_name.clone(), &err))
    }

    /// Run the backend on `frame`. Returns the annotated frame and the
    /// wall-clock duration of the backend call.
    pub fn infer(&mut self, frame: Frame) -> PipelineResult<(AnnotatedFrame, Duration)> {
        let (width, height) = (frame.width, frame.height);
        let params = self.params;

        let mut guard = self.lock()?;
        let started = Instant::now();
        let result = guard.infer(frame, &params);
        let elapsed = started.elapsed();
        drop(guard);

        self.calls += 1;
        let annotated =
            result.map_err(|err| PipelineError::inference(self.backend_name.clone(), &err))?;

        if annotated.frame.width != width || annotated.frame.height != height {
            return Err(PipelineError::InferenceFailure {
                backend: self.backend_name.clone(),
                reason: format!(
                    "annotated frame is {}x{}, input was {}x{}",
                    annotated.frame.width, annotated.frame.height, width, height
                ),
            });
        }
        Ok((annotated, elapsed))
    }

    fn lock(&self) -> PipelineResult<std::sync::MutexGuard<'_, dyn InferenceBackend + 'static>> {
        self.backend.lock().map_err(|_| PipelineError::InferenceFailure {
            backend: self.backend_name.clone(),
            reason: "backend lock poisoned".to_string(),
        })
    }
}
