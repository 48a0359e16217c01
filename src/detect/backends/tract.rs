#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::annotate::draw_detections;
use crate::detect::backend::{InferenceBackend, InferenceParams};
use crate::detect::result::{AnnotatedFrame, Detection, ObjectClass};
use crate::frame::Frame;

/// Tract-based backend for ONNX inference.
///
/// Loads a local classifier that takes a `1x3xHxW` f32 tensor (RGB, 0..1)
/// and emits per-class scores. A score above the confidence threshold is
/// reported as a whole-frame detection of the matching class. The model is
/// loaded once and reused for every frame.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    classes: Vec<ObjectClass>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "TractBackend: loaded {} ({}x{} input)",
            model_path.display(),
            width,
            height
        );
        Ok(Self {
            model,
            width,
            height,
            classes: vec![
                ObjectClass::Person,
                ObjectClass::Vehicle,
                ObjectClass::Animal,
            ],
        })
    }

    /// Map output indices to classes. Indices past the list are `Unknown`.
    pub fn with_classes(mut self, classes: Vec<ObjectClass>) -> Self {
        self.classes = classes;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width != self.width || frame.height != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            ));
        }

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| {
                frame
                    .rgb_at(x as u32, y as u32)
                    .map(|rgb| rgb[channel] as f32 / 255.0)
                    .unwrap_or(0.0)
            },
        );

        Ok(input.into_tensor())
    }

    fn scores(&self, outputs: TVec<TValue>) -> Result<Vec<f32>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Ok(scores
            .iter()
            .map(|score| if score.is_finite() { *score } else { 0.0 })
            .collect())
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, mut frame: Frame, params: &InferenceParams) -> Result<AnnotatedFrame> {
        let input = self.build_input(&frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;

        let detections: Vec<Detection> = self
            .scores(outputs)?
            .into_iter()
            .enumerate()
            .filter(|(_, score)| *score >= params.confidence)
            .map(|(idx, score)| Detection {
                x: 0.0,
                y: 0.0,
                w: 1.0,
                h: 1.0,
                confidence: score,
                class: self.classes.get(idx).copied().unwrap_or(ObjectClass::Unknown),
            })
            .collect();

        if params.annotate {
            draw_detections(&mut frame, &detections);
        }
        Ok(AnnotatedFrame { frame, detections })
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::new(
            vec![0u8; crate::frame::packed_len(self.width, self.height)?],
            self.width,
            self.height,
            crate::frame::PixelFormat::Rgb24,
            0,
        )?;
        let input = self.build_input(&blank)?;
        self.model
            .run(tvec!(input.into()))
            .context("ONNX warm-up run failed")?;
        Ok(())
    }
}
