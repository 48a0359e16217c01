use anyhow::Result;

use crate::detect::annotate::draw_detections;
use crate::detect::backend::{InferenceBackend, InferenceParams};
use crate::detect::result::{AnnotatedFrame, Detection, ObjectClass};
use crate::frame::Frame;

/// Cells per axis in the motion grid.
const GRID: u32 = 8;
/// Sample every Nth pixel inside a cell.
const SAMPLE_STEP: u32 = 2;
/// Mean luma change that counts as a full-confidence change.
const FULL_SCALE_DELTA: f32 = 64.0;

/// CPU backend for motion detection.
///
/// Splits each frame into a coarse grid, compares mean cell luma against the
/// previous frame, and reports the bounding box of all changed cells as one
/// `Motion` detection. The first frame (or the first after a resolution
/// change) only primes the reference grid.
#[derive(Default)]
pub struct CpuBackend {
    previous: Option<LumaGrid>,
}

struct LumaGrid {
    width: u32,
    height: u32,
    cols: u32,
    rows: u32,
    cells: Vec<f32>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn detect(&self, current: &LumaGrid, threshold: f32) -> Option<Detection> {
        let previous = self.previous.as_ref()?;
        if previous.width != current.width || previous.height != current.height {
            return None;
        }

        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        let mut strongest = 0.0f32;
        for row in 0..current.rows {
            for col in 0..current.cols {
                let idx = (row * current.cols + col) as usize;
                let delta = (current.cells[idx] - previous.cells[idx]).abs();
                let score = (delta / FULL_SCALE_DELTA).min(1.0);
                if score < threshold || score == 0.0 {
                    continue;
                }
                strongest = strongest.max(score);
                bounds = Some(match bounds {
                    None => (col, row, col, row),
                    Some((c0, r0, c1, r1)) => (c0.min(col), r0.min(row), c1.max(col), r1.max(row)),
                });
            }
        }

        let (c0, r0, c1, r1) = bounds?;
        let cols = current.cols as f32;
        let rows = current.rows as f32;
        Some(Detection {
            x: c0 as f32 / cols,
            y: r0 as f32 / rows,
            w: (c1 - c0 + 1) as f32 / cols,
            h: (r1 - r0 + 1) as f32 / rows,
            confidence: strongest,
            class: ObjectClass::Motion,
        })
    }
}

impl LumaGrid {
    fn from_frame(frame: &Frame) -> Self {
        let cols = GRID.min(frame.width).max(1);
        let rows = GRID.min(frame.height).max(1);
        let cell_w = (frame.width / cols).max(1);
        let cell_h = (frame.height / rows).max(1);

        let mut cells = Vec::with_capacity((cols * rows) as usize);
        for row in 0..rows {
            for col in 0..cols {
                let mut sum = 0u64;
                let mut count = 0u64;
                for y in (row * cell_h..(row + 1) * cell_h).step_by(SAMPLE_STEP as usize) {
                    for x in (col * cell_w..(col + 1) * cell_w).step_by(SAMPLE_STEP as usize) {
                        if let Some(luma) = frame.luma_at(x, y) {
                            sum += luma as u64;
                            count += 1;
                        }
                    }
                }
                cells.push(if count == 0 {
                    0.0
                } else {
                    sum as f32 / count as f32
                });
            }
        }

        Self {
            width: frame.width,
            height: frame.height,
            cols,
            rows,
            cells,
        }
    }
}

impl InferenceBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn infer(&mut self, mut frame: Frame, params: &InferenceParams) -> Result<AnnotatedFrame> {
        let grid = LumaGrid::from_frame(&frame);
        let detections: Vec<Detection> = self
            .detect(&grid, params.confidence)
            .into_iter()
            .collect();
        self.previous = Some(grid);

        if params.annotate {
            draw_detections(&mut frame, &detections);
        }
        Ok(AnnotatedFrame { frame, detections })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn blank(sequence: u64) -> Frame {
        Frame::new(vec![0u8; 16 * 16 * 3], 16, 16, PixelFormat::Rgb24, sequence).expect("frame")
    }

    fn with_bright_square(sequence: u64) -> Frame {
        let mut frame = blank(sequence);
        for y in 8..12 {
            for x in 8..12 {
                frame.put_rgb(x, y, [255, 255, 255]);
            }
        }
        frame
    }

    #[test]
    fn cpu_backend_detects_motion() -> Result<()> {
        let mut backend = CpuBackend::new();
        let params = InferenceParams {
            confidence: 0.25,
            annotate: false,
        };

        let first = backend.infer(blank(0), &params)?;
        assert!(first.detections.is_empty());

        let second = backend.infer(with_bright_square(1), &params)?;
        assert_eq!(second.detections.len(), 1);
        let motion = &second.detections[0];
        assert_eq!(motion.class, ObjectClass::Motion);
        assert_eq!((motion.x, motion.y), (0.5, 0.5));
        assert_eq!((motion.w, motion.h), (0.25, 0.25));
        assert_eq!(motion.confidence, 1.0);

        let third = backend.infer(with_bright_square(2), &params)?;
        assert!(third.detections.is_empty());
        Ok(())
    }

    #[test]
    fn threshold_filters_weak_changes() -> Result<()> {
        let mut backend = CpuBackend::new();
        let params = InferenceParams {
            confidence: 0.9,
            annotate: false,
        };
        backend.infer(blank(0), &params)?;

        let mut dim = blank(1);
        for y in 0..16 {
            for x in 0..16 {
                dim.put_rgb(x, y, [10, 10, 10]);
            }
        }
        assert!(backend.infer(dim, &params)?.detections.is_empty());
        Ok(())
    }

    #[test]
    fn annotation_draws_on_the_returned_frame() -> Result<()> {
        let mut backend = CpuBackend::new();
        let params = InferenceParams::default();
        backend.infer(blank(0), &params)?;
        let annotated = backend.infer(with_bright_square(1), &params)?;
        assert_eq!(annotated.frame.rgb_at(8, 8), Some([0, 255, 0]));
        Ok(())
    }
}
