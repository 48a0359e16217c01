use crate::frame::Frame;

/// One detected region.
///
/// Coordinates are normalized to 0..1 relative to the frame so results stay
/// valid if the frame is rescaled before display.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
    pub class: ObjectClass,
}

impl Detection {
    /// Pixel rectangle `(left, top, right, bottom)`, inclusive, clamped to the frame.
    pub fn pixel_bounds(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if width == 0 || height == 0 {
            return None;
        }
        let max_x = (width - 1) as f32;
        let max_y = (height - 1) as f32;
        let left = (self.x * width as f32).clamp(0.0, max_x);
        let top = (self.y * height as f32).clamp(0.0, max_y);
        let right = ((self.x + self.w) * width as f32).clamp(0.0, max_x);
        let bottom = ((self.y + self.h) * height as f32).clamp(0.0, max_y);
        if right < left || bottom < top {
            return None;
        }
        Some((
            left.round() as u32,
            top.round() as u32,
            right.round() as u32,
            bottom.round() as u32,
        ))
    }
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectClass {
    Motion,
    Person,
    Vehicle,
    Animal,
    Unknown,
}

impl ObjectClass {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Motion => "motion",
            Self::Person => "person",
            Self::Vehicle => "vehicle",
            Self::Animal => "animal",
            Self::Unknown => "object",
        }
    }
}

/// Output of one inference call: the (possibly drawn-on) frame and what was found.
#[derive(Debug)]
pub struct AnnotatedFrame {
    pub frame: Frame,
    pub detections: Vec<Detection>,
}

impl AnnotatedFrame {
    /// Wrap a frame that was not run through inference.
    pub fn passthrough(frame: Frame) -> Self {
        Self {
            frame,
            detections: Vec::new(),
        }
    }

    /// Highest detection confidence, or 0 when nothing was found.
    pub fn top_confidence(&self) -> f32 {
        self.detections
            .iter()
            .map(|d| d.confidence)
            .fold(0.0, f32::max)
    }
}
