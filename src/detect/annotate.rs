use crate::detect::result::{Detection, ObjectClass};
use crate::frame::Frame;

const BOX_THICKNESS: u32 = 2;

pub(crate) fn class_color(class: ObjectClass) -> [u8; 3] {
    match class {
        ObjectClass::Motion => [0, 255, 0],
        ObjectClass::Person => [255, 64, 64],
        ObjectClass::Vehicle => [64, 160, 255],
        ObjectClass::Animal => [255, 200, 0],
        ObjectClass::Unknown => [255, 255, 255],
    }
}

/// Draw a box outline for every detection, colored by class.
pub fn draw_detections(frame: &mut Frame, detections: &[Detection]) {
    for detection in detections {
        let Some((left, top, right, bottom)) = detection.pixel_bounds(frame.width, frame.height)
        else {
            continue;
        };
        let color = class_color(detection.class);
        for inset in 0..BOX_THICKNESS {
            if left + inset > right.saturating_sub(inset) || top + inset > bottom.saturating_sub(inset)
            {
                break;
            }
            draw_rectangle(
                frame,
                left + inset,
                top + inset,
                right - inset,
                bottom - inset,
                color,
            );
        }
    }
}

fn draw_rectangle(frame: &mut Frame, left: u32, top: u32, right: u32, bottom: u32, color: [u8; 3]) {
    for x in left..=right {
        frame.put_rgb(x, top, color);
        frame.put_rgb(x, bottom, color);
    }
    for y in top..=bottom {
        frame.put_rgb(left, y, color);
        frame.put_rgb(right, y, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    #[test]
    fn draws_outline_without_filling() -> anyhow::Result<()> {
        let mut frame = Frame::new(vec![0u8; 10 * 10 * 3], 10, 10, PixelFormat::Bgr24, 0)?;
        let detection = Detection {
            x: 0.0,
            y: 0.0,
            w: 0.9,
            h: 0.9,
            confidence: 1.0,
            class: ObjectClass::Motion,
        };
        draw_detections(&mut frame, &[detection]);

        assert_eq!(frame.rgb_at(0, 0), Some([0, 255, 0]));
        assert_eq!(frame.rgb_at(9, 4), Some([0, 255, 0]));
        assert_eq!(frame.rgb_at(1, 1), Some([0, 255, 0]));
        assert_eq!(frame.rgb_at(5, 5), Some([0, 0, 0]));
        Ok(())
    }
}
