//! Performance banner drawn in the top-left corner of a frame.
//!
//! Text uses a built-in 5x7 bitmap font (upper case, digits and a few
//! symbols), scaled up on wide frames. The banner background is the frame
//! darkened to 30%.

use std::time::Duration;

use crate::frame::Frame;
use crate::metrics::MetricsSnapshot;

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_ADVANCE: u32 = 6;
const MARGIN: u32 = 5;
const PADDING: u32 = 5;
/// One font scale step per this many pixels of frame width.
const SCALE_STEP: u32 = 320;
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

/// Banner line: model, latency of this frame's inference, loop fps, memory.
pub fn stats_text(
    model: Option<&str>,
    latency: Option<Duration>,
    metrics: &MetricsSnapshot,
) -> String {
    let mut parts = Vec::with_capacity(4);
    if let Some(model) = model {
        parts.push(format!("MODEL {}", model));
    }
    if let Some(latency) = latency {
        parts.push(format!("INF {:.1}MS", latency.as_micros() as f64 / 1000.0));
    }
    parts.push(format!("FPS {:.1}", metrics.overall_fps));
    if let Some(rss) = metrics.rss_mb {
        parts.push(format!("RAM {:.1}MB", rss));
    }
    parts.join(" | ").to_uppercase()
}

/// Darken a box behind `text` and draw it at the top-left corner.
///
/// Characters without a glyph leave a blank cell. Text running past the
/// frame edge is clipped.
pub fn draw_stats_banner(frame: &mut Frame, text: &str) {
    if frame.width <= MARGIN || frame.height <= MARGIN {
        return;
    }
    let scale = (frame.width / SCALE_STEP).max(1);
    let chars = text.chars().count() as u32;
    let text_width = chars.saturating_mul(GLYPH_ADVANCE * scale);
    let text_height = GLYPH_HEIGHT * scale;

    let right = text_width
        .saturating_add(MARGIN + 2 * PADDING)
        .min(frame.width - 1);
    let bottom = (MARGIN + text_height + 2 * PADDING).min(frame.height - 1);
    darken(frame, MARGIN, MARGIN, right, bottom);

    let mut x = MARGIN + PADDING;
    let y = MARGIN + PADDING;
    for ch in text.chars().flat_map(char::to_uppercase) {
        if x >= frame.width {
            break;
        }
        if let Some(rows) = glyph_bits(ch) {
            draw_glyph(frame, x, y, scale, &rows);
        }
        x += GLYPH_ADVANCE * scale;
    }
}

fn darken(frame: &mut Frame, left: u32, top: u32, right: u32, bottom: u32) {
    for y in top..=bottom {
        for x in left..=right {
            if let Some([r, g, b]) = frame.rgb_at(x, y) {
                frame.put_rgb(x, y, [dim(r), dim(g), dim(b)]);
            }
        }
    }
}

fn dim(value: u8) -> u8 {
    (value as u16 * 3 / 10) as u8
}

fn draw_glyph(frame: &mut Frame, x: u32, y: u32, scale: u32, rows: &[u8; 7]) {
    for (row, pattern) in rows.iter().enumerate() {
        for col in 0..GLYPH_WIDTH {
            if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                continue;
            }
            let px = x + col * scale;
            let py = y + row as u32 * scale;
            for dy in 0..scale {
                for dx in 0..scale {
                    // put_rgb ignores out-of-bounds coordinates.
                    frame.put_rgb(px + dx, py + dy, TEXT_COLOR);
                }
            }
        }
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '|' => [0b00100; 7],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}
