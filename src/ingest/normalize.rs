use anyhow::{anyhow, Result};

use crate::frame::{packed_len, Frame, PixelFormat};

/// Pixel layouts a capture device may hand back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeviceFormat {
    Rgb24,
    Bgr24,
    Nv12,
    Yuyv,
}

impl DeviceFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"BGR3" => Some(Self::Bgr24),
            b"NV12" => Some(Self::Nv12),
            b"YUYV" => Some(Self::Yuyv),
            _ => None,
        }
    }
}

/// Convert a device buffer into a packed frame in the requested channel order.
pub(crate) fn normalize_frame(
    pixels: &[u8],
    width: u32,
    height: u32,
    source: DeviceFormat,
    target: PixelFormat,
    sequence: u64,
) -> Result<Frame> {
    let rgb = match source {
        DeviceFormat::Rgb24 | DeviceFormat::Bgr24 => {
            let expected = packed_len(width, height)?;
            if pixels.len() < expected {
                return Err(anyhow!(
                    "packed frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                ));
            }
            let packed = pixels[..expected].to_vec();
            let native = if source == DeviceFormat::Rgb24 {
                PixelFormat::Rgb24
            } else {
                PixelFormat::Bgr24
            };
            return reorder(Frame::new(packed, width, height, native, sequence)?, target);
        }
        DeviceFormat::Nv12 => nv12_to_rgb(pixels, width, height)?,
        DeviceFormat::Yuyv => yuyv_to_rgb(pixels, width, height)?,
    };
    reorder(
        Frame::new(rgb, width, height, PixelFormat::Rgb24, sequence)?,
        target,
    )
}

fn reorder(frame: Frame, target: PixelFormat) -> Result<Frame> {
    if frame.format == target {
        return Ok(frame);
    }
    let (width, height, sequence) = (frame.width, frame.height, frame.sequence);
    let mut data = frame.into_pixels();
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
    Frame::new(data, width, height, target, sequence)
}

fn yuv_to_rgb(y: f32, u: f32, v: f32) -> [u8; 3] {
    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;
    [clamp_to_u8(r), clamp_to_u8(g), clamp_to_u8(b)]
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    let expected = y_plane
        .checked_add(y_plane / 2)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    if pixels.len() < expected {
        return Err(anyhow!(
            "NV12 frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;
            let offset = (j * w + i) * 3;
            rgb[offset..offset + 3].copy_from_slice(&yuv_to_rgb(y, u, v));
        }
    }

    Ok(rgb)
}

fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixel_count = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| anyhow!("YUYV frame dimensions overflow"))?;
    if pixel_count % 2 != 0 || pixels.len() < pixel_count * 2 {
        return Err(anyhow!(
            "YUYV frame length mismatch: expected {}, got {}",
            pixel_count * 2,
            pixels.len()
        ));
    }

    let mut rgb = Vec::with_capacity(pixel_count * 3);
    for quad in pixels[..pixel_count * 2].chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        rgb.extend_from_slice(&yuv_to_rgb(quad[0] as f32, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(quad[2] as f32, u, v));
    }
    Ok(rgb)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
