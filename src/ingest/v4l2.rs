//! V4L2 capture device.
//!
//! Wraps a local device node (e.g., /dev/video0) via libv4l. The handle is
//! opened and configured in `open`, controls are applied while the handle is
//! still unborrowed, and the mmap stream is created lazily on the first read.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::normalize::{normalize_frame, DeviceFormat};
use super::{CameraControls, CaptureDevice, SourceConfig};
use crate::frame::Frame;

// V4L2 control ids (linux/v4l2-controls.h).
const V4L2_CID_AUTO_WHITE_BALANCE: u32 = 0x0098_090c;
const V4L2_CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const V4L2_EXPOSURE_AUTO: i64 = 0;
const V4L2_EXPOSURE_MANUAL: i64 = 1;

const STREAM_BUFFERS: u32 = 4;

pub struct V4l2Device {
    config: SourceConfig,
    state: DeviceState,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    active_width: u32,
    active_height: u32,
    active_format: DeviceFormat,
}

enum DeviceState {
    Closed,
    Configured(v4l::Device),
    Streaming(V4l2Stream),
}

#[self_referencing]
struct V4l2Stream {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Device {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            active_format: DeviceFormat::Rgb24,
            config,
            state: DeviceState::Closed,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    fn device_path(&self) -> String {
        let uri = self.config.uri.trim();
        if uri.chars().all(|c| c.is_ascii_digit()) {
            format!("/dev/video{}", uri)
        } else {
            uri.to_string()
        }
    }

    fn start_stream(&mut self) -> Result<()> {
        use v4l::buffer::Type;

        let state = std::mem::replace(&mut self.state, DeviceState::Closed);
        let DeviceState::Configured(device) = state else {
            self.state = state;
            return Ok(());
        };
        let stream = V4l2StreamTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = DeviceState::Streaming(stream);
        Ok(())
    }

    fn frame_timeout(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

impl CaptureDevice for V4l2Device {
    fn name(&self) -> &str {
        &self.config.uri
    }

    fn open(&mut self) -> Result<()> {
        use v4l::video::Capture;

        let path = self.device_path();
        let device =
            v4l::Device::with_path(&path).with_context(|| format!("open v4l2 device {}", path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Device: failed to set format on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let active_format = DeviceFormat::from_fourcc(&format.fourcc.repr)
            .ok_or_else(|| anyhow!("unsupported v4l2 pixel format {}", format.fourcc))?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Device: failed to set fps on {}: {}", path, err);
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.active_format = active_format;
        self.state = DeviceState::Configured(device);

        log::info!(
            "V4l2Device: opened {} ({}x{} {:?})",
            path,
            self.active_width,
            self.active_height,
            self.active_format
        );
        Ok(())
    }

    fn apply_controls(&mut self, controls: &CameraControls) -> Result<()> {
        use v4l::control::{Control, Value};

        let DeviceState::Configured(device) = &self.state else {
            return Err(anyhow!("controls must be applied before streaming starts"));
        };
        let exposure = if controls.auto_exposure {
            V4L2_EXPOSURE_AUTO
        } else {
            V4L2_EXPOSURE_MANUAL
        };
        let requests = [
            Control {
                id: V4L2_CID_EXPOSURE_AUTO,
                value: Value::Integer(exposure),
            },
            Control {
                id: V4L2_CID_AUTO_WHITE_BALANCE,
                value: Value::Boolean(controls.auto_white_balance),
            },
        ];
        // Not every sensor exposes these controls; missing ones are not fatal.
        for control in requests {
            let id = control.id;
            if let Err(err) = device.set_control(control) {
                log::warn!(
                    "V4l2Device: control {:#x} rejected by {}: {}",
                    id,
                    self.config.uri,
                    err
                );
            }
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        self.start_stream()?;
        if let Some(last) = self.last_frame_at {
            if last.elapsed() > self.frame_timeout() {
                log::warn!("V4l2Device: {} stalled for {:?}", self.config.uri, last.elapsed());
            }
        }

        let (width, height, format, target) = (
            self.active_width,
            self.active_height,
            self.active_format,
            self.config.format,
        );
        let sequence = self.frame_count;
        let DeviceState::Streaming(stream) = &mut self.state else {
            return Err(anyhow!("v4l2 device not open"));
        };
        let frame = stream.with_mut(|fields| -> Result<Frame> {
            let (buf, _meta) = fields.stream.next().context("capture v4l2 frame")?;
            normalize_frame(buf, width, height, format, target, sequence)
        })?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(Some(frame))
    }

    fn halt(&mut self) {
        // Dropping the mmap stream issues STREAMOFF; the handle stays open
        // until `close`.
        if let DeviceState::Streaming(_) = self.state {
            let state = std::mem::replace(&mut self.state, DeviceState::Closed);
            if let DeviceState::Streaming(stream) = state {
                let heads = stream.into_heads();
                self.state = DeviceState::Configured(heads.device);
            }
        }
    }

    fn close(&mut self) {
        if !matches!(self.state, DeviceState::Closed) {
            self.state = DeviceState::Closed;
            log::info!(
                "V4l2Device: closed {} after {} frames",
                self.config.uri,
                self.frame_count
            );
        }
    }

    fn is_physical(&self) -> bool {
        true
    }
}
