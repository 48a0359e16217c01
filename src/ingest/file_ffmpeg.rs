//! Local file capture device using FFmpeg.
//!
//! Decodes the best video track in-memory and scales every frame to packed
//! RGB24 or BGR24 at the configured resolution. End of file flushes the
//! decoder and then reports end of stream.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::{CaptureDevice, SourceConfig};
use crate::frame::{Frame, PixelFormat};

struct Decoding {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    eof_sent: bool,
}

pub(crate) struct FfmpegFileDevice {
    config: SourceConfig,
    state: Option<Decoding>,
    frame_count: u64,
    total_frames: Option<u64>,
}

impl FfmpegFileDevice {
    pub(crate) fn new(config: SourceConfig) -> Self {
        Self {
            config,
            state: None,
            frame_count: 0,
            total_frames: None,
        }
    }

    fn target_pixel(&self) -> ffmpeg::util::format::pixel::Pixel {
        match self.config.format {
            PixelFormat::Rgb24 => ffmpeg::util::format::pixel::Pixel::RGB24,
            PixelFormat::Bgr24 => ffmpeg::util::format::pixel::Pixel::BGR24,
        }
    }

    fn receive(&mut self) -> Result<Option<Frame>> {
        let format = self.config.format;
        let sequence = self.frame_count;
        let state = self.state.as_mut().context("file device not open")?;
        let mut decoded = ffmpeg::frame::Video::empty();
        if state.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut scaled = ffmpeg::frame::Video::empty();
        state
            .scaler
            .run(&decoded, &mut scaled)
            .context("scale decoded frame")?;
        let (pixels, width, height) = frame_to_pixels(&scaled)?;
        self.frame_count += 1;
        Ok(Some(Frame::new(pixels, width, height, format, sequence)?))
    }
}

impl CaptureDevice for FfmpegFileDevice {
    fn name(&self) -> &str {
        &self.config.uri
    }

    fn open(&mut self) -> Result<()> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&self.config.uri)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", self.config.uri))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let frames = input_stream.frames();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let (width, height) = if self.config.width > 0 && self.config.height > 0 {
            (self.config.width, self.config.height)
        } else {
            (decoder.width(), decoder.height())
        };
        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            self.target_pixel(),
            width,
            height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        self.total_frames = (frames > 0).then_some(frames as u64);
        self.state = Some(Decoding {
            input,
            stream_index,
            decoder,
            scaler,
            eof_sent: false,
        });
        log::info!(
            "FfmpegFileDevice: opened {} ({}x{}, {:?} frames)",
            self.config.uri,
            width,
            height,
            self.total_frames
        );
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.receive()? {
                return Ok(Some(frame));
            }

            let state = self.state.as_mut().context("file device not open")?;
            if state.eof_sent {
                return Ok(None);
            }

            let mut fed = false;
            for (stream, packet) in state.input.packets() {
                if stream.index() != state.stream_index {
                    continue;
                }
                state
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?;
                fed = true;
                break;
            }
            if !fed {
                state.decoder.send_eof().context("flush ffmpeg decoder")?;
                state.eof_sent = true;
            }
        }
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "FfmpegFileDevice: closed {} after {} frames",
                self.config.uri,
                self.frame_count
            );
        }
    }

    fn frame_count_hint(&self) -> Option<u64> {
        self.total_frames
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
