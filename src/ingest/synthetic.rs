//! Synthetic capture device for `stub://` URIs.
//!
//! Produces a moving bright square over a static gradient with a little
//! sensor noise, so motion backends have something to find. Query
//! parameters shape the stream:
//!
//! - `frames=N`: end of stream after N frames
//! - `fail_after=M`: the read following frame M fails
//! - `fail_open=1`: `open` fails
//! - `fps=F`: pace reads to F frames per second (defaults to the config rate,
//!   `0` disables pacing)

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{CaptureDevice, SourceConfig};
use crate::frame::{packed_len, Frame, PixelFormat};

const SQUARE_SIDE_DIVISOR: u32 = 6;
const NOISE_AMPLITUDE: i16 = 2;

/// Configuration for a synthetic device.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub fps: u32,
    pub frames: Option<u64>,
    pub fail_after: Option<u64>,
    pub fail_open: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "stub://camera".to_string(),
            width: 64,
            height: 48,
            format: PixelFormat::Rgb24,
            fps: 0,
            frames: None,
            fail_after: None,
            fail_open: false,
        }
    }
}

impl SyntheticConfig {
    /// Parse `stub://name?key=value&...` on top of the source dimensions.
    pub fn from_uri(uri: &str, source: &SourceConfig) -> Result<Self> {
        let rest = uri
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic uri must start with stub://"))?;
        let mut config = Self {
            name: uri.to_string(),
            width: source.width,
            height: source.height,
            format: source.format,
            fps: source.target_fps,
            ..Self::default()
        };
        let query = rest.split_once('?').map(|(_, q)| q).unwrap_or("");
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed stub parameter '{}'", pair))?;
            match key {
                "frames" => config.frames = Some(parse_u64(key, value)?),
                "fail_after" => config.fail_after = Some(parse_u64(key, value)?),
                "fail_open" => config.fail_open = value != "0",
                "fps" => config.fps = parse_u32(key, value)?,
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        packed_len(config.width, config.height)?;
        Ok(config)
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .with_context(|| format!("stub parameter {} must be an integer", key))
}

fn parse_u32(key: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .with_context(|| format!("stub parameter {} must be an integer up to {}", key, u32::MAX))
}

/// Shared counters observing a synthetic device from outside its owning thread.
#[derive(Debug, Default)]
pub struct SyntheticCounters {
    opens: AtomicUsize,
    reads: AtomicUsize,
    closes: AtomicUsize,
}

impl SyntheticCounters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct SyntheticDevice {
    config: SyntheticConfig,
    counters: Arc<SyntheticCounters>,
    background: Vec<u8>,
    frame_count: u64,
    opened: bool,
    last_read_at: Option<Instant>,
}

impl SyntheticDevice {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            counters: Arc::new(SyntheticCounters::default()),
            background: Vec::new(),
            frame_count: 0,
            opened: false,
            last_read_at: None,
        }
    }

    pub fn counters(&self) -> Arc<SyntheticCounters> {
        Arc::clone(&self.counters)
    }

    fn pace(&mut self) {
        if self.config.fps == 0 {
            return;
        }
        let interval = Duration::from_secs_f64(1.0 / self.config.fps as f64);
        if let Some(last) = self.last_read_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_read_at = Some(Instant::now());
    }

    /// Generate synthetic pixel data: gradient background plus a square that
    /// moves one step per frame.
    fn render(&self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let side = (self.config.width.min(self.config.height) / SQUARE_SIDE_DIVISOR).max(1) as usize;
        let travel = width.saturating_sub(side).max(1);
        let left = (self.frame_count as usize * 2) % travel;
        let top = height.saturating_sub(side) / 2;

        let mut rng = rand::thread_rng();
        let mut pixels = self.background.clone();
        for (i, px) in pixels.iter_mut().enumerate() {
            let noise = rng.gen_range(-NOISE_AMPLITUDE..=NOISE_AMPLITUDE);
            *px = (*px as i16 + noise).clamp(0, 255) as u8;
            let pixel_index = i / 3;
            let (x, y) = (pixel_index % width, pixel_index / width);
            if (left..left + side).contains(&x) && (top..top + side).contains(&y) {
                *px = 250;
            }
        }
        pixels
    }
}

impl CaptureDevice for SyntheticDevice {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn open(&mut self) -> Result<()> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        if self.config.fail_open {
            return Err(anyhow!("synthetic device {} refused to open", self.config.name));
        }
        let len = packed_len(self.config.width, self.config.height)?;
        let width = self.config.width.max(1) as usize;
        self.background = (0..len)
            .map(|i| (((i / 3) % width) * 160 / width) as u8 + 40)
            .collect();
        self.opened = true;
        log::info!("SyntheticDevice: opened {}", self.config.name);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        if !self.opened {
            return Err(anyhow!("synthetic device {} is not open", self.config.name));
        }
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        if self.config.fail_after == Some(self.frame_count) {
            return Err(anyhow!(
                "synthetic capture failure after {} frames",
                self.frame_count
            ));
        }
        if self.config.frames.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        self.pace();

        let frame = Frame::new(
            self.render(),
            self.config.width,
            self.config.height,
            self.config.format,
            self.frame_count,
        )?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        self.opened = false;
        self.background = Vec::new();
        log::info!(
            "SyntheticDevice: closed {} after {} frames",
            self.config.name,
            self.frame_count
        );
    }

    fn frame_count_hint(&self) -> Option<u64> {
        self.config.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_config() -> SourceConfig {
        SourceConfig {
            width: 48,
            height: 36,
            target_fps: 0,
            ..SourceConfig::default()
        }
    }

    #[test]
    fn parses_stub_parameters() -> Result<()> {
        let config = SyntheticConfig::from_uri("stub://cam?frames=10&fail_after=3&fps=0", &source_config())?;
        assert_eq!(config.frames, Some(10));
        assert_eq!(config.fail_after, Some(3));
        assert_eq!(config.fps, 0);
        assert_eq!((config.width, config.height), (48, 36));
        assert!(!config.fail_open);
        Ok(())
    }

    #[test]
    fn rejects_unknown_stub_parameters() {
        assert!(SyntheticConfig::from_uri("stub://cam?zoom=2", &source_config()).is_err());
        assert!(SyntheticConfig::from_uri("stub://cam?frames=ten", &source_config()).is_err());
    }

    #[test]
    fn rejects_fps_beyond_u32() {
        let err = SyntheticConfig::from_uri("stub://cam?fps=4294967296", &source_config())
            .unwrap_err();
        assert!(format!("{err:#}").contains("fps"));
        let config = SyntheticConfig::from_uri("stub://cam?fps=4294967295", &source_config())
            .expect("u32::MAX fits");
        assert_eq!(config.fps, u32::MAX);
    }

    #[test]
    fn synthetic_device_ends_after_frame_limit() -> Result<()> {
        let mut device = SyntheticDevice::new(SyntheticConfig {
            frames: Some(3),
            ..SyntheticConfig::default()
        });
        device.open()?;
        for expected in 0..3 {
            let frame = device.read()?.expect("frame");
            assert_eq!(frame.sequence, expected);
            assert_eq!(frame.byte_len(), 64 * 48 * 3);
        }
        assert!(device.read()?.is_none());
        device.close();
        assert_eq!(device.counters().closes(), 1);
        Ok(())
    }

    #[test]
    fn synthetic_device_fails_after_configured_frame() -> Result<()> {
        let mut device = SyntheticDevice::new(SyntheticConfig {
            fail_after: Some(1),
            ..SyntheticConfig::default()
        });
        device.open()?;
        assert!(device.read()?.is_some());
        assert!(device.read().is_err());
        Ok(())
    }

    #[test]
    fn square_moves_between_frames() -> Result<()> {
        let mut device = SyntheticDevice::new(SyntheticConfig::default());
        device.open()?;
        let first = device.read()?.expect("frame");
        let second = device.read()?.expect("frame");
        let differing = first
            .pixels()
            .iter()
            .zip(second.pixels())
            .filter(|(a, b)| (**a as i16 - **b as i16).abs() > 40)
            .count();
        assert!(differing > 0);
        Ok(())
    }
}
