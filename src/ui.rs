//! Console sinks for the binaries.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::detect::AnnotatedFrame;
use crate::metrics::MetricsSnapshot;
use crate::pipeline::{FrameReport, FrameSink, RunSummary};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }

    pub fn use_pretty(self, is_tty: bool) -> bool {
        is_tty
            && match self {
                UiMode::Pretty | UiMode::Auto => true,
                UiMode::Plain => false,
            }
    }
}

pub fn format_metrics(metrics: &MetricsSnapshot, inference_enabled: bool) -> String {
    let mut line = if inference_enabled {
        format!(
            "{:.1} fps overall | {:.1} fps inference | {:.1} ms avg",
            metrics.overall_fps,
            metrics.inference_fps,
            metrics.avg_inference_ms()
        )
    } else {
        format!("{:.1} fps overall | inference off", metrics.overall_fps)
    };
    if let Some(rss) = metrics.rss_mb {
        line.push_str(&format!(" | {:.1} MB RAM", rss));
    }
    line
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

pub fn summary_line(summary: &RunSummary) -> String {
    format!(
        "{:?}: {} frames in {} ({} dropped) | {}",
        summary.outcome,
        summary.frames,
        format_duration(summary.elapsed),
        summary.source.frames_dropped,
        format_metrics(&summary.metrics, summary.inferences > 0)
    )
}

// ----------------------------------------------------------------------------
// Stream mode: rate-limited log lines
// ----------------------------------------------------------------------------

/// Logs the metrics line at most once per `interval`.
pub struct LogSink {
    interval: Duration,
    last_logged: Option<Instant>,
    lines: u64,
}

impl LogSink {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_logged: None,
            lines: 0,
        }
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }
}

impl FrameSink for LogSink {
    fn render(&mut self, frame: &AnnotatedFrame, report: &FrameReport) -> anyhow::Result<()> {
        let due = self
            .last_logged
            .map_or(true, |last| last.elapsed() >= self.interval);
        if !due {
            return Ok(());
        }
        self.last_logged = Some(Instant::now());
        self.lines += 1;
        log::info!(
            "frame {} ({}x{}): {} | {} detections",
            report.frame_index,
            frame.frame.width,
            frame.frame.height,
            format_metrics(&report.metrics, report.inference_enabled),
            frame.detections.len()
        );
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Bulk mode: progress bar
// ----------------------------------------------------------------------------

pub struct ProgressSink {
    bar: Option<ProgressBar>,
    started: Instant,
}

impl ProgressSink {
    pub fn new(mode: UiMode, is_tty: bool, total: Option<u64>) -> Self {
        let bar = mode.use_pretty(is_tty).then(|| {
            let bar = match total {
                Some(total) => ProgressBar::new(total),
                None => ProgressBar::new_spinner(),
            };
            bar.set_draw_target(ProgressDrawTarget::stderr());
            let style = ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            if total.is_some() {
                bar.set_style(style);
            }
            bar
        });
        Self {
            bar,
            started: Instant::now(),
        }
    }
}

impl FrameSink for ProgressSink {
    fn render(&mut self, _frame: &AnnotatedFrame, report: &FrameReport) -> anyhow::Result<()> {
        let processed = report.progress.map_or(report.frame_index + 1, |p| p.processed);
        let message = format_metrics(&report.metrics, report.inference_enabled);
        match &self.bar {
            Some(bar) => {
                bar.set_position(processed);
                bar.set_message(message);
            }
            None => match report.progress.and_then(|p| p.total) {
                Some(total) => eprintln!("==> {}/{} {}", processed, total, message),
                None => eprintln!("==> {} {}", processed, message),
            },
        }
        Ok(())
    }

    fn complete(&mut self, report: &FrameReport) -> anyhow::Result<()> {
        let processed = report.progress.map_or(0, |p| p.processed);
        let message = format!(
            "✔ {} frames ({}) | {}",
            processed,
            format_duration(self.started.elapsed()),
            format_metrics(&report.metrics, report.inference_enabled)
        );
        match &self.bar {
            Some(bar) => {
                bar.set_position(processed);
                bar.finish_with_message(message);
            }
            None => eprintln!("{message}"),
        }
        Ok(())
    }
}

/// Forwards every call to two sinks, first `A` then `B`.
pub struct TeeSink<A, B>(pub A, pub B);

impl<A: FrameSink, B: FrameSink> FrameSink for TeeSink<A, B> {
    fn render(&mut self, frame: &AnnotatedFrame, report: &FrameReport) -> anyhow::Result<()> {
        self.0.render(frame, report)?;
        self.1.render(frame, report)
    }

    fn complete(&mut self, report: &FrameReport) -> anyhow::Result<()> {
        self.0.complete(report)?;
        self.1.complete(report)
    }
}

// ----------------------------------------------------------------------------
// JPEG snapshots
// ----------------------------------------------------------------------------

#[cfg(feature = "sink-jpeg")]
pub use jpeg::JpegSink;

#[cfg(feature = "sink-jpeg")]
mod jpeg {
    use anyhow::{anyhow, Context, Result};
    use image::codecs::jpeg::JpegEncoder;
    use image::{ImageBuffer, Rgb};
    use std::path::PathBuf;

    use crate::detect::AnnotatedFrame;
    use crate::frame::PixelFormat;
    use crate::pipeline::{FrameReport, FrameSink};

    /// Writes each rendered frame to `<dir>/frame_<index>.jpg`.
    pub struct JpegSink {
        dir: PathBuf,
        quality: u8,
        written: u64,
    }

    impl JpegSink {
        pub fn new(dir: impl Into<PathBuf>, quality: u8) -> Result<Self> {
            let dir = dir.into();
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create snapshot dir {}", dir.display()))?;
            Ok(Self {
                dir,
                quality: quality.clamp(1, 100),
                written: 0,
            })
        }

        pub fn written(&self) -> u64 {
            self.written
        }
    }

    impl FrameSink for JpegSink {
        fn render(&mut self, frame: &AnnotatedFrame, report: &FrameReport) -> Result<()> {
            let frame = &frame.frame;
            let mut rgb = frame.pixels().to_vec();
            if frame.format == PixelFormat::Bgr24 {
                for px in rgb.chunks_exact_mut(3) {
                    px.swap(0, 2);
                }
            }
            let image = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_vec(frame.width, frame.height, rgb)
                .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))?;

            let path = self.dir.join(format!("frame_{:06}.jpg", report.frame_index));
            let file = std::fs::File::create(&path)
                .with_context(|| format!("create {}", path.display()))?;
            let mut writer = std::io::BufWriter::new(file);
            JpegEncoder::new_with_quality(&mut writer, self.quality)
                .encode_image(&image)
                .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
            self.written += 1;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, PixelFormat};
    use crate::pipeline::Progress;

    fn annotated() -> AnnotatedFrame {
        AnnotatedFrame::passthrough(
            Frame::new(vec![0u8; 3], 1, 1, PixelFormat::Rgb24, 0).expect("frame"),
        )
    }

    fn report(index: u64) -> FrameReport {
        FrameReport {
            frame_index: index,
            metrics: MetricsSnapshot::default(),
            inference_enabled: false,
            progress: Some(Progress {
                processed: index + 1,
                total: Some(10),
            }),
        }
    }

    #[test]
    fn plain_mode_never_draws_bars() {
        assert!(!UiMode::Plain.use_pretty(true));
        assert!(!UiMode::Auto.use_pretty(false));
        assert!(UiMode::from_flag(Some("pretty")).use_pretty(true));
    }

    #[test]
    fn log_sink_is_rate_limited() -> anyhow::Result<()> {
        let mut sink = LogSink::new(Duration::from_secs(60));
        for index in 0..5 {
            sink.render(&annotated(), &report(index))?;
        }
        assert_eq!(sink.lines(), 1);
        Ok(())
    }

    #[test]
    fn plain_progress_sink_accepts_reports() -> anyhow::Result<()> {
        let mut sink = ProgressSink::new(UiMode::Plain, false, Some(10));
        sink.render(&annotated(), &report(0))?;
        sink.complete(&report(9))?;
        Ok(())
    }

    #[test]
    fn metrics_line_mentions_disabled_inference() {
        let line = format_metrics(&MetricsSnapshot::default(), false);
        assert!(line.contains("inference off"));
        assert!(!line.contains("RAM"));
    }

    #[test]
    fn metrics_line_reports_resident_memory() {
        let metrics = MetricsSnapshot {
            overall_fps: 30.0,
            rss_mb: Some(123.44),
            ..MetricsSnapshot::default()
        };
        assert_eq!(
            format_metrics(&metrics, true),
            "30.0 fps overall | 0.0 fps inference | 0.0 ms avg | 123.4 MB RAM"
        );
    }
}
