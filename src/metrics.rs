//! Rolling and cumulative performance statistics.
//!
//! Owned exclusively by the pipeline's consumer thread; nothing here is
//! shared with capture threads.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};

/// Samples kept by a stream-mode window.
pub const METRICS_WINDOW: usize = 30;

/// Minimum time between two process memory reads.
pub const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Point-in-time view of the pipeline's throughput.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Frames per second through the whole loop (fetch, infer, render).
    pub overall_fps: f64,
    /// Reciprocal of the average inference latency. 0 when inference is off.
    pub inference_fps: f64,
    #[serde(with = "duration_ms")]
    pub avg_inference_latency: Duration,
    /// Resident set size of this process in MiB, when sampled.
    pub rss_mb: Option<f64>,
}

impl MetricsSnapshot {
    fn derive(frame_count: usize, span: Duration, latency_sum: Duration, samples: usize) -> Self {
        let overall_fps = if frame_count >= 2 && !span.is_zero() {
            (frame_count - 1) as f64 / span.as_secs_f64()
        } else {
            0.0
        };
        let avg = if samples == 0 {
            Duration::ZERO
        } else {
            latency_sum / samples as u32
        };
        let inference_fps = if avg.is_zero() {
            0.0
        } else {
            1.0 / avg.as_secs_f64()
        };
        Self {
            overall_fps,
            inference_fps,
            avg_inference_latency: avg,
            rss_mb: None,
        }
    }

    pub fn with_rss(self, rss_mb: Option<f64>) -> Self {
        Self { rss_mb, ..self }
    }

    pub fn avg_inference_ms(&self) -> f64 {
        self.avg_inference_latency.as_micros() as f64 / 1000.0
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_micros() as f64 / 1000.0)
    }
}

// ----------------------------------------------------------------------------
// Process memory
// ----------------------------------------------------------------------------

/// Samples this process's resident memory, at most once per interval.
///
/// Between reads the last value is returned. Platforms where the process
/// cannot be inspected yield `None`.
pub struct MemorySampler {
    system: System,
    pid: Option<Pid>,
    interval: Duration,
    last_read: Option<Instant>,
    rss_mb: Option<f64>,
}

impl MemorySampler {
    pub fn new() -> Self {
        Self::with_interval(MEMORY_SAMPLE_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(err) => {
                log::warn!("metrics: process memory unavailable: {}", err);
                None
            }
        };
        Self {
            system: System::new(),
            pid,
            interval,
            last_read: None,
            rss_mb: None,
        }
    }

    pub fn sample(&mut self) -> Option<f64> {
        let due = self
            .last_read
            .map_or(true, |last| last.elapsed() >= self.interval);
        if due {
            self.last_read = Some(Instant::now());
            self.rss_mb = self.read();
        }
        self.rss_mb
    }

    fn read(&mut self) -> Option<f64> {
        let pid = self.pid?;
        if !self.system.refresh_process(pid) {
            return None;
        }
        self.system
            .process(pid)
            .map(|process| process.memory() as f64 / BYTES_PER_MB)
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Rolling window (stream mode)
// ----------------------------------------------------------------------------

/// Two independent fixed-capacity rings: frame timestamps and inference durations.
#[derive(Clone, Debug)]
pub struct MetricsWindow {
    capacity: usize,
    frames: VecDeque<Instant>,
    inferences: VecDeque<Duration>,
}

impl MetricsWindow {
    pub fn new() -> Self {
        Self::with_capacity(METRICS_WINDOW)
    }

    /// A window of `capacity` samples (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            frames: VecDeque::with_capacity(capacity),
            inferences: VecDeque::with_capacity(capacity),
        }
    }

    pub fn record_frame(&mut self, at: Instant) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(at);
    }

    pub fn record_inference(&mut self, duration: Duration) {
        if self.inferences.len() == self.capacity {
            self.inferences.pop_front();
        }
        self.inferences.push_back(duration);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let span = match (self.frames.front(), self.frames.back()) {
            (Some(first), Some(last)) => last.saturating_duration_since(*first),
            _ => Duration::ZERO,
        };
        MetricsSnapshot::derive(
            self.frames.len(),
            span,
            self.inferences.iter().sum(),
            self.inferences.len(),
        )
    }

    pub fn frame_samples(&self) -> usize {
        self.frames.len()
    }

    pub fn inference_samples(&self) -> usize {
        self.inferences.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MetricsWindow {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Cumulative totals (bulk mode)
// ----------------------------------------------------------------------------

/// Averages over every frame processed so far.
///
/// Bulk runs cover a bounded sequence, so unlike `MetricsWindow` nothing is
/// evicted.
#[derive(Clone, Debug, Default)]
pub struct CumulativeMetrics {
    first_frame: Option<Instant>,
    last_frame: Option<Instant>,
    frames: usize,
    inference_total: Duration,
    inferences: usize,
}

impl CumulativeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&mut self, at: Instant) {
        if self.first_frame.is_none() {
            self.first_frame = Some(at);
        }
        self.last_frame = Some(at);
        self.frames += 1;
    }

    pub fn record_inference(&mut self, duration: Duration) {
        self.inference_total += duration;
        self.inferences += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let span = match (self.first_frame, self.last_frame) {
            (Some(first), Some(last)) => last.saturating_duration_since(first),
            _ => Duration::ZERO,
        };
        MetricsSnapshot::derive(self.frames, span, self.inference_total, self.inferences)
    }

    pub fn frames(&self) -> usize {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn overall_fps_needs_two_timestamps() {
        let mut window = MetricsWindow::new();
        assert_eq!(window.snapshot().overall_fps, 0.0);

        let t0 = Instant::now();
        window.record_frame(t0);
        assert_eq!(window.snapshot().overall_fps, 0.0);

        window.record_frame(t0 + Duration::from_secs(1));
        assert!(approx(window.snapshot().overall_fps, 1.0));
    }

    #[test]
    fn equal_timestamps_report_zero_fps() {
        let mut window = MetricsWindow::new();
        let t0 = Instant::now();
        window.record_frame(t0);
        window.record_frame(t0);
        assert_eq!(window.snapshot().overall_fps, 0.0);
    }

    #[test]
    fn inference_fps_is_reciprocal_of_mean_latency() {
        let mut window = MetricsWindow::new();
        assert_eq!(window.snapshot().inference_fps, 0.0);
        for _ in 0..4 {
            window.record_inference(Duration::from_millis(100));
        }
        let snapshot = window.snapshot();
        assert_eq!(snapshot.avg_inference_latency, Duration::from_millis(100));
        assert!(approx(snapshot.inference_fps, 10.0));
    }

    #[test]
    fn zero_latency_reports_zero_inference_fps() {
        let mut window = MetricsWindow::new();
        window.record_inference(Duration::ZERO);
        assert_eq!(window.snapshot().inference_fps, 0.0);
    }

    #[test]
    fn window_evicts_oldest_samples() {
        let t0 = Instant::now();
        for inserts in [30usize, 31, 45, 100] {
            let mut window = MetricsWindow::new();
            for i in 0..inserts {
                window.record_frame(t0 + Duration::from_millis(100 * i as u64));
                window.record_inference(Duration::from_millis(if i == 0 { 1_000 } else { 50 }));
            }
            assert_eq!(window.frame_samples(), METRICS_WINDOW);
            assert_eq!(window.inference_samples(), METRICS_WINDOW);
            // 30 timestamps 100 ms apart.
            assert!(approx(window.snapshot().overall_fps, 10.0));
            if inserts > METRICS_WINDOW {
                assert_eq!(
                    window.snapshot().avg_inference_latency,
                    Duration::from_millis(50)
                );
            }
        }
    }

    #[test]
    fn cumulative_metrics_keep_every_sample() {
        let mut metrics = CumulativeMetrics::new();
        let t0 = Instant::now();
        for i in 0..50u64 {
            metrics.record_frame(t0 + Duration::from_millis(20 * i));
            metrics.record_inference(Duration::from_millis(if i < 25 { 10 } else { 30 }));
        }
        let snapshot = metrics.snapshot();
        assert_eq!(metrics.frames(), 50);
        assert_eq!(snapshot.avg_inference_latency, Duration::from_millis(20));
        assert!(approx(snapshot.overall_fps, 50.0));
    }

    #[test]
    fn snapshot_serializes_latency_in_ms() -> anyhow::Result<()> {
        let snapshot = MetricsSnapshot {
            overall_fps: 12.5,
            inference_fps: 20.0,
            avg_inference_latency: Duration::from_millis(50),
            rss_mb: Some(64.0),
        };
        let json = serde_json::to_value(snapshot)?;
        assert_eq!(json["avg_inference_latency"], 50.0);
        assert_eq!(json["rss_mb"], 64.0);
        Ok(())
    }

    #[test]
    fn memory_sampler_reports_resident_set() {
        let mut sampler = MemorySampler::with_interval(Duration::from_secs(60));
        let first = sampler.sample();
        if cfg!(any(target_os = "linux", target_os = "macos", target_os = "windows")) {
            assert!(first.is_some_and(|mb| mb > 0.0));
        }
        // Within the interval the cached value is returned.
        assert_eq!(sampler.sample(), first);
    }
}
