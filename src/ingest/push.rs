//! Push frame source: an owned capture thread feeding a lossy `FrameBuffer`.
//!
//! The capture thread owns the device handle for its whole life and is the
//! only code that opens, reads, and releases it. The consumer and the thread
//! share exactly three things:
//! - the `FrameBuffer` (data)
//! - a sticky error cell, set at most once by the thread
//! - a stop flag, observed at each poll boundary
//!
//! Teardown order on the capture thread: stop flag seen -> loop exit ->
//! `halt` -> settle delay (physical devices) -> `close`.

use crossbeam_channel::RecvTimeoutError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{CaptureDevice, Fetch, FrameSource, SourceStats};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::FrameBuffer;

/// Initial exposure / white-balance control values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CameraControls {
    pub auto_exposure: bool,
    pub auto_white_balance: bool,
}

impl Default for CameraControls {
    fn default() -> Self {
        Self {
            auto_exposure: true,
            auto_white_balance: true,
        }
    }
}

/// Timing knobs for a push source.
#[derive(Clone, Debug)]
pub struct PushOptions {
    /// How long `start` waits after the device opened before frames are trusted.
    pub warmup: Duration,
    /// Delay between halting and closing a physical device.
    pub settle: Duration,
    /// Upper bound on a single `next_frame` wait.
    pub frame_wait: Duration,
    /// How long `start` waits for the device to open.
    pub startup_timeout: Duration,
    pub controls: CameraControls,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(2),
            settle: Duration::from_millis(300),
            frame_wait: Duration::from_secs(1),
            startup_timeout: Duration::from_secs(5),
            controls: CameraControls::default(),
        }
    }
}

/// What the capture thread reports when it exits.
#[derive(Clone, Copy, Debug, Default)]
struct CaptureReport {
    frames_captured: u64,
    frames_dropped: u64,
}

pub struct PushSource {
    name: String,
    buffer: FrameBuffer,
    stop_flag: Arc<AtomicBool>,
    error: Arc<OnceLock<String>>,
    frame_wait: Duration,
    handle: Option<JoinHandle<CaptureReport>>,
    frames_delivered: u64,
    final_report: Option<CaptureReport>,
}

impl PushSource {
    /// Spawn the capture thread and wait until the device is open and warmed up.
    ///
    /// Returns `OpenFailure` if the device cannot be opened, fails during
    /// warm-up, or does not open within `startup_timeout`. On every failure
    /// the capture thread has exited and the device is closed before this
    /// returns.
    pub fn start(device: Box<dyn CaptureDevice>, options: PushOptions) -> PipelineResult<Self> {
        let name = device.name().to_string();
        let buffer = FrameBuffer::new();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let error = Arc::new(OnceLock::new());
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);

        let link = CaptureLink {
            buffer: buffer.clone(),
            stop_flag: Arc::clone(&stop_flag),
            error: Arc::clone(&error),
            settle: options.settle,
            controls: options.controls,
        };
        let handle = thread::Builder::new()
            .name(format!("capture:{}", name))
            .spawn(move || capture_loop(device, link, ready_tx))
            .map_err(|err| PipelineError::open(name.clone(), err))?;

        match ready_rx.recv_timeout(options.startup_timeout) {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                let _ = handle.join();
                log::warn!("PushSource: failed to open {}: {}", name, reason);
                return Err(PipelineError::open(name, reason));
            }
            Err(RecvTimeoutError::Timeout) => {
                // The thread is still inside `open`. It sees the flag once
                // `open` returns and releases the device; wait for that so no
                // handle outlives the failed start.
                stop_flag.store(true, Ordering::SeqCst);
                log::warn!(
                    "PushSource: {} did not open within {:?}; waiting for capture thread to release it",
                    name,
                    options.startup_timeout
                );
                if handle.join().is_err() {
                    log::error!("PushSource: capture thread for {} panicked", name);
                }
                return Err(PipelineError::open(
                    name,
                    format!("device did not open within {:?}", options.startup_timeout),
                ));
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                return Err(PipelineError::open(name, "capture thread exited during startup"));
            }
        }

        let mut source = Self {
            name,
            buffer,
            stop_flag,
            error,
            frame_wait: options.frame_wait,
            handle: Some(handle),
            frames_delivered: 0,
            final_report: None,
        };

        if !options.warmup.is_zero() {
            thread::sleep(options.warmup);
        }
        if let Some(reason) = source.error.get().cloned() {
            source.stop();
            return Err(PipelineError::open(source.name.clone(), reason));
        }

        log::info!("PushSource: connected to {}", source.name);
        Ok(source)
    }

    /// Once the error cell is set, every frame queued before it is visible:
    /// hand those out first, then release the device and report the error.
    fn drain_or_fail(&mut self, reason: String) -> PipelineResult<Fetch> {
        if let Some(frame) = self.buffer.get(Duration::ZERO) {
            self.frames_delivered += 1;
            return Ok(Fetch::Frame(frame));
        }
        log::warn!("PushSource: capture failed on {}: {}", self.name, reason);
        self.stop();
        Err(PipelineError::capture(self.name.clone(), reason))
    }
}

impl FrameSource for PushSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self) -> PipelineResult<Fetch> {
        if self.handle.is_none() {
            return Ok(Fetch::EndOfStream);
        }

        // Frames captured before a failure are still delivered in order.
        if let Some(frame) = self.buffer.get(Duration::ZERO) {
            self.frames_delivered += 1;
            return Ok(Fetch::Frame(frame));
        }
        if let Some(reason) = self.error.get().cloned() {
            return self.drain_or_fail(reason);
        }

        match self.buffer.get(self.frame_wait) {
            Some(frame) => {
                self.frames_delivered += 1;
                Ok(Fetch::Frame(frame))
            }
            None => match self.error.get().cloned() {
                Some(reason) => self.drain_or_fail(reason),
                None => Ok(Fetch::Pending),
            },
        }
    }

    /// Signal the capture thread and block until it has exited and released
    /// the device.
    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop_flag.store(true, Ordering::SeqCst);
        let started = Instant::now();
        match handle.join() {
            Ok(report) => {
                log::info!(
                    "PushSource: stopped {} in {:?} (captured={}, dropped={})",
                    self.name,
                    started.elapsed(),
                    report.frames_captured,
                    report.frames_dropped
                );
                self.final_report = Some(report);
            }
            Err(_) => log::error!("PushSource: capture thread for {} panicked", self.name),
        }
        let discarded = self.buffer.clear();
        if discarded > 0 {
            log::debug!("PushSource: discarded {} undelivered frames", discarded);
        }
    }

    fn is_live(&self) -> bool {
        self.handle.is_some() && self.error.get().is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            name: self.name.clone(),
            frames_delivered: self.frames_delivered,
            frames_dropped: self.final_report.map(|r| r.frames_dropped).unwrap_or(0),
        }
    }
}

impl Drop for PushSource {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------------
// Capture thread
// ----------------------------------------------------------------------------

struct CaptureLink {
    buffer: FrameBuffer,
    stop_flag: Arc<AtomicBool>,
    error: Arc<OnceLock<String>>,
    settle: Duration,
    controls: CameraControls,
}

fn capture_loop(
    mut device: Box<dyn CaptureDevice>,
    link: CaptureLink,
    ready: crossbeam_channel::Sender<Result<(), String>>,
) -> CaptureReport {
    let mut report = CaptureReport::default();

    let opened = device
        .open()
        .and_then(|()| device.apply_controls(&link.controls));
    if let Err(err) = opened {
        let reason = format!("{err:#}");
        let _ = link.error.set(reason.clone());
        let _ = ready.send(Err(reason));
        device.close();
        return report;
    }
    let _ = ready.send(Ok(()));

    while !link.stop_flag.load(Ordering::SeqCst) {
        match device.read() {
            Ok(Some(frame)) => {
                report.frames_captured += 1;
                if !link.buffer.try_put(frame) {
                    report.frames_dropped += 1;
                    log::debug!("capture buffer full on {}; frame dropped", device.name());
                }
            }
            Ok(None) => {
                let _ = link.error.set("capture stream ended unexpectedly".to_string());
                break;
            }
            Err(err) => {
                // Errors caused by our own shutdown are not failures.
                if !link.stop_flag.load(Ordering::SeqCst) {
                    let _ = link.error.set(format!("{err:#}"));
                }
                break;
            }
        }
    }

    device.halt();
    if device.is_physical() && !link.settle.is_zero() {
        thread::sleep(link.settle);
    }
    device.close();
    report
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::synthetic::{SyntheticConfig, SyntheticDevice};
    use anyhow::Result;
    use std::sync::atomic::AtomicUsize;

    fn fast_options() -> PushOptions {
        PushOptions {
            warmup: Duration::ZERO,
            settle: Duration::ZERO,
            frame_wait: Duration::from_millis(200),
            startup_timeout: Duration::from_secs(2),
            controls: CameraControls::default(),
        }
    }

    fn device(config: SyntheticConfig) -> SyntheticDevice {
        SyntheticDevice::new(SyntheticConfig {
            width: 16,
            height: 12,
            ..config
        })
    }

    #[test]
    fn delivers_frames_in_capture_order() -> Result<()> {
        let mut source = PushSource::start(
            Box::new(device(SyntheticConfig {
                fps: 200,
                ..SyntheticConfig::default()
            })),
            fast_options(),
        )?;
        let mut last: Option<u64> = None;
        let mut received = 0;
        while received < 10 {
            if let Fetch::Frame(frame) = source.next_frame()? {
                if let Some(prev) = last {
                    assert!(frame.sequence > prev, "frames must not be reordered");
                }
                last = Some(frame.sequence);
                received += 1;
            }
        }
        source.stop();
        assert_eq!(source.stats().frames_delivered, 10);
        Ok(())
    }

    #[test]
    fn stop_joins_capture_thread_and_releases_device() -> Result<()> {
        let device = device(SyntheticConfig::default());
        let counters = device.counters();
        let mut source = PushSource::start(Box::new(device), fast_options())?;

        source.stop();
        assert_eq!(counters.closes(), 1, "device must be released before stop returns");
        assert!(!source.is_live());

        let started = Instant::now();
        assert!(matches!(source.next_frame()?, Fetch::EndOfStream));
        assert!(started.elapsed() < Duration::from_millis(100));

        source.stop();
        drop(source);
        assert_eq!(counters.closes(), 1);
        Ok(())
    }

    #[test]
    fn slow_consumer_drops_frames_instead_of_blocking() -> Result<()> {
        let mut source = PushSource::start(
            Box::new(device(SyntheticConfig::default())),
            fast_options(),
        )?;
        thread::sleep(Duration::from_millis(50));
        source.stop();
        let stats = source.stats();
        assert!(stats.frames_dropped > 0);
        Ok(())
    }

    #[test]
    fn open_failure_surfaces_from_start() {
        let device = device(SyntheticConfig {
            fail_open: true,
            ..SyntheticConfig::default()
        });
        let counters = device.counters();
        let err = PushSource::start(Box::new(device), fast_options())
            .err()
            .expect("start must fail");
        assert!(matches!(err, PipelineError::OpenFailure { .. }));
        assert_eq!(counters.closes(), 1);
    }

    /// Device whose `open` blocks, tracking how many handles are open at once.
    struct SlowOpenDevice {
        open_delay: Duration,
        live: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        opened: bool,
    }

    impl CaptureDevice for SlowOpenDevice {
        fn name(&self) -> &str {
            "slow://camera"
        }

        fn open(&mut self) -> Result<()> {
            let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.opened = true;
            thread::sleep(self.open_delay);
            Ok(())
        }

        fn read(&mut self) -> Result<Option<crate::frame::Frame>> {
            thread::sleep(Duration::from_millis(5));
            Ok(None)
        }

        fn close(&mut self) {
            if std::mem::take(&mut self.opened) {
                self.live.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn startup_timeout_waits_for_device_release() {
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let options = PushOptions {
            startup_timeout: Duration::from_millis(50),
            ..fast_options()
        };

        for _ in 0..2 {
            let device = SlowOpenDevice {
                open_delay: Duration::from_millis(300),
                live: Arc::clone(&live),
                peak: Arc::clone(&peak),
                opened: false,
            };
            let started = Instant::now();
            let err = PushSource::start(Box::new(device), options.clone())
                .err()
                .expect("start must time out");
            assert!(matches!(err, PipelineError::OpenFailure { .. }));
            assert!(err.to_string().contains("did not open within"));
            assert!(started.elapsed() >= Duration::from_millis(300));
            assert_eq!(live.load(Ordering::SeqCst), 0, "device still open after start failed");
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn capture_failure_is_sticky_and_reported_once() -> Result<()> {
        let device = device(SyntheticConfig {
            fps: 50,
            fail_after: Some(2),
            ..SyntheticConfig::default()
        });
        let counters = device.counters();
        let mut source = PushSource::start(Box::new(device), fast_options())?;

        let mut frames = 0;
        let err = loop {
            match source.next_frame() {
                Ok(Fetch::Frame(_)) => frames += 1,
                Ok(Fetch::Pending) => continue,
                Ok(Fetch::EndOfStream) => panic!("end of stream before failure"),
                Err(err) => break err,
            }
        };
        assert_eq!(frames, 2);
        assert!(matches!(err, PipelineError::CaptureFailure { .. }));
        assert!(matches!(source.next_frame()?, Fetch::EndOfStream));
        assert_eq!(counters.closes(), 1);
        Ok(())
    }
}
