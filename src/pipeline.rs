//! Pipeline runner: fetch → infer → record metrics → render.
//!
//! Two modes share the same per-frame steps:
//! - stream: unbounded, renders every frame, rolling `MetricsWindow`
//! - bulk: finite, inference mandatory, renders every Nth frame plus a final
//!   completion call, cumulative metrics and progress
//!
//! Each report carries the process resident memory when `track_memory` is
//! set, and `overlay` draws a stats banner onto every rendered frame.
//!
//! The runner is responsible for releasing the source on every exit path.
//! Inference and sink errors are not skipped per frame: they end the run.

use std::time::{Duration, Instant};

use crate::detect::{draw_stats_banner, stats_text, AnnotatedFrame, InferenceStage};
use crate::error::{PipelineError, PipelineResult};
use crate::ingest::{Fetch, FrameSource, SourceStats};
use crate::metrics::{
    CumulativeMetrics, MemorySampler, MetricsSnapshot, MetricsWindow, METRICS_WINDOW,
};
use crate::StopHandle;

/// Default bulk-mode render throttle.
pub const DEFAULT_RENDER_EVERY: u64 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Bulk mode renders frame `i` (0-based) when `i % render_every == 0`.
    pub render_every: u64,
    /// Stream-mode metrics window size.
    pub window: usize,
    /// Draw the model / latency / fps / memory banner onto rendered frames.
    pub overlay: bool,
    /// Sample process resident memory into every snapshot.
    pub track_memory: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            render_every: DEFAULT_RENDER_EVERY,
            window: METRICS_WINDOW,
            overlay: false,
            track_memory: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Sink interface
// ----------------------------------------------------------------------------

/// Bulk-mode progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    pub processed: u64,
    /// `None` when the resource did not report its length.
    pub total: Option<u64>,
}

impl Progress {
    /// 0..=1, or `None` when the total is unknown.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.processed as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// What the sink is told alongside each rendered frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameReport {
    /// 0-based index of the frame within this run.
    pub frame_index: u64,
    pub metrics: MetricsSnapshot,
    pub inference_enabled: bool,
    /// Set in bulk mode only.
    pub progress: Option<Progress>,
}

/// Display collaborator. Must return promptly; the loop waits on it.
pub trait FrameSink {
    fn render(&mut self, frame: &AnnotatedFrame, report: &FrameReport) -> anyhow::Result<()>;

    /// Final bulk-mode flush with the last snapshot.
    fn complete(&mut self, _report: &FrameReport) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn render(&mut self, frame: &AnnotatedFrame, report: &FrameReport) -> anyhow::Result<()> {
        (**self).render(frame, report)
    }

    fn complete(&mut self, report: &FrameReport) -> anyhow::Result<()> {
        (**self).complete(report)
    }
}

/// Adapts a closure into a `FrameSink`.
pub struct FnSink<F>(F);

impl<F> FnSink<F>
where
    F: FnMut(&AnnotatedFrame, &FrameReport) -> anyhow::Result<()>,
{
    pub fn new(render: F) -> Self {
        Self(render)
    }
}

impl<F> FrameSink for FnSink<F>
where
    F: FnMut(&AnnotatedFrame, &FrameReport) -> anyhow::Result<()>,
{
    fn render(&mut self, frame: &AnnotatedFrame, report: &FrameReport) -> anyhow::Result<()> {
        (self.0)(frame, report)
    }
}

// ----------------------------------------------------------------------------
// Run results
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The stop handle was triggered.
    Stopped,
    /// The source reported a clean end of stream.
    EndOfStream,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub frames: u64,
    pub inferences: u64,
    pub renders: u64,
    pub outcome: RunOutcome,
    pub metrics: MetricsSnapshot,
    pub source: SourceStats,
    pub elapsed: Duration,
}

// ----------------------------------------------------------------------------
// Runner
// ----------------------------------------------------------------------------

pub struct PipelineRunner {
    stage: Option<InferenceStage>,
    config: RunnerConfig,
    stop: StopHandle,
    memory: Option<MemorySampler>,
}

struct Counters {
    frames: u64,
    inferences: u64,
    renders: u64,
}

impl PipelineRunner {
    /// `stage = None` runs stream mode without inference.
    pub fn new(stage: Option<InferenceStage>, config: RunnerConfig) -> Self {
        Self {
            stage,
            config,
            stop: StopHandle::new(),
            memory: config.track_memory.then(MemorySampler::new),
        }
    }

    /// Share an externally owned stop signal (e.g. wired to Ctrl-C).
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn inference_enabled(&self) -> bool {
        self.stage.is_some()
    }

    /// Run until the stop handle fires, the source ends, or an error occurs.
    /// The source is stopped before this returns.
    pub fn run_stream(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
    ) -> PipelineResult<RunSummary> {
        log::info!(
            "pipeline: stream mode on {} (inference {})",
            source.name(),
            if self.inference_enabled() { "on" } else { "off" }
        );
        let started = Instant::now();
        let mut window = MetricsWindow::with_capacity(self.config.window);
        let result = self.stream_loop(source, sink, &mut window);
        source.stop();
        let metrics = window.snapshot().with_rss(self.sample_memory());
        self.finish(result, source, metrics, started)
    }

    /// Process a finite source to its end.
    ///
    /// `total` overrides the source's own frame-count hint. The sink sees
    /// every `render_every`-th frame and then one `complete` call.
    pub fn run_bulk(
        &mut self,
        source: &mut dyn FrameSource,
        total: Option<u64>,
        sink: &mut dyn FrameSink,
    ) -> PipelineResult<RunSummary> {
        let started = Instant::now();
        if self.stage.is_none() {
            source.stop();
            return Err(PipelineError::Config(
                "bulk mode requires an inference backend".to_string(),
            ));
        }
        let total = total.or_else(|| source.frame_count_hint());
        log::info!(
            "pipeline: bulk mode on {} ({} frames)",
            source.name(),
            total.map_or_else(|| "unknown".to_string(), |t| t.to_string())
        );
        let mut metrics = CumulativeMetrics::new();
        let result = self.bulk_loop(source, sink, total, &mut metrics);
        source.stop();
        let metrics = metrics.snapshot().with_rss(self.sample_memory());
        self.finish(result, source, metrics, started)
    }

    fn sample_memory(&mut self) -> Option<f64> {
        self.memory.as_mut().and_then(MemorySampler::sample)
    }

    /// Stamp the stats banner when the overlay is on.
    fn decorate(
        &self,
        annotated: &mut AnnotatedFrame,
        latency: Option<Duration>,
        metrics: &MetricsSnapshot,
    ) {
        if !self.config.overlay {
            return;
        }
        let model = self.stage.as_ref().map(InferenceStage::backend_name);
        draw_stats_banner(&mut annotated.frame, &stats_text(model, latency, metrics));
    }

    fn finish(
        &self,
        result: PipelineResult<(RunOutcome, Counters)>,
        source: &dyn FrameSource,
        metrics: MetricsSnapshot,
        started: Instant,
    ) -> PipelineResult<RunSummary> {
        match result {
            Ok((outcome, counters)) => {
                let summary = RunSummary {
                    frames: counters.frames,
                    inferences: counters.inferences,
                    renders: counters.renders,
                    outcome,
                    metrics,
                    source: source.stats(),
                    elapsed: started.elapsed(),
                };
                log::info!(
                    "pipeline: {:?} after {} frames ({:.1} fps, {:.1} ms avg inference)",
                    summary.outcome,
                    summary.frames,
                    summary.metrics.overall_fps,
                    summary.metrics.avg_inference_ms()
                );
                Ok(summary)
            }
            Err(err) => {
                log::warn!("pipeline: run on {} failed: {}", source.name(), err);
                Err(err)
            }
        }
    }

    fn stream_loop(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        window: &mut MetricsWindow,
    ) -> PipelineResult<(RunOutcome, Counters)> {
        let mut counters = Counters {
            frames: 0,
            inferences: 0,
            renders: 0,
        };
        loop {
            if self.stop.is_stopped() {
                return Ok((RunOutcome::Stopped, counters));
            }
            let frame = match source.next_frame()? {
                Fetch::Frame(frame) => frame,
                Fetch::Pending => continue,
                Fetch::EndOfStream => {
                    // A stop request can surface as end of stream.
                    let outcome = if self.stop.is_stopped() {
                        RunOutcome::Stopped
                    } else {
                        RunOutcome::EndOfStream
                    };
                    return Ok((outcome, counters));
                }
            };
            let fetched_at = Instant::now();

            let (mut annotated, latency) = match self.stage.as_mut() {
                Some(stage) => {
                    let (annotated, elapsed) = stage.infer(frame)?;
                    window.record_inference(elapsed);
                    counters.inferences += 1;
                    (annotated, Some(elapsed))
                }
                None => (AnnotatedFrame::passthrough(frame), None),
            };
            window.record_frame(fetched_at);

            let metrics = window.snapshot().with_rss(self.sample_memory());
            self.decorate(&mut annotated, latency, &metrics);
            let report = FrameReport {
                frame_index: counters.frames,
                metrics,
                inference_enabled: self.inference_enabled(),
                progress: None,
            };
            counters.frames += 1;
            sink.render(&annotated, &report).map_err(sink_error)?;
            counters.renders += 1;
        }
    }

    fn bulk_loop(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        total: Option<u64>,
        metrics: &mut CumulativeMetrics,
    ) -> PipelineResult<(RunOutcome, Counters)> {
        let render_every = self.config.render_every.max(1);
        let mut counters = Counters {
            frames: 0,
            inferences: 0,
            renders: 0,
        };
        let outcome = loop {
            if self.stop.is_stopped() {
                break RunOutcome::Stopped;
            }
            let frame = match source.next_frame()? {
                Fetch::Frame(frame) => frame,
                Fetch::Pending => continue,
                Fetch::EndOfStream => break RunOutcome::EndOfStream,
            };
            let fetched_at = Instant::now();

            let Some(stage) = self.stage.as_mut() else {
                return Err(PipelineError::Config(
                    "bulk mode requires an inference backend".to_string(),
                ));
            };
            let (mut annotated, elapsed) = stage.infer(frame)?;
            counters.inferences += 1;
            metrics.record_inference(elapsed);
            metrics.record_frame(fetched_at);

            let index = counters.frames;
            counters.frames += 1;
            if index % render_every == 0 {
                let snapshot = metrics.snapshot().with_rss(self.sample_memory());
                self.decorate(&mut annotated, Some(elapsed), &snapshot);
                let report = FrameReport {
                    frame_index: index,
                    metrics: snapshot,
                    inference_enabled: true,
                    progress: Some(Progress {
                        processed: counters.frames,
                        total,
                    }),
                };
                sink.render(&annotated, &report).map_err(sink_error)?;
                counters.renders += 1;
            }
        };

        let report = FrameReport {
            frame_index: counters.frames.saturating_sub(1),
            metrics: metrics.snapshot().with_rss(self.sample_memory()),
            inference_enabled: true,
            progress: Some(Progress {
                processed: counters.frames,
                total,
            }),
        };
        sink.complete(&report).map_err(sink_error)?;
        Ok((outcome, counters))
    }
}

fn sink_error(err: anyhow::Error) -> PipelineError {
    PipelineError::Sink(format!("{err:#}"))
}
