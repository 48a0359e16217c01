use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};

use edge_vision::ingest::{PushOptions, PushSource, SyntheticConfig, SyntheticDevice};
use edge_vision::{
    open_source, AnnotatedFrame, CameraRegistry, Fetch, FnSink, Frame, FrameReport, FrameSink,
    FrameSource, InferenceBackend, InferenceParams, InferenceStage, PipelineError,
    PipelineRunner, PipelineState, PixelFormat, Progress, RunOutcome, RunnerConfig, SourceConfig,
    SourceKind,
};

/// Counts calls and optionally fails on a given call index.
struct CountingBackend {
    calls: Arc<AtomicUsize>,
    fail_on: Option<usize>,
}

impl InferenceBackend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn infer(&mut self, frame: Frame, _params: &InferenceParams) -> Result<AnnotatedFrame> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(call) {
            return Err(anyhow!("model crashed on call {}", call));
        }
        Ok(AnnotatedFrame::passthrough(frame))
    }
}

fn counting_stage(fail_on: Option<usize>) -> (InferenceStage, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let backend = CountingBackend {
        calls: Arc::clone(&calls),
        fail_on,
    };
    (
        InferenceStage::from_backend(backend, InferenceParams::default()),
        calls,
    )
}

#[derive(Default)]
struct RecordingSink {
    sequences: Vec<u64>,
    renders: Vec<FrameReport>,
    completions: Vec<FrameReport>,
}

impl FrameSink for RecordingSink {
    fn render(&mut self, frame: &AnnotatedFrame, report: &FrameReport) -> Result<()> {
        self.sequences.push(frame.frame.sequence);
        self.renders.push(*report);
        Ok(())
    }

    fn complete(&mut self, report: &FrameReport) -> Result<()> {
        self.completions.push(*report);
        Ok(())
    }
}

fn synthetic(name: &str, fps: u32, frames: Option<u64>, fail_after: Option<u64>) -> SyntheticDevice {
    SyntheticDevice::new(SyntheticConfig {
        name: name.to_string(),
        width: 32,
        height: 24,
        format: PixelFormat::Bgr24,
        fps,
        frames,
        fail_after,
        fail_open: false,
    })
}

fn fast_push_options() -> PushOptions {
    PushOptions {
        warmup: Duration::ZERO,
        settle: Duration::ZERO,
        frame_wait: Duration::from_millis(200),
        ..PushOptions::default()
    }
}

#[test]
fn bulk_run_over_ten_frames_renders_twice_and_completes() -> Result<()> {
    let config = SourceConfig {
        kind: SourceKind::Polling,
        uri: "stub://clip?frames=10&fps=0".to_string(),
        width: 32,
        height: 24,
        ..SourceConfig::default()
    };
    let mut source = open_source(&config)?;
    let (stage, calls) = counting_stage(None);
    let mut runner = PipelineRunner::new(Some(stage), RunnerConfig::default());
    let mut sink = RecordingSink::default();

    let summary = runner.run_bulk(source.as_mut(), None, &mut sink)?;

    assert_eq!(calls.load(Ordering::SeqCst), 10);
    assert_eq!(summary.inferences, 10);
    assert_eq!(summary.outcome, RunOutcome::EndOfStream);

    let rendered: Vec<u64> = sink.renders.iter().map(|r| r.frame_index).collect();
    assert_eq!(rendered, vec![0, 5]);
    assert_eq!(summary.renders, 2);

    assert_eq!(sink.completions.len(), 1);
    let progress = sink.completions[0].progress.expect("bulk progress");
    assert_eq!(
        progress,
        Progress {
            processed: 10,
            total: Some(10)
        }
    );
    assert_eq!(progress.fraction(), Some(1.0));
    assert!(!source.is_live());
    Ok(())
}

#[test]
fn capture_failure_after_frame_three_ends_stream_once() -> Result<()> {
    let device = synthetic("stub://flaky", 25, None, Some(3));
    let counters = device.counters();
    let mut source = PushSource::start(Box::new(device), fast_push_options())?;
    let mut runner = PipelineRunner::new(None, RunnerConfig::default());
    let mut sink = RecordingSink::default();

    let err = runner.run_stream(&mut source, &mut sink).unwrap_err();

    assert!(matches!(err, PipelineError::CaptureFailure { .. }));
    assert!(err.to_string().contains("after 3 frames"));
    assert_eq!(sink.sequences, vec![0, 1, 2]);
    assert_eq!(counters.opens(), 1);
    assert_eq!(counters.closes(), 1);

    // The failure was reported; the dead source now only ends.
    assert!(matches!(source.next_frame()?, Fetch::EndOfStream));
    assert!(matches!(source.next_frame()?, Fetch::EndOfStream));
    Ok(())
}

#[test]
fn stop_joins_capture_thread_and_releases_device() -> Result<()> {
    let device = synthetic("stub://live", 100, None, None);
    let counters = device.counters();
    let mut source = PushSource::start(Box::new(device), fast_push_options())?;
    let mut runner = PipelineRunner::new(None, RunnerConfig::default());
    let stop = runner.stop_handle();
    let mut sink = FnSink::new(|_frame: &AnnotatedFrame, report: &FrameReport| {
        if report.frame_index == 4 {
            stop.stop();
        }
        Ok(())
    });

    let summary = runner.run_stream(&mut source, &mut sink)?;

    assert_eq!(summary.outcome, RunOutcome::Stopped);
    assert_eq!(summary.frames, 5);
    assert_eq!(counters.closes(), 1);
    assert!(!source.is_live());
    assert!(matches!(source.next_frame()?, Fetch::EndOfStream));

    // Idempotent.
    source.stop();
    assert_eq!(counters.closes(), 1);
    Ok(())
}

#[test]
fn inference_failure_ends_run_and_releases_source() -> Result<()> {
    let device = synthetic("stub://model", 0, Some(20), None);
    let counters = device.counters();
    let mut source = edge_vision::PollingSource::open(Box::new(device))?;
    let (stage, calls) = counting_stage(Some(2));
    let mut runner = PipelineRunner::new(Some(stage), RunnerConfig::default());
    let mut sink = RecordingSink::default();

    let err = runner.run_stream(&mut source, &mut sink).unwrap_err();

    assert!(matches!(err, PipelineError::InferenceFailure { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(sink.sequences, vec![0, 1]);
    assert_eq!(counters.closes(), 1);
    Ok(())
}

#[test]
fn bulk_capture_failure_skips_completion() -> Result<()> {
    let device = synthetic("stub://clip", 0, Some(10), Some(7));
    let counters = device.counters();
    let mut source = edge_vision::PollingSource::open(Box::new(device))?;
    let (stage, calls) = counting_stage(None);
    let mut runner = PipelineRunner::new(Some(stage), RunnerConfig::default());
    let mut sink = RecordingSink::default();

    let err = runner.run_bulk(&mut source, None, &mut sink).unwrap_err();

    assert!(matches!(err, PipelineError::CaptureFailure { .. }));
    let message = err.to_string();
    assert!(message.contains("capture failed"), "{message}");
    assert!(message.contains("after 7 frames"), "{message}");
    assert_eq!(calls.load(Ordering::SeqCst), 7);
    let rendered: Vec<u64> = sink.renders.iter().map(|r| r.frame_index).collect();
    assert_eq!(rendered, vec![0, 5]);
    assert!(sink.completions.is_empty());
    assert_eq!(counters.closes(), 1);
    assert!(!source.is_live());
    Ok(())
}

#[test]
fn bulk_inference_failure_skips_completion() -> Result<()> {
    let device = synthetic("stub://clip", 0, Some(10), None);
    let counters = device.counters();
    let mut source = edge_vision::PollingSource::open(Box::new(device))?;
    let (stage, calls) = counting_stage(Some(3));
    let mut runner = PipelineRunner::new(Some(stage), RunnerConfig::default());
    let mut sink = RecordingSink::default();

    let err = runner.run_bulk(&mut source, None, &mut sink).unwrap_err();

    assert!(matches!(err, PipelineError::InferenceFailure { .. }));
    assert!(err.to_string().contains("model crashed on call 3"));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(sink.sequences, vec![0]);
    assert!(sink.completions.is_empty());
    assert_eq!(counters.closes(), 1);
    assert!(!source.is_live());
    Ok(())
}

#[test]
fn stream_metrics_reflect_inference() -> Result<()> {
    let mut source = edge_vision::PollingSource::open(Box::new(synthetic(
        "stub://metrics",
        0,
        Some(8),
        None,
    )))?;
    let (stage, _) = counting_stage(None);
    let mut runner = PipelineRunner::new(Some(stage), RunnerConfig::default());
    let mut sink = RecordingSink::default();

    let summary = runner.run_stream(&mut source, &mut sink)?;

    assert_eq!(summary.outcome, RunOutcome::EndOfStream);
    assert_eq!(summary.frames, 8);
    assert_eq!(summary.source.frames_delivered, 8);
    assert!(sink.renders.iter().all(|r| r.inference_enabled));
    assert_eq!(sink.renders[0].metrics.overall_fps, 0.0);
    Ok(())
}

#[test]
fn registry_reinitialises_when_source_kind_changes() -> Result<()> {
    let mut registry = CameraRegistry::new();
    let polling = SourceConfig {
        kind: SourceKind::Polling,
        uri: "stub://slot?frames=3&fps=0".to_string(),
        width: 16,
        height: 16,
        ..SourceConfig::default()
    };
    let mut runner = PipelineRunner::new(None, RunnerConfig::default());
    let mut sink = RecordingSink::default();

    let summary = registry.run_stream("main", &polling, &mut runner, &mut sink)?;
    assert_eq!(summary.frames, 3);
    assert_eq!(registry.state("main"), PipelineState::Stopped);

    let push = SourceConfig {
        kind: SourceKind::Push,
        uri: "stub://slot".to_string(),
        warmup_ms: 0,
        settle_ms: 0,
        frame_wait_ms: 100,
        ..polling.clone()
    };
    registry.acquire("main", &push)?;
    assert_eq!(registry.state("main"), PipelineState::Running);
    assert_eq!(registry.config("main").map(|c| c.kind), Some(SourceKind::Push));

    registry.shutdown("main");
    assert_eq!(registry.state("main"), PipelineState::Stopped);
    Ok(())
}

#[test]
fn registry_records_capture_failures() -> Result<()> {
    let mut registry = CameraRegistry::new();
    let config = SourceConfig {
        kind: SourceKind::Push,
        uri: "stub://dying?fail_after=3&fps=20".to_string(),
        width: 16,
        height: 16,
        warmup_ms: 0,
        settle_ms: 0,
        frame_wait_ms: 100,
        ..SourceConfig::default()
    };
    let mut runner = PipelineRunner::new(None, RunnerConfig::default());
    let mut sink = RecordingSink::default();

    let err = registry
        .run_stream("main", &config, &mut runner, &mut sink)
        .unwrap_err();
    assert!(matches!(err, PipelineError::CaptureFailure { .. }));
    assert_eq!(registry.state("main"), PipelineState::Error);
    assert!(registry
        .last_error("main")
        .is_some_and(|msg| msg.contains("capture failed")));
    Ok(())
}
