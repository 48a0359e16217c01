//! edge_stream - live camera stream with per-frame inference
//!
//! This binary:
//! 1. Loads `PipelineConfig` (JSON file + EDGE_VISION_* env) and applies CLI flags
//! 2. Acquires the camera slot from the process-wide registry
//! 3. Runs stream mode until Ctrl-C, end of stream, or a fatal error
//! 4. Logs a throughput line periodically and a summary on exit

use anyhow::{anyhow, Result};
use clap::Parser;
use std::time::Duration;

use edge_vision::ui::{summary_line, LogSink};
use edge_vision::{
    CameraRegistry, FrameSink, PipelineConfig, PipelineRunner, SourceKind, StopHandle,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Camera slot name in the registry.
    #[arg(long, env = "EDGE_VISION_SLOT", default_value = "main")]
    slot: String,
    /// Source URI (stub://name, /dev/videoN, or a local file).
    #[arg(long)]
    uri: Option<String>,
    /// Source kind: push (camera thread) or polling.
    #[arg(long)]
    kind: Option<SourceKind>,
    /// Inference backend name (cpu, stub, tract).
    #[arg(long)]
    backend: Option<String>,
    /// Minimum detection confidence (0..=1).
    #[arg(long)]
    confidence: Option<f32>,
    /// Disable inference and stream raw frames.
    #[arg(long)]
    no_inference: bool,
    /// Draw the model / latency / fps / memory banner onto rendered frames.
    #[arg(long)]
    overlay: bool,
    /// Seconds between throughput log lines.
    #[arg(long, default_value_t = 2)]
    log_every_secs: u64,
    /// Write every rendered frame as JPEG into this directory.
    #[cfg(feature = "sink-jpeg")]
    #[arg(long)]
    snapshot_dir: Option<std::path::PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = PipelineConfig::load()?;
    if let Some(uri) = &args.uri {
        config.source.uri = uri.clone();
    }
    if let Some(kind) = args.kind {
        config.source.kind = kind;
    }
    if let Some(backend) = &args.backend {
        config.inference.backend = backend.clone();
    }
    if let Some(confidence) = args.confidence {
        config.inference.confidence = confidence;
    }
    if args.no_inference {
        config.inference.enabled = false;
    }
    if args.overlay {
        config.runner.overlay = true;
    }
    config.validate()?;

    let stage = config.inference.build_stage(&config.source)?;
    let stop = StopHandle::new();
    let mut runner = PipelineRunner::new(stage, config.runner).with_stop_handle(stop.clone());

    ctrlc::set_handler(move || stop.stop())
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!(
        "edge_stream: slot {} on {} ({:?}), press Ctrl-C to stop",
        args.slot,
        config.source.uri,
        config.source.kind
    );

    let mut sink: Box<dyn FrameSink> =
        Box::new(LogSink::new(Duration::from_secs(args.log_every_secs.max(1))));
    #[cfg(feature = "sink-jpeg")]
    {
        if let Some(dir) = &args.snapshot_dir {
            sink = Box::new(edge_vision::ui::TeeSink(
                sink,
                edge_vision::ui::JpegSink::new(dir, 85)?,
            ));
        }
    }

    let mut registry = CameraRegistry::global()
        .lock()
        .map_err(|_| anyhow!("camera registry lock poisoned"))?;
    let result = registry.run_stream(&args.slot, &config.source, &mut runner, sink.as_mut());
    registry.shutdown(&args.slot);

    match result {
        Ok(summary) => {
            log::info!("edge_stream: {}", summary_line(&summary));
            Ok(())
        }
        Err(err) => {
            log::error!("edge_stream: {}", err);
            Err(err.into())
        }
    }
}
