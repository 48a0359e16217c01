//! edge_bulk - process a finite video resource end to end
//!
//! Opens the configured source as a polling source, runs inference on every
//! frame, and reports progress every Nth frame plus a final summary.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;

use edge_vision::ui::{summary_line, ProgressSink, UiMode};
use edge_vision::{open_source, FrameSink, PipelineConfig, PipelineRunner, SourceKind, StopHandle};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Local video file or stub://name?frames=N.
    input: String,
    /// Inference backend name (cpu, stub, tract).
    #[arg(long)]
    backend: Option<String>,
    /// Minimum detection confidence (0..=1).
    #[arg(long)]
    confidence: Option<f32>,
    /// Render every Nth frame.
    #[arg(long)]
    render_every: Option<u64>,
    /// Draw the model / latency / fps / memory banner onto rendered frames.
    #[arg(long)]
    overlay: bool,
    /// Expected frame count when the file does not report one.
    #[arg(long)]
    frames: Option<u64>,
    /// Output style: auto, plain, pretty.
    #[arg(long, env = "EDGE_VISION_UI")]
    ui: Option<String>,
    /// Write every rendered frame as JPEG into this directory.
    #[cfg(feature = "sink-jpeg")]
    #[arg(long)]
    snapshot_dir: Option<std::path::PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = PipelineConfig::load()?;
    config.source.uri = args.input.clone();
    config.source.kind = SourceKind::Polling;
    config.inference.enabled = true;
    if let Some(backend) = &args.backend {
        config.inference.backend = backend.clone();
    }
    if let Some(confidence) = args.confidence {
        config.inference.confidence = confidence;
    }
    if let Some(render_every) = args.render_every {
        config.runner.render_every = render_every;
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

    let mut source = open_source(&config.source)?;
    let total = args.frames.or_else(|| source.frame_count_hint());
    log::info!(
        "edge_bulk: processing {} ({} frames)",
        config.source.uri,
        total.map_or_else(|| "unknown".to_string(), |t| t.to_string())
    );

    let mode = UiMode::from_flag(args.ui.as_deref());
    let mut sink: Box<dyn FrameSink> = Box::new(ProgressSink::new(
        mode,
        std::io::stderr().is_terminal(),
        total,
    ));
    #[cfg(feature = "sink-jpeg")]
    {
        if let Some(dir) = &args.snapshot_dir {
            sink = Box::new(edge_vision::ui::TeeSink(
                sink,
                edge_vision::ui::JpegSink::new(dir, 85)?,
            ));
        }
    }

    match runner.run_bulk(source.as_mut(), total, sink.as_mut()) {
        Ok(summary) => {
            log::info!("edge_bulk: {}", summary_line(&summary));
            Ok(())
        }
        Err(err) => {
            log::error!("edge_bulk: {}", err);
            Err(err.into())
        }
    }
}
