use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::{BackendRegistry, InferenceParams, InferenceStage, DEFAULT_CONFIDENCE};
use crate::frame::PixelFormat;
use crate::ingest::{SourceConfig, SourceKind};
use crate::pipeline::RunnerConfig;

const DEFAULT_BACKEND: &str = "cpu";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    source: Option<SourceConfigFile>,
    inference: Option<InferenceConfigFile>,
    runner: Option<RunnerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    kind: Option<SourceKind>,
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    format: Option<PixelFormat>,
    target_fps: Option<u32>,
    warmup_ms: Option<u64>,
    settle_ms: Option<u64>,
    frame_wait_ms: Option<u64>,
    startup_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct InferenceConfigFile {
    enabled: Option<bool>,
    backend: Option<String>,
    confidence: Option<f32>,
    annotate: Option<bool>,
    model_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RunnerConfigFile {
    render_every: Option<u64>,
    window: Option<usize>,
    overlay: Option<bool>,
    track_memory: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub inference: InferenceSettings,
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceSettings {
    pub enabled: bool,
    pub backend: String,
    pub confidence: f32,
    pub annotate: bool,
    /// Model file for backends that load one (tract).
    pub model_path: Option<PathBuf>,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: DEFAULT_BACKEND.to_string(),
            confidence: DEFAULT_CONFIDENCE,
            annotate: true,
            model_path: None,
        }
    }
}

impl InferenceSettings {
    pub fn params(&self) -> InferenceParams {
        InferenceParams {
            confidence: self.confidence,
            annotate: self.annotate,
        }
    }

    /// Build the configured inference stage, or `None` when inference is off.
    pub fn build_stage(&self, source: &SourceConfig) -> Result<Option<InferenceStage>> {
        if !self.enabled {
            return Ok(None);
        }
        let mut registry = BackendRegistry::with_builtin();
        self.register_model_backends(&mut registry, source)?;
        let stage = registry.stage(Some(&self.backend), self.params())?;
        stage
            .warm_up()
            .with_context(|| format!("warm up backend {}", self.backend))?;
        Ok(Some(stage))
    }

    #[cfg(feature = "backend-tract")]
    fn register_model_backends(
        &self,
        registry: &mut BackendRegistry,
        source: &SourceConfig,
    ) -> Result<()> {
        if self.backend != "tract" {
            return Ok(());
        }
        let path = self
            .model_path
            .as_ref()
            .ok_or_else(|| anyhow!("backend tract requires inference.model_path"))?;
        registry.register(crate::detect::TractBackend::new(
            path,
            source.width,
            source.height,
        )?);
        Ok(())
    }

    #[cfg(not(feature = "backend-tract"))]
    fn register_model_backends(
        &self,
        _registry: &mut BackendRegistry,
        _source: &SourceConfig,
    ) -> Result<()> {
        if self.backend == "tract" {
            return Err(anyhow!("backend tract requires the backend-tract feature"));
        }
        Ok(())
    }
}

impl PipelineConfig {
    /// Defaults, then the JSON file named by `EDGE_VISION_CONFIG` (if set),
    /// then `EDGE_VISION_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("EDGE_VISION_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load one file without consulting the environment.
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let defaults = SourceConfig::default();
        let src = file.source.unwrap_or_default();
        let source = SourceConfig {
            kind: src.kind.unwrap_or(defaults.kind),
            uri: src.uri.unwrap_or(defaults.uri),
            width: src.width.unwrap_or(defaults.width),
            height: src.height.unwrap_or(defaults.height),
            format: src.format.unwrap_or(defaults.format),
            target_fps: src.target_fps.unwrap_or(defaults.target_fps),
            warmup_ms: src.warmup_ms.unwrap_or(defaults.warmup_ms),
            settle_ms: src.settle_ms.unwrap_or(defaults.settle_ms),
            frame_wait_ms: src.frame_wait_ms.unwrap_or(defaults.frame_wait_ms),
            startup_timeout_ms: src.startup_timeout_ms.unwrap_or(defaults.startup_timeout_ms),
        };

        let defaults = InferenceSettings::default();
        let inf = file.inference.unwrap_or_default();
        let inference = InferenceSettings {
            enabled: inf.enabled.unwrap_or(defaults.enabled),
            backend: inf.backend.unwrap_or(defaults.backend),
            confidence: inf.confidence.unwrap_or(defaults.confidence),
            annotate: inf.annotate.unwrap_or(defaults.annotate),
            model_path: inf.model_path,
        };

        let defaults = RunnerConfig::default();
        let run = file.runner.unwrap_or_default();
        let runner = RunnerConfig {
            render_every: run.render_every.unwrap_or(defaults.render_every),
            window: run.window.unwrap_or(defaults.window),
            overlay: run.overlay.unwrap_or(defaults.overlay),
            track_memory: run.track_memory.unwrap_or(defaults.track_memory),
        };

        Self {
            source,
            inference,
            runner,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(uri) = std::env::var("EDGE_VISION_SOURCE_URI") {
            if !uri.trim().is_empty() {
                self.source.uri = uri;
            }
        }
        if let Ok(kind) = std::env::var("EDGE_VISION_SOURCE_KIND") {
            if !kind.trim().is_empty() {
                self.source.kind = kind.parse()?;
            }
        }
        if let Ok(backend) = std::env::var("EDGE_VISION_BACKEND") {
            if !backend.trim().is_empty() {
                self.inference.backend = backend.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("EDGE_VISION_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.inference.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(confidence) = std::env::var("EDGE_VISION_CONFIDENCE") {
            self.inference.confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("EDGE_VISION_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Ok(enabled) = std::env::var("EDGE_VISION_INFERENCE") {
            self.inference.enabled = parse_bool(&enabled)
                .ok_or_else(|| anyhow!("EDGE_VISION_INFERENCE must be on/off, true/false or 1/0"))?;
        }
        if let Ok(overlay) = std::env::var("EDGE_VISION_OVERLAY") {
            self.runner.overlay = parse_bool(&overlay)
                .ok_or_else(|| anyhow!("EDGE_VISION_OVERLAY must be on/off, true/false or 1/0"))?;
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        self.source.uri = self.source.uri.trim().to_string();
        if self.source.uri.is_empty() {
            return Err(anyhow!("source.uri must not be empty"));
        }
        if (self.source.width == 0) != (self.source.height == 0) {
            return Err(anyhow!("source.width and source.height must both be set or both be 0"));
        }
        if self.source.kind == SourceKind::Push && self.source.width == 0 {
            return Err(anyhow!("push sources need an explicit resolution"));
        }
        if self.source.frame_wait_ms == 0 {
            return Err(anyhow!("source.frame_wait_ms must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.inference.confidence) {
            return Err(anyhow!(
                "inference.confidence must be within 0..=1, got {}",
                self.inference.confidence
            ));
        }
        self.inference.backend = self.inference.backend.to_ascii_lowercase();
        if self.inference.backend.is_empty() {
            return Err(anyhow!("inference.backend must not be empty"));
        }
        if self.runner.render_every == 0 {
            return Err(anyhow!("runner.render_every must be greater than zero"));
        }
        if self.runner.window < 2 {
            return Err(anyhow!("runner.window must hold at least 2 samples"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}
