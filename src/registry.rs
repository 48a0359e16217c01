//! Process-wide camera slots.
//!
//! A slot is a logical camera (e.g. "main"). It holds at most one live
//! `FrameSource`, created for one `SourceConfig`. Asking for a slot with a
//! different config tears the old source down completely before the new one
//! is opened, so a slot never has two live sources.
//!
//! State per slot:
//!
//! ```text
//! Uninitialized ─► Initializing ─► Running ─► Stopped   (explicit shutdown / stop signal)
//!                       │             │
//!                       └──► Error ◄──┘                 (open, capture or run failure)
//! ```
//!
//! Any state other than a live `Running` slot with an identical config goes
//! back through `Initializing` on the next `acquire`.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::error::{PipelineError, PipelineResult};
use crate::ingest::{open_source, FrameSource, SourceConfig};
use crate::pipeline::{FrameSink, PipelineRunner, RunSummary};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Initializing,
    Running,
    Error,
    Stopped,
}

/// Opens a source for a config. Replaceable for tests.
pub type SourceFactory =
    Box<dyn Fn(&SourceConfig) -> PipelineResult<Box<dyn FrameSource>> + Send + Sync>;

struct CameraSlot {
    config: SourceConfig,
    state: PipelineState,
    source: Option<Box<dyn FrameSource>>,
    last_error: Option<String>,
}

impl CameraSlot {
    fn teardown(&mut self, slot: &str) {
        if let Some(mut source) = self.source.take() {
            log::info!("registry: tearing down {} ({})", slot, source.name());
            source.stop();
        }
    }
}

pub struct CameraRegistry {
    slots: HashMap<String, CameraSlot>,
    factory: SourceFactory,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self::with_factory(Box::new(open_source))
    }

    pub fn with_factory(factory: SourceFactory) -> Self {
        Self {
            slots: HashMap::new(),
            factory,
        }
    }

    /// Shared registry for the whole process.
    pub fn global() -> &'static Mutex<CameraRegistry> {
        static GLOBAL: OnceLock<Mutex<CameraRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Mutex::new(CameraRegistry::new()))
    }

    pub fn state(&self, slot: &str) -> PipelineState {
        self.slots
            .get(slot)
            .map_or(PipelineState::Uninitialized, |s| s.state)
    }

    pub fn last_error(&self, slot: &str) -> Option<&str> {
        self.slots.get(slot).and_then(|s| s.last_error.as_deref())
    }

    pub fn config(&self, slot: &str) -> Option<&SourceConfig> {
        self.slots.get(slot).map(|s| &s.config)
    }

    /// Make sure `slot` holds a live source for `config`, reusing the
    /// current one when nothing changed.
    pub fn acquire(&mut self, slot: &str, config: &SourceConfig) -> PipelineResult<()> {
        if let Some(existing) = self.slots.get_mut(slot) {
            let reusable = existing.state == PipelineState::Running
                && existing.config == *config
                && existing.source.as_ref().is_some_and(|s| s.is_live());
            if reusable {
                return Ok(());
            }
            if existing.config != *config {
                log::info!("registry: source config for {} changed", slot);
            }
            existing.teardown(slot);
        }

        let entry = self
            .slots
            .entry(slot.to_string())
            .or_insert_with(|| CameraSlot {
                config: config.clone(),
                state: PipelineState::Uninitialized,
                source: None,
                last_error: None,
            });
        entry.config = config.clone();
        entry.state = PipelineState::Initializing;
        entry.last_error = None;

        match (self.factory)(config) {
            Ok(source) => {
                log::info!("registry: {} running on {}", slot, source.name());
                entry.source = Some(source);
                entry.state = PipelineState::Running;
                Ok(())
            }
            Err(err) => {
                log::warn!("registry: {} failed to initialise: {}", slot, err);
                entry.last_error = Some(err.to_string());
                entry.state = PipelineState::Error;
                Err(err)
            }
        }
    }

    /// Acquire `slot` and drive it in stream mode until the run ends.
    ///
    /// The runner releases the source on exit; the slot ends `Stopped` on a
    /// clean run and `Error` otherwise.
    pub fn run_stream(
        &mut self,
        slot: &str,
        config: &SourceConfig,
        runner: &mut PipelineRunner,
        sink: &mut dyn FrameSink,
    ) -> PipelineResult<RunSummary> {
        self.acquire(slot, config)?;
        let entry = self
            .slots
            .get_mut(slot)
            .ok_or_else(|| PipelineError::Config(format!("camera slot {} vanished", slot)))?;
        let Some(mut source) = entry.source.take() else {
            return Err(PipelineError::Config(format!(
                "camera slot {} has no source",
                slot
            )));
        };

        let result = runner.run_stream(source.as_mut(), sink);
        match &result {
            Ok(_) => entry.state = PipelineState::Stopped,
            Err(err) => {
                entry.state = PipelineState::Error;
                entry.last_error = Some(err.to_string());
            }
        }
        result
    }

    /// Stop and release the source in `slot`. No-op for unknown slots.
    pub fn shutdown(&mut self, slot: &str) {
        if let Some(entry) = self.slots.get_mut(slot) {
            entry.teardown(slot);
            entry.state = PipelineState::Stopped;
        }
    }

    pub fn shutdown_all(&mut self) {
        let names: Vec<String> = self.slots.keys().cloned().collect();
        for name in names {
            self.shutdown(&name);
        }
    }
}

impl Default for CameraRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CameraRegistry {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}
