//! Polling frame source: every fetch is a blocking device read on the
//! caller's thread.

use super::{CaptureDevice, Fetch, FrameSource, SourceStats};
use crate::error::{PipelineError, PipelineResult};

pub struct PollingSource {
    device: Box<dyn CaptureDevice>,
    name: String,
    open: bool,
    frames_delivered: u64,
}

impl PollingSource {
    /// Open the device. Fails with `OpenFailure` if the handle cannot be acquired.
    pub fn open(mut device: Box<dyn CaptureDevice>) -> PipelineResult<Self> {
        let name = device.name().to_string();
        if let Err(err) = device.open() {
            device.close();
            log::warn!("PollingSource: failed to open {}: {:#}", name, err);
            return Err(PipelineError::open(name, format!("{err:#}")));
        }
        log::info!("PollingSource: connected to {}", name);
        Ok(Self {
            device,
            name,
            open: true,
            frames_delivered: 0,
        })
    }

    fn release(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.device.halt();
        self.device.close();
        log::info!(
            "PollingSource: released {} after {} frames",
            self.name,
            self.frames_delivered
        );
    }
}

impl FrameSource for PollingSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self) -> PipelineResult<Fetch> {
        if !self.open {
            return Ok(Fetch::EndOfStream);
        }
        match self.device.read() {
            Ok(Some(frame)) => {
                self.frames_delivered += 1;
                Ok(Fetch::Frame(frame))
            }
            Ok(None) => {
                log::info!("PollingSource: end of stream on {}", self.name);
                self.release();
                Ok(Fetch::EndOfStream)
            }
            Err(err) => {
                log::warn!("PollingSource: capture failed on {}: {:#}", self.name, err);
                self.release();
                Err(PipelineError::capture(self.name.clone(), format!("{err:#}")))
            }
        }
    }

    fn stop(&mut self) {
        self.release();
    }

    fn is_live(&self) -> bool {
        self.open
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            name: self.name.clone(),
            frames_delivered: self.frames_delivered,
            frames_dropped: 0,
        }
    }

    fn frame_count_hint(&self) -> Option<u64> {
        self.device.frame_count_hint()
    }
}

impl Drop for PollingSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::synthetic::{SyntheticConfig, SyntheticDevice};
    use anyhow::Result;

    fn device(config: SyntheticConfig) -> SyntheticDevice {
        SyntheticDevice::new(SyntheticConfig {
            width: 16,
            height: 12,
            ..config
        })
    }

    #[test]
    fn end_of_stream_releases_device_once() -> Result<()> {
        let device = device(SyntheticConfig {
            frames: Some(2),
            ..SyntheticConfig::default()
        });
        let counters = device.counters();
        let mut source = PollingSource::open(Box::new(device))?;

        assert!(matches!(source.next_frame()?, Fetch::Frame(_)));
        assert!(matches!(source.next_frame()?, Fetch::Frame(_)));
        assert!(matches!(source.next_frame()?, Fetch::EndOfStream));
        assert!(matches!(source.next_frame()?, Fetch::EndOfStream));
        source.stop();
        drop(source);

        assert_eq!(counters.closes(), 1);
        assert_eq!(counters.reads(), 3);
        Ok(())
    }

    #[test]
    fn capture_failure_is_reported_once() -> Result<()> {
        let device = device(SyntheticConfig {
            fail_after: Some(1),
            ..SyntheticConfig::default()
        });
        let counters = device.counters();
        let mut source = PollingSource::open(Box::new(device))?;

        assert!(matches!(source.next_frame()?, Fetch::Frame(_)));
        let err = source.next_frame().unwrap_err();
        assert!(matches!(err, PipelineError::CaptureFailure { .. }));
        assert!(matches!(source.next_frame()?, Fetch::EndOfStream));
        assert!(!source.is_live());
        assert_eq!(counters.closes(), 1);
        Ok(())
    }

    #[test]
    fn open_failure_closes_device() {
        let device = device(SyntheticConfig {
            fail_open: true,
            ..SyntheticConfig::default()
        });
        let counters = device.counters();
        let err = PollingSource::open(Box::new(device)).err().expect("open must fail");
        assert!(matches!(err, PipelineError::OpenFailure { .. }));
        assert_eq!(counters.closes(), 1);
    }
}
