//! Local video file devices.
//!
//! Files are read through the polling path: every `read` decodes the next
//! frame on the caller's thread and end of file is a clean end of stream.
//!
//! File ingestion MUST NOT fetch remote URLs; anything with a `scheme://`
//! prefix is rejected before a decoder is created.

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileDevice;
use super::{CaptureDevice, SourceConfig};

/// Build a device for a local video file.
pub fn open_file_device(config: &SourceConfig) -> Result<Box<dyn CaptureDevice>> {
    if !is_local_file_path(&config.uri) {
        return Err(anyhow!(
            "file ingestion only supports local paths (no URL schemes)"
        ));
    }
    #[cfg(feature = "ingest-file-ffmpeg")]
    {
        Ok(Box::new(FfmpegFileDevice::new(config.clone())))
    }
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    {
        Err(anyhow!(
            "file ingestion requires the ingest-file-ffmpeg feature"
        ))
    }
}

pub(crate) fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_local_paths_are_files() {
        assert!(is_local_file_path("/var/lib/edge/clip.mp4"));
        assert!(is_local_file_path("clip.mp4"));
        assert!(!is_local_file_path("https://example.com/clip.mp4"));
        assert!(!is_local_file_path("   "));
    }

    #[test]
    fn remote_urls_are_rejected() {
        let config = SourceConfig {
            uri: "http://camera.local/video".to_string(),
            ..SourceConfig::default()
        };
        let err = open_file_device(&config).err().expect("must reject url");
        assert!(err.to_string().contains("local paths"));
    }
}
