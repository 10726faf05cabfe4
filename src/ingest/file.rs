//! Local file frame source.
//!
//! `FileSource::open` dispatches on the input:
//! - `synthetic://...` URIs render a synthetic scene
//! - a directory is read as an image sequence
//! - any other local path is decoded with FFmpeg (feature: ingest-file-ffmpeg)
//!
//! Remote URLs are rejected.

use anyhow::{anyhow, Result};
use std::path::Path;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::sequence::ImageSequenceSource;
use super::synthetic::{SyntheticScene, SyntheticSource, SYNTHETIC_SCHEME};
use super::FrameSource;
use crate::frame::Frame;

/// Local file frame source.
pub struct FileSource {
    path: String,
    backend: FileBackend,
    frames_read: u64,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    Sequence(ImageSequenceSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn open(path: &str) -> Result<Self> {
        if !is_local_file_path(path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes): {}",
                path
            ));
        }
        let backend = if path.starts_with(SYNTHETIC_SCHEME) {
            FileBackend::Synthetic(SyntheticScene::from_uri(path)?.source())
        } else if Path::new(path).is_dir() {
            FileBackend::Sequence(ImageSequenceSource::open(Path::new(path))?)
        } else if !Path::new(path).exists() {
            return Err(anyhow!("cannot open video: {} does not exist", path));
        } else {
            #[cfg(feature = "ingest-file-ffmpeg")]
            {
                FileBackend::Ffmpeg(FfmpegFileSource::open(path)?)
            }
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            {
                return Err(anyhow!(
                    "decoding video files requires the ingest-file-ffmpeg feature: {}",
                    path
                ));
            }
        };
        let source = Self {
            path: path.to_string(),
            backend,
            frames_read: 0,
        };
        log::info!("FileSource: opened {}", source.describe());
        Ok(source)
    }

    pub fn stats(&self) -> FileStats {
        FileStats {
            frames_read: self.frames_read,
            path: self.path.clone(),
        }
    }

    fn inner(&mut self) -> &mut dyn FrameSource {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source,
            FileBackend::Sequence(source) => source,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source,
        }
    }
}

impl FrameSource for FileSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = self.inner().next_frame()?;
        if frame.is_some() {
            self.frames_read += 1;
        }
        Ok(frame)
    }

    fn rewind(&mut self) -> Result<()> {
        self.inner().rewind()
    }

    fn describe(&self) -> String {
        match &self.backend {
            FileBackend::Synthetic(source) => source.describe(),
            FileBackend::Sequence(source) => source.describe(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.describe(),
        }
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_read: u64,
    pub path: String,
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with(SYNTHETIC_SCHEME) {
        return true;
    }
    !path.contains("://")
}
