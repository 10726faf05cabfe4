//! Frame sources and sinks.
//!
//! This module provides the stream I/O around the stabilizers:
//! - Synthetic shaky scenes (`synthetic://` URIs, tests and demos)
//! - Image sequences (a directory of PNG/JPEG files)
//! - Local video files (feature: ingest-file-ffmpeg)
//! - In-memory sources and sinks
//!
//! Sources assign each frame its 0-based stream index. Only local paths are
//! accepted; URL schemes other than `synthetic://` are rejected.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
mod memory;
pub mod sequence;
pub mod synthetic;

use anyhow::Result;

use crate::frame::Frame;

pub use file::{FileSource, FileStats};
pub use memory::{MemorySink, MemorySource};
pub use sequence::{ImageSequenceSink, ImageSequenceSource};
pub use synthetic::{SceneMotion, SyntheticScene, SyntheticSource};

/// Ordered stream of frames.
pub trait FrameSource {
    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Restart from the first frame.
    fn rewind(&mut self) -> Result<()>;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

/// Consumer of processed frames.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush anything buffered.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
