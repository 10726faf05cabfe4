//! Image-sequence source and sink.
//!
//! A directory of PNG/JPEG files read in lexicographic order, and a sink
//! writing `frame_000000.png`, `frame_000001.png`, ...

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use crate::frame::{Frame, PixelLayout};

use super::{FrameSink, FrameSource};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    position: usize,
    dimensions: Option<(u32, u32)>,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read image directory {}", dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("failed to list {}", dir.display()))?
                .path();
            if is_image_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(anyhow!("no PNG/JPEG frames found in {}", dir.display()));
        }
        log::info!(
            "ImageSequenceSource: {} frames in {}",
            files.len(),
            dir.display()
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            position: 0,
            dimensions: None,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.position) else {
            return Ok(None);
        };
        let image = image::open(path)
            .with_context(|| format!("failed to decode frame {}", path.display()))?
            .to_rgb8();
        let dims = image.dimensions();
        match self.dimensions {
            None => self.dimensions = Some(dims),
            Some(expected) if expected != dims => {
                log::warn!(
                    "{}: frame size {:?} differs from stream size {:?}",
                    path.display(),
                    dims,
                    expected
                );
            }
            Some(_) => {}
        }
        let frame = Frame::from_rgb_image(self.position as u64, image)?;
        self.position += 1;
        Ok(Some(frame))
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("image sequence {} ({} frames)", self.dir.display(), self.files.len())
    }
}

/// Writes each frame as a numbered PNG.
pub struct ImageSequenceSink {
    dir: PathBuf,
    written: u64,
}

impl ImageSequenceSink {
    /// Create the directory if needed. Frames left by an earlier run are
    /// removed so the directory holds exactly what this sink writes.
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        let stale = remove_sink_frames(dir)?;
        if stale > 0 {
            log::warn!(
                "ImageSequenceSink: removed {} frames from an earlier run in {}",
                stale,
                dir.display()
            );
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.written
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn is_sink_frame(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("frame_") && name.ends_with(".png"))
}

fn remove_sink_frames(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list output directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if is_sink_frame(&path) {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}

impl FrameSink for ImageSequenceSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let path = self.dir.join(format!("frame_{:06}.png", self.written));
        match frame.layout() {
            PixelLayout::Rgb8 => frame.to_rgb_image().save(&path),
            PixelLayout::Gray8 => frame.to_gray_image().save(&path),
        }
        .with_context(|| format!("failed to write {}", path.display()))?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        log::info!(
            "ImageSequenceSink: wrote {} frames to {}",
            self.written,
            self.dir.display()
        );
        Ok(())
    }
}
