use anyhow::Result;

use crate::frame::Frame;

use super::{FrameSink, FrameSource};

/// Frames held in memory, replayed in order.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    frames: Vec<Frame>,
    position: usize,
}

impl MemorySource {
    /// Frames are re-indexed `0..n` in the given order.
    pub fn new(frames: Vec<Frame>) -> Self {
        let frames = frames
            .into_iter()
            .enumerate()
            .map(|(i, f)| if f.index() == i as u64 { f } else { f.with_index(i as u64) })
            .collect();
        Self {
            frames,
            position: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = self.frames.get(self.position).cloned();
        if frame.is_some() {
            self.position += 1;
        }
        Ok(frame)
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("memory ({} frames)", self.frames.len())
    }
}

/// Collects written frames.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    frames: Vec<Frame>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    /// Replay the collected frames as a source.
    pub fn into_source(self) -> MemorySource {
        MemorySource::new(self.frames)
    }
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.frames.push(frame.clone());
        Ok(())
    }
}
