//! Cropping ratio: how much of each frame survived border fill.

use anyhow::Result;

use crate::frame::Frame;
use crate::ingest::{FileSource, FrameSource};

/// Fraction of pixels whose luminance exceeds `threshold`.
pub fn frame_cropping_ratio(frame: &Frame, threshold: u8) -> f64 {
    let luma = frame.luma();
    let valid = luma.pixels().filter(|p| p.0[0] > threshold).count();
    valid as f64 / (frame.width() as f64 * frame.height() as f64)
}

/// Mean per-frame ratio; 1.0 means no area lost. NaN for an empty stream.
pub fn cropping_ratio(
    source: &mut dyn FrameSource,
    threshold: u8,
    max_frames: Option<usize>,
) -> Result<f64> {
    let mut total = 0.0;
    let mut count = 0usize;
    loop {
        if max_frames.is_some_and(|max| count >= max) {
            break;
        }
        let Some(frame) = source.next_frame()? else {
            break;
        };
        total += frame_cropping_ratio(&frame, threshold);
        count += 1;
    }
    if count == 0 {
        return Ok(f64::NAN);
    }
    Ok(total / count as f64)
}

pub fn cropping_ratio_from_video(
    path: &str,
    threshold: u8,
    max_frames: Option<usize>,
) -> Result<f64> {
    let mut source = FileSource::open(path)?;
    cropping_ratio(&mut source, threshold, max_frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelLayout;
    use crate::ingest::MemorySource;

    /// `black_cols` leftmost columns are zero, the rest mid-grey.
    fn bordered(index: u64, width: u32, height: u32, black_cols: u32) -> Frame {
        let data = (0..width * height)
            .map(|i| if i % width < black_cols { 0 } else { 120 })
            .collect();
        Frame::new(index, width, height, PixelLayout::Gray8, data).unwrap()
    }

    #[test]
    fn counts_non_black_fraction() {
        let frame = bordered(0, 10, 4, 3);
        assert!((frame_cropping_ratio(&frame, 3) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn averages_over_frames() {
        let mut source = MemorySource::new(vec![bordered(0, 10, 2, 0), bordered(1, 10, 2, 5)]);
        let ratio = cropping_ratio(&mut source, 3, None).unwrap();
        assert!((ratio - 0.75).abs() < 1e-12);
    }

    #[test]
    fn empty_stream_is_undefined() {
        let mut source = MemorySource::new(Vec::new());
        assert!(cropping_ratio(&mut source, 3, None).unwrap().is_nan());
    }
}
