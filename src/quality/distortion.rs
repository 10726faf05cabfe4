//! Distortion: mean `1 - SSIM` between index-aligned frame pairs.
//!
//! Each pair is compared on luminance over its common valid area, so border
//! fill introduced by stabilization does not count as distortion.

use anyhow::Result;
use image::{imageops, GrayImage};

use crate::frame::Frame;
use crate::ingest::{FileSource, FrameSource};
use crate::vision::VisionBackend;

/// Below this many shared valid pixels the pair falls back to a centered crop.
const MIN_COMMON_PIXELS: usize = 100;

fn centered_crop(image: &GrayImage, width: u32, height: u32) -> GrayImage {
    let x = (image.width() - width) / 2;
    let y = (image.height() - height) / 2;
    imageops::crop_imm(image, x, y, width, height).to_image()
}

/// Crop both images to the bounding box of their shared non-black area.
///
/// Falls back to a centered crop of the smaller dimensions when the images
/// differ in size or share fewer than 100 valid pixels.
pub fn common_crop(a: &GrayImage, b: &GrayImage, threshold: u8) -> (GrayImage, GrayImage) {
    let width = a.width().min(b.width());
    let height = a.height().min(b.height());
    let fallback = || {
        (
            centered_crop(a, width, height),
            centered_crop(b, width, height),
        )
    };
    if a.dimensions() != b.dimensions() {
        return fallback();
    }

    let mut count = 0usize;
    let (mut x0, mut y0, mut x1, mut y1) = (u32::MAX, u32::MAX, 0u32, 0u32);
    for (x, y, pa) in a.enumerate_pixels() {
        if pa.0[0] > threshold && b.get_pixel(x, y).0[0] > threshold {
            count += 1;
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x);
            y1 = y1.max(y);
        }
    }
    if count < MIN_COMMON_PIXELS {
        return fallback();
    }

    let (w, h) = (x1 - x0 + 1, y1 - y0 + 1);
    (
        imageops::crop_imm(a, x0, y0, w, h).to_image(),
        imageops::crop_imm(b, x0, y0, w, h).to_image(),
    )
}

/// `1 - SSIM` of one pair over its common area.
pub fn frame_distortion(
    backend: &dyn VisionBackend,
    a: &Frame,
    b: &Frame,
    threshold: u8,
) -> Result<f64> {
    let (ga, gb) = common_crop(a.luma(), b.luma(), threshold);
    let ssim = backend.structural_similarity(&ga, &gb)?;
    Ok(1.0 - ssim)
}

/// Mean over pairs until either stream ends. NaN when no pair exists.
pub fn distortion_value(
    raw: &mut dyn FrameSource,
    stabilized: &mut dyn FrameSource,
    backend: &dyn VisionBackend,
    threshold: u8,
    max_frames: Option<usize>,
) -> Result<f64> {
    let mut total = 0.0;
    let mut count = 0usize;
    loop {
        if max_frames.is_some_and(|max| count >= max) {
            break;
        }
        let (Some(a), Some(b)) = (raw.next_frame()?, stabilized.next_frame()?) else {
            break;
        };
        total += frame_distortion(backend, &a, &b, threshold)?;
        count += 1;
    }
    if count == 0 {
        return Ok(f64::NAN);
    }
    Ok(total / count as f64)
}

pub fn distortion_value_from_videos(
    raw_path: &str,
    stabilized_path: &str,
    backend: &dyn VisionBackend,
    threshold: u8,
    max_frames: Option<usize>,
) -> Result<f64> {
    let mut raw = FileSource::open(raw_path)?;
    let mut stabilized = FileSource::open(stabilized_path)?;
    distortion_value(&mut raw, &mut stabilized, backend, threshold, max_frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{MemorySource, SceneMotion, SyntheticScene};
    use crate::vision::CpuBackend;
    use image::Luma;

    #[test]
    fn crop_is_the_shared_valid_box() {
        let a = GrayImage::from_fn(20, 20, |x, _| Luma([if x < 4 { 0 } else { 90 }]));
        let b = GrayImage::from_fn(20, 20, |_, y| Luma([if y >= 15 { 0 } else { 90 }]));
        let (ca, cb) = common_crop(&a, &b, 3);
        assert_eq!(ca.dimensions(), (16, 15));
        assert_eq!(cb.dimensions(), (16, 15));
        assert!(ca.pixels().all(|p| p.0[0] == 90));
    }

    #[test]
    fn mismatched_sizes_use_centered_crop() {
        let a = GrayImage::from_pixel(30, 20, Luma([50]));
        let b = GrayImage::from_pixel(20, 24, Luma([60]));
        let (ca, cb) = common_crop(&a, &b, 3);
        assert_eq!(ca.dimensions(), (20, 20));
        assert_eq!(cb.dimensions(), (20, 20));
    }

    #[test]
    fn mostly_black_pair_uses_centered_crop() {
        let a = GrayImage::new(12, 12);
        let b = GrayImage::from_pixel(12, 12, Luma([200]));
        let (ca, _) = common_crop(&a, &b, 3);
        assert_eq!(ca.dimensions(), (12, 12));
    }

    #[test]
    fn identical_streams_have_no_distortion() {
        let scene = SyntheticScene::shaky(48, 32, 3);
        let frames: Vec<_> = (0..3).map(|i| scene.render(i).unwrap()).collect();
        let mut a = MemorySource::new(frames.clone());
        let mut b = MemorySource::new(frames);
        let d = distortion_value(&mut a, &mut b, &CpuBackend::new(), 3, None).unwrap();
        assert!(d.abs() < 1e-6, "{d}");
    }

    #[test]
    fn different_content_is_distorted() {
        let pan = SyntheticScene::new(48, 32, 2, SceneMotion::Pan { dx: 6.0, dy: 3.0 });
        let a = pan.render(0).unwrap();
        let b = pan.render(1).unwrap();
        let d = frame_distortion(&CpuBackend::new(), &a, &b, 3).unwrap();
        assert!(d > 0.01, "{d}");
    }

    #[test]
    fn empty_pair_stream_is_undefined() {
        let mut a = MemorySource::new(Vec::new());
        let mut b = MemorySource::new(Vec::new());
        let d = distortion_value(&mut a, &mut b, &CpuBackend::new(), 3, None).unwrap();
        assert!(d.is_nan());
    }
}
