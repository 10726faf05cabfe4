//! Frame model.
//!
//! A `Frame` is produced once by a source and never mutated afterwards:
//! - Pixel bytes live behind an `Arc<[u8]>`; clones share the buffer.
//! - There is no mutable pixel accessor. Every transformation (warp, crop)
//!   produces a new frame.
//! - Luminance is derived lazily on first use and cached alongside the pixels,
//!   so the reference frame of a stabilizer is converted at most once.

use anyhow::{anyhow, Result};
use image::{GrayImage, ImageBuffer, Rgb, RgbImage};
use std::fmt;
use std::sync::{Arc, OnceLock};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    Gray8,
    Rgb8,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Gray8 => 1,
            PixelLayout::Rgb8 => 3,
        }
    }
}

/// Immutable 8-bit pixel buffer with a stream position.
#[derive(Clone)]
pub struct Frame {
    data: Arc<[u8]>,
    width: u32,
    height: u32,
    layout: PixelLayout,
    /// Position in the producing stream (0-based).
    index: u64,
    luma: Arc<OnceLock<GrayImage>>,
}

impl Frame {
    pub fn new(
        index: u64,
        width: u32,
        height: u32,
        layout: PixelLayout,
        data: Vec<u8>,
    ) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(layout.channels()))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if width == 0 || height == 0 {
            return Err(anyhow!("frame must have non-zero dimensions"));
        }
        if data.len() != expected {
            return Err(anyhow!(
                "{:?} frame length mismatch: expected {}, got {}",
                layout,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data: data.into(),
            width,
            height,
            layout,
            index,
            luma: Arc::new(OnceLock::new()),
        })
    }

    pub fn from_rgb_image(index: u64, image: RgbImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::new(index, width, height, PixelLayout::Rgb8, image.into_raw())
    }

    pub fn from_gray_image(index: u64, image: GrayImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::new(index, width, height, PixelLayout::Gray8, image.into_raw())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn channels(&self) -> usize {
        self.layout.channels()
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Read-only pixel bytes, row-major, interleaved channels.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Same pixels, different stream position.
    pub fn with_index(&self, index: u64) -> Frame {
        Frame {
            index,
            ..self.clone()
        }
    }

    /// Pixel-identical comparison (dimensions, layout and bytes).
    pub fn same_pixels(&self, other: &Frame) -> bool {
        self.dimensions() == other.dimensions()
            && self.layout == other.layout
            && (Arc::ptr_eq(&self.data, &other.data) || self.data[..] == other.data[..])
    }

    /// Cached luminance plane.
    pub fn luma(&self) -> &GrayImage {
        self.luma.get_or_init(|| self.compute_luma())
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        match self.layout {
            PixelLayout::Rgb8 => RgbImage::from_raw(self.width, self.height, self.data.to_vec())
                .unwrap_or_else(|| RgbImage::new(self.width, self.height)),
            PixelLayout::Gray8 => {
                RgbImage::from_fn(self.width, self.height, |x, y| {
                    let v = self.data[(y * self.width + x) as usize];
                    Rgb([v, v, v])
                })
            }
        }
    }

    pub fn to_gray_image(&self) -> GrayImage {
        self.luma().clone()
    }

    fn compute_luma(&self) -> GrayImage {
        match self.layout {
            PixelLayout::Gray8 => GrayImage::from_raw(self.width, self.height, self.data.to_vec())
                .unwrap_or_else(|| GrayImage::new(self.width, self.height)),
            PixelLayout::Rgb8 => {
                match ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(self.width, self.height, &self.data[..])
                {
                    Some(view) => image::imageops::grayscale(&view),
                    None => GrayImage::new(self.width, self.height),
                }
            }
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .finish()
    }
}
