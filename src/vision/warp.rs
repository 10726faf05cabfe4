use anyhow::{anyhow, Result};
use image::{Luma, Rgb};
use imageproc::geometric_transformations::{warp, Interpolation, Projection};

use crate::frame::{Frame, PixelLayout};
use crate::transform::Homography;

use super::backend::BorderFill;

/// Warp a frame by a source → destination mapping, keeping its size and
/// stream index. Pixels with no source are filled with `fill`.
pub fn warp_frame(frame: &Frame, transform: &Homography, fill: BorderFill) -> Result<Frame> {
    if *transform == Homography::identity() {
        return Ok(frame.clone());
    }
    let projection = Projection::from_matrix(transform.to_row_major_f32())
        .ok_or_else(|| anyhow!("warp transform is not invertible"))?;
    let value = fill.value();

    match frame.layout() {
        PixelLayout::Rgb8 => {
            let out = warp(
                &frame.to_rgb_image(),
                &projection,
                Interpolation::Bilinear,
                Rgb([value; 3]),
            );
            Frame::from_rgb_image(frame.index(), out)
        }
        PixelLayout::Gray8 => {
            let out = warp(
                frame.luma(),
                &projection,
                Interpolation::Bilinear,
                Luma([value]),
            );
            Frame::from_gray_image(frame.index(), out)
        }
    }
}
