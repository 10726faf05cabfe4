//! Shi–Tomasi corner detection.
//!
//! Response is the smaller eigenvalue of the structure tensor summed over a
//! 3×3 block of Sobel gradients. Candidates must beat `quality_level` times
//! the strongest response and be a 3×3 local maximum; the survivors are taken
//! strongest first, skipping any closer than `min_distance` to one already
//! accepted.

use image::GrayImage;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use nalgebra::Point2;
use std::cmp::Ordering;

use super::backend::CornerParams;

pub fn good_features_to_track(image: &GrayImage, params: &CornerParams) -> Vec<Point2<f64>> {
    let (width, height) = image.dimensions();
    let (w, h) = (width as usize, height as usize);
    if w < 5 || h < 5 || params.max_count == 0 {
        return Vec::new();
    }

    let response = min_eigen_response(image);
    let max_response = response.iter().copied().fold(0.0f32, f32::max);
    if max_response <= 0.0 {
        return Vec::new();
    }
    let threshold = (params.quality_level.max(0.0) as f32) * max_response;

    let mut candidates: Vec<(usize, f32)> = Vec::new();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let r = response[y * w + x];
            if r <= threshold || r <= 0.0 {
                continue;
            }
            let is_peak = (y - 1..=y + 1)
                .all(|ny| (x - 1..=x + 1).all(|nx| response[ny * w + nx] <= r));
            if is_peak {
                candidates.push((y * w + x, r));
            }
        }
    }
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));

    select_spaced(&candidates, w, h, params)
}

fn min_eigen_response(image: &GrayImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let (w, h) = (width as usize, height as usize);
    let gx = horizontal_sobel(image);
    let gy = vertical_sobel(image);

    let mut xx = vec![0.0f32; w * h];
    let mut xy = vec![0.0f32; w * h];
    let mut yy = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            // Sobel kernels are unnormalized (gain 8)
            let dx = gx.get_pixel(x as u32, y as u32).0[0] as f32 / 8.0;
            let dy = gy.get_pixel(x as u32, y as u32).0[0] as f32 / 8.0;
            let i = y * w + x;
            xx[i] = dx * dx;
            xy[i] = dx * dy;
            yy[i] = dy * dy;
        }
    }

    let mut response = vec![0.0f32; w * h];
    // The outermost two rings carry clamped-border gradients.
    for y in 2..h.saturating_sub(2) {
        for x in 2..w.saturating_sub(2) {
            let (mut a, mut b, mut c) = (0.0f32, 0.0f32, 0.0f32);
            for ny in y - 1..=y + 1 {
                for nx in x - 1..=x + 1 {
                    let i = ny * w + nx;
                    a += xx[i];
                    b += xy[i];
                    c += yy[i];
                }
            }
            let half_trace = 0.5 * (a + c);
            let disc = (0.25 * (a - c) * (a - c) + b * b).sqrt();
            response[y * w + x] = (half_trace - disc).max(0.0);
        }
    }
    response
}

fn select_spaced(
    candidates: &[(usize, f32)],
    width: usize,
    height: usize,
    params: &CornerParams,
) -> Vec<Point2<f64>> {
    let min_distance = params.min_distance.max(0.0);
    let min_distance_sq = min_distance * min_distance;
    let cell = min_distance.max(1.0);
    let grid_w = (width as f64 / cell).ceil() as usize + 1;
    let grid_h = (height as f64 / cell).ceil() as usize + 1;
    let mut grid: Vec<Vec<Point2<f64>>> = vec![Vec::new(); grid_w * grid_h];

    let mut accepted = Vec::new();
    for &(index, _) in candidates {
        let p = Point2::new((index % width) as f64, (index / width) as f64);
        let gx = (p.x / cell) as usize;
        let gy = (p.y / cell) as usize;

        let crowded = min_distance_sq > 0.0
            && (gy.saturating_sub(1)..=(gy + 1).min(grid_h - 1)).any(|cy| {
                (gx.saturating_sub(1)..=(gx + 1).min(grid_w - 1)).any(|cx| {
                    grid[cy * grid_w + cx]
                        .iter()
                        .any(|q| (*q - p).norm_squared() < min_distance_sq)
                })
            });
        if crowded {
            continue;
        }

        grid[gy * grid_w + gx].push(p);
        accepted.push(p);
        if accepted.len() >= params.max_count {
            break;
        }
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn checkerboard(size: u32, square: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if ((x / square) + (y / square)) % 2 == 0 {
                Luma([220])
            } else {
                Luma([30])
            }
        })
    }

    #[test]
    fn flat_image_has_no_corners() {
        let image = GrayImage::from_pixel(32, 32, Luma([128]));
        assert!(good_features_to_track(&image, &CornerParams::default()).is_empty());
    }

    #[test]
    fn checkerboard_corners_respect_budget_and_spacing() {
        let image = checkerboard(64, 8);
        let params = CornerParams::new(20, 0.01, 6.0);
        let corners = good_features_to_track(&image, &params);
        assert!(!corners.is_empty());
        assert!(corners.len() <= 20);
        for (i, a) in corners.iter().enumerate() {
            for b in &corners[i + 1..] {
                assert!((a - b).norm() >= 6.0);
            }
        }
    }

    #[test]
    fn corners_sit_near_square_junctions() {
        let image = checkerboard(64, 16);
        let corners = good_features_to_track(&image, &CornerParams::new(50, 0.1, 4.0));
        assert!(!corners.is_empty());
        for c in corners {
            let dx = (c.x - (c.x / 16.0).round() * 16.0).abs();
            let dy = (c.y - (c.y / 16.0).round() * 16.0).abs();
            assert!(dx <= 2.0 && dy <= 2.0, "corner {c:?} far from a junction");
        }
    }
}
