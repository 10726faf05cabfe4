//! Pyramidal Lucas–Kanade tracking and lattice-based dense flow.

use anyhow::{anyhow, Result};
use image::GrayImage;
use nalgebra::{Matrix2, Point2, Vector2};

use super::backend::{FlowField, TrackedPoint};

/// Iterative tracker settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LkParams {
    /// Half-size of the square integration window.
    pub window_radius: i32,
    /// Number of pyramid levels including the full-resolution one.
    pub pyramid_levels: usize,
    pub max_iterations: usize,
    /// Stop iterating once an update is shorter than this (pixels).
    pub epsilon: f32,
    /// Minimum eigenvalue of the normalized gradient matrix.
    pub min_eigen: f32,
}

impl Default for LkParams {
    fn default() -> Self {
        Self {
            window_radius: 7,
            pyramid_levels: 3,
            max_iterations: 20,
            epsilon: 0.01,
            min_eigen: 1e-3,
        }
    }
}

/// Floating point intensity plane with edge-clamped sampling.
#[derive(Clone, Debug)]
pub(crate) struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    pub(crate) fn from_gray(image: &GrayImage) -> Self {
        let (w, h) = image.dimensions();
        Self {
            width: w as usize,
            height: h as usize,
            data: image.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }

    fn downsample(&self) -> Option<Plane> {
        let width = self.width / 2;
        let height = self.height / 2;
        if width == 0 || height == 0 {
            return None;
        }
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let sum = self.get(2 * x, 2 * y)
                    + self.get(2 * x + 1, 2 * y)
                    + self.get(2 * x, 2 * y + 1)
                    + self.get(2 * x + 1, 2 * y + 1);
                data.push(sum * 0.25);
            }
        }
        Some(Plane {
            width,
            height,
            data,
        })
    }

    fn get(&self, x: usize, y: usize) -> f32 {
        let x = x.min(self.width - 1);
        let y = y.min(self.height - 1);
        self.data[y * self.width + x]
    }

    fn get_clamped(&self, x: i64, y: i64) -> f32 {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[y * self.width + x]
    }

    /// Bilinear sample at a sub-pixel position.
    fn sample(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (xi, yi) = (x0 as i64, y0 as i64);
        let top = self.get_clamped(xi, yi) * (1.0 - fx) + self.get_clamped(xi + 1, yi) * fx;
        let bottom =
            self.get_clamped(xi, yi + 1) * (1.0 - fx) + self.get_clamped(xi + 1, yi + 1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    /// Central-difference gradient at a sub-pixel position.
    fn gradient(&self, x: f32, y: f32) -> Vector2<f32> {
        Vector2::new(
            0.5 * (self.sample(x + 1.0, y) - self.sample(x - 1.0, y)),
            0.5 * (self.sample(x, y + 1.0) - self.sample(x, y - 1.0)),
        )
    }

    fn contains(&self, p: Vector2<f32>) -> bool {
        p.x >= 0.0 && p.y >= 0.0 && p.x <= (self.width - 1) as f32 && p.y <= (self.height - 1) as f32
    }
}

/// Image pyramid, full resolution first.
pub(crate) struct Pyramid {
    levels: Vec<Plane>,
}

impl Pyramid {
    pub(crate) fn build(image: &GrayImage, levels: usize, window_radius: i32) -> Self {
        let mut planes = vec![Plane::from_gray(image)];
        let min_side = (2 * window_radius + 1) as usize;
        while planes.len() < levels.max(1) {
            let Some(next) = planes.last().and_then(Plane::downsample) else {
                break;
            };
            if next.width < min_side || next.height < min_side {
                break;
            }
            planes.push(next);
        }
        Self { levels: planes }
    }
}

/// Track every point from `prev` into `curr`.
pub fn track_points(
    prev: &GrayImage,
    curr: &GrayImage,
    points: &[Point2<f64>],
    params: &LkParams,
) -> Vec<TrackedPoint> {
    let prev_pyr = Pyramid::build(prev, params.pyramid_levels, params.window_radius);
    let curr_pyr = Pyramid::build(curr, params.pyramid_levels, params.window_radius);
    points
        .iter()
        .map(|&p| track_point(&prev_pyr, &curr_pyr, p, params))
        .collect()
}

pub(crate) fn track_point(
    prev: &Pyramid,
    curr: &Pyramid,
    origin: Point2<f64>,
    params: &LkParams,
) -> TrackedPoint {
    let lost = TrackedPoint {
        origin,
        position: origin,
        found: false,
        error: f64::INFINITY,
    };
    let base = Vector2::new(origin.x as f32, origin.y as f32);
    if !prev.levels[0].contains(base) {
        return lost;
    }

    let r = params.window_radius;
    let window = ((2 * r + 1) * (2 * r + 1)) as f32;
    let levels = prev.levels.len().min(curr.levels.len());
    let mut guess = Vector2::<f32>::zeros();

    for level in (0..levels).rev() {
        let (i_plane, j_plane) = (&prev.levels[level], &curr.levels[level]);
        let scale = 1.0 / (1u32 << level) as f32;
        let p = base * scale;

        let mut template = Vec::with_capacity(window as usize);
        let mut g = Matrix2::<f32>::zeros();
        for oy in -r..=r {
            for ox in -r..=r {
                let (x, y) = (p.x + ox as f32, p.y + oy as f32);
                let grad = i_plane.gradient(x, y);
                g += grad * grad.transpose();
                template.push((i_plane.sample(x, y), grad));
            }
        }

        let half_trace = 0.5 * (g.m11 + g.m22);
        let disc = (0.25 * (g.m11 - g.m22).powi(2) + g.m12 * g.m12).sqrt();
        if (half_trace - disc) / window < params.min_eigen {
            return lost;
        }
        let Some(g_inv) = g.try_inverse() else {
            return lost;
        };

        for _ in 0..params.max_iterations {
            let mut b = Vector2::<f32>::zeros();
            let mut k = 0;
            for oy in -r..=r {
                for ox in -r..=r {
                    let (value, grad) = template[k];
                    k += 1;
                    let q = p + guess + Vector2::new(ox as f32, oy as f32);
                    b += grad * (j_plane.sample(q.x, q.y) - value);
                }
            }
            let step = -(g_inv * b);
            guess += step;
            if !guess.x.is_finite() || !guess.y.is_finite() {
                return lost;
            }
            if step.norm_squared() < params.epsilon * params.epsilon {
                break;
            }
        }

        if level > 0 {
            guess *= 2.0;
        }
    }

    let target = base + guess;
    if !curr.levels[0].contains(target) {
        return lost;
    }

    let (i_plane, j_plane) = (&prev.levels[0], &curr.levels[0]);
    let mut error = 0.0f32;
    for oy in -r..=r {
        for ox in -r..=r {
            let o = Vector2::new(ox as f32, oy as f32);
            let a = i_plane.sample(base.x + o.x, base.y + o.y);
            let b = j_plane.sample(target.x + o.x, target.y + o.y);
            error += (b - a).abs();
        }
    }

    TrackedPoint {
        origin,
        position: Point2::new(target.x as f64, target.y as f64),
        found: true,
        error: (error / window) as f64,
    }
}

/// Dense flow by tracking the centre of every `cell`×`cell` block and
/// spreading the result over the block. Blocks that cannot be tracked take
/// the median flow of the blocks that could.
pub fn dense_flow(
    prev: &GrayImage,
    curr: &GrayImage,
    cell: u32,
    params: &LkParams,
) -> Result<FlowField> {
    if prev.dimensions() != curr.dimensions() {
        return Err(anyhow!(
            "dense flow needs equal frame sizes: {:?} vs {:?}",
            prev.dimensions(),
            curr.dimensions()
        ));
    }
    let (width, height) = prev.dimensions();
    let cell = cell.max(1);
    let cols = width.div_ceil(cell);
    let rows = height.div_ceil(cell);

    let centres: Vec<Point2<f64>> = (0..rows)
        .flat_map(|row| {
            (0..cols).map(move |col| {
                let cx = (col * cell + cell / 2).min(width - 1);
                let cy = (row * cell + cell / 2).min(height - 1);
                Point2::new(cx as f64, cy as f64)
            })
        })
        .collect();
    let tracked = track_points(prev, curr, &centres, params);

    let mut xs: Vec<f32> = Vec::new();
    let mut ys: Vec<f32> = Vec::new();
    for t in tracked.iter().filter(|t| t.found) {
        xs.push((t.position.x - t.origin.x) as f32);
        ys.push((t.position.y - t.origin.y) as f32);
    }
    if xs.is_empty() {
        return Err(anyhow!("dense flow found no trackable texture"));
    }
    let fallback = Vector2::new(median(&mut xs), median(&mut ys));

    let block: Vec<Vector2<f32>> = tracked
        .iter()
        .map(|t| {
            if t.found {
                Vector2::new(
                    (t.position.x - t.origin.x) as f32,
                    (t.position.y - t.origin.y) as f32,
                )
            } else {
                fallback
            }
        })
        .collect();

    let mut vectors = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            vectors.push(block[((y / cell) * cols + x / cell) as usize]);
        }
    }
    FlowField::new(width, height, vectors)
}

fn median(values: &mut [f32]) -> f32 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn texture(width: u32, height: u32, shift_x: f32, shift_y: f32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let (fx, fy) = (x as f32 - shift_x, y as f32 - shift_y);
            let v = 128.0
                + 45.0 * (fx * 0.23).sin()
                + 45.0 * (fy * 0.19).cos()
                + 25.0 * ((fx + fy) * 0.11).sin();
            Luma([v.clamp(0.0, 255.0) as u8])
        })
    }

    #[test]
    fn tracks_a_translated_texture() {
        let prev = texture(96, 96, 0.0, 0.0);
        let curr = texture(96, 96, 3.0, -2.0);
        let points = vec![Point2::new(40.0, 40.0), Point2::new(60.0, 50.0)];
        let tracked = track_points(&prev, &curr, &points, &LkParams::default());
        for t in tracked {
            assert!(t.found);
            assert!((t.position.x - t.origin.x - 3.0).abs() < 0.3, "{t:?}");
            assert!((t.position.y - t.origin.y + 2.0).abs() < 0.3, "{t:?}");
        }
    }

    #[test]
    fn flat_regions_are_lost() {
        let flat = GrayImage::from_pixel(48, 48, Luma([90]));
        let tracked = track_points(&flat, &flat, &[Point2::new(24.0, 24.0)], &LkParams::default());
        assert!(!tracked[0].found);
    }

    #[test]
    fn dense_flow_recovers_global_shift() -> Result<()> {
        let prev = texture(80, 64, 0.0, 0.0);
        let curr = texture(80, 64, 2.0, 1.0);
        let flow = dense_flow(&prev, &curr, 8, &LkParams::default())?;
        assert_eq!((flow.width(), flow.height()), (80, 64));
        let v = flow.at(40, 32);
        assert!((v.x - 2.0).abs() < 0.3 && (v.y - 1.0).abs() < 0.3, "{v:?}");
        Ok(())
    }

    #[test]
    fn dense_flow_rejects_size_mismatch() {
        let a = texture(32, 32, 0.0, 0.0);
        let b = texture(32, 16, 0.0, 0.0);
        assert!(dense_flow(&a, &b, 8, &LkParams::default()).is_err());
    }
}
