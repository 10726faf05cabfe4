//! Structural similarity over a 7×7 box window.

use anyhow::{anyhow, Result};
use image::GrayImage;

const WINDOW_RADIUS: usize = 3;
const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

/// Summed-area table with a zero row and column in front.
struct Integral {
    stride: usize,
    data: Vec<f64>,
}

impl Integral {
    fn build(width: usize, height: usize, value: impl Fn(usize) -> f64) -> Self {
        let stride = width + 1;
        let mut data = vec![0.0; stride * (height + 1)];
        for y in 0..height {
            let mut row = 0.0;
            for x in 0..width {
                row += value(y * width + x);
                data[(y + 1) * stride + x + 1] = data[y * stride + x + 1] + row;
            }
        }
        Self { stride, data }
    }

    /// Sum over `[x0, x1) × [y0, y1)`.
    fn sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> f64 {
        let s = self.stride;
        self.data[y1 * s + x1] - self.data[y0 * s + x1] - self.data[y1 * s + x0]
            + self.data[y0 * s + x0]
    }
}

/// Mean SSIM of two equally-sized images, clipped to `[0, 1]`. The window is
/// truncated at the borders.
pub fn structural_similarity(a: &GrayImage, b: &GrayImage) -> Result<f64> {
    if a.dimensions() != b.dimensions() {
        return Err(anyhow!(
            "structural similarity needs equal sizes: {:?} vs {:?}",
            a.dimensions(),
            b.dimensions()
        ));
    }
    let (width, height) = a.dimensions();
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 {
        return Err(anyhow!("structural similarity of an empty image"));
    }

    let pa = a.as_raw();
    let pb = b.as_raw();
    let sa = Integral::build(w, h, |i| pa[i] as f64);
    let sb = Integral::build(w, h, |i| pb[i] as f64);
    let saa = Integral::build(w, h, |i| (pa[i] as f64).powi(2));
    let sbb = Integral::build(w, h, |i| (pb[i] as f64).powi(2));
    let sab = Integral::build(w, h, |i| pa[i] as f64 * pb[i] as f64);

    let mut total = 0.0;
    for y in 0..h {
        let y0 = y.saturating_sub(WINDOW_RADIUS);
        let y1 = (y + WINDOW_RADIUS + 1).min(h);
        for x in 0..w {
            let x0 = x.saturating_sub(WINDOW_RADIUS);
            let x1 = (x + WINDOW_RADIUS + 1).min(w);
            let n = ((x1 - x0) * (y1 - y0)) as f64;

            let mu_a = sa.sum(x0, y0, x1, y1) / n;
            let mu_b = sb.sum(x0, y0, x1, y1) / n;
            let var_a = (saa.sum(x0, y0, x1, y1) / n - mu_a * mu_a).max(0.0);
            let var_b = (sbb.sum(x0, y0, x1, y1) / n - mu_b * mu_b).max(0.0);
            let cov = sab.sum(x0, y0, x1, y1) / n - mu_a * mu_b;

            let numerator = (2.0 * mu_a * mu_b + C1) * (2.0 * cov + C2);
            let denominator = (mu_a * mu_a + mu_b * mu_b + C1) * (var_a + var_b + C2) + 1e-8;
            total += numerator / denominator;
        }
    }
    Ok((total / (w * h) as f64).clamp(0.0, 1.0))
}
