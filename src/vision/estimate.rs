//! Robust model fitting: similarity and homography under RANSAC.
//!
//! Both estimators draw minimal samples from a seeded generator, so a fit on
//! the same correspondences is reproducible. The best consensus set is refit
//! with least squares before returning.

use anyhow::{anyhow, Result};
use nalgebra::{DMatrix, DVector, Matrix3, Point2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cmp::Ordering;

use crate::transform::{Homography, RigidTransform};

use super::backend::RansacParams;
use super::correspondence::CorrespondenceSet;

/// 4-DOF fit `dst = s·R(θ)·src + t`, stored as `a = s·cosθ`, `b = s·sinθ`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimilarityFit {
    pub a: f64,
    pub b: f64,
    pub tx: f64,
    pub ty: f64,
    pub inliers: usize,
}

impl SimilarityFit {
    pub fn scale(&self) -> f64 {
        self.a.hypot(self.b)
    }

    pub fn rotation(&self) -> f64 {
        self.b.atan2(self.a)
    }

    /// Drop the scale, keep translation and rotation.
    pub fn rigid(&self) -> RigidTransform {
        RigidTransform::new(self.tx, self.ty, self.rotation())
    }

    fn apply(&self, p: &Point2<f64>) -> Point2<f64> {
        Point2::new(
            self.a * p.x - self.b * p.y + self.tx,
            self.b * p.x + self.a * p.y + self.ty,
        )
    }
}

pub fn fit_similarity(set: &CorrespondenceSet, params: &RansacParams) -> Result<SimilarityFit> {
    let (src, dst) = (set.source(), set.destination());
    if src.len() < 2 {
        return Err(anyhow!(
            "similarity fit needs at least 2 correspondences, got {}",
            src.len()
        ));
    }

    let fit_subset = |indices: &[usize]| {
        let s: Vec<Point2<f64>> = indices.iter().map(|&i| src[i]).collect();
        let d: Vec<Point2<f64>> = indices.iter().map(|&i| dst[i]).collect();
        similarity_least_squares(&s, &d)
    };
    let residual = |m: &SimilarityFit, i: usize| (m.apply(&src[i]) - dst[i]).norm_squared();

    let (model, inliers) = ransac(src.len(), 2, params, fit_subset, residual)
        .ok_or_else(|| anyhow!("similarity fit found no consensus"))?;
    let refined = fit_subset(&inliers).unwrap_or(model);
    if ![refined.a, refined.b, refined.tx, refined.ty]
        .iter()
        .all(|v| v.is_finite())
    {
        return Err(anyhow!("similarity fit is not finite"));
    }
    Ok(SimilarityFit {
        inliers: inliers.len(),
        ..refined
    })
}

pub fn fit_homography(set: &CorrespondenceSet, params: &RansacParams) -> Result<Homography> {
    let (src, dst) = (set.source(), set.destination());
    if src.len() < 4 {
        return Err(anyhow!(
            "homography fit needs at least 4 correspondences, got {}",
            src.len()
        ));
    }

    let fit_subset = |indices: &[usize]| {
        let s: Vec<Point2<f64>> = indices.iter().map(|&i| src[i]).collect();
        let d: Vec<Point2<f64>> = indices.iter().map(|&i| dst[i]).collect();
        homography_dlt(&s, &d)
    };
    let residual = |m: &Matrix3<f64>, i: usize| reprojection_error_sq(m, &src[i], &dst[i]);

    let (model, inliers) = ransac(src.len(), 4, params, fit_subset, residual)
        .ok_or_else(|| anyhow!("homography fit found no consensus"))?;
    let refined = fit_subset(&inliers).unwrap_or(model);
    let homography = Homography::from_matrix(refined)?;
    homography.check_degenerate()?;
    Ok(homography)
}

fn similarity_least_squares(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<SimilarityFit> {
    let n = src.len() as f64;
    if src.len() < 2 {
        return None;
    }
    let cs = src.iter().fold(Point2::origin().coords, |acc, p| acc + p.coords) / n;
    let cd = dst.iter().fold(Point2::origin().coords, |acc, p| acc + p.coords) / n;

    let (mut sxx, mut dot, mut cross) = (0.0, 0.0, 0.0);
    for (p, q) in src.iter().zip(dst) {
        let u = p.coords - cs;
        let v = q.coords - cd;
        sxx += u.norm_squared();
        dot += u.dot(&v);
        cross += u.x * v.y - u.y * v.x;
    }
    if sxx < 1e-12 {
        return None;
    }
    let a = dot / sxx;
    let b = cross / sxx;
    Some(SimilarityFit {
        a,
        b,
        tx: cd.x - (a * cs.x - b * cs.y),
        ty: cd.y - (b * cs.x + a * cs.y),
        inliers: src.len(),
    })
}

/// Similarity transform moving the centroid to the origin and the mean
/// distance to √2.
fn normalization(points: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let c = points.iter().fold(Point2::origin().coords, |acc, p| acc + p.coords) / n;
    let mean_dist = points.iter().map(|p| (p.coords - c).norm()).sum::<f64>() / n;
    if mean_dist < 1e-12 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * c.x, 0.0, s, -s * c.y, 0.0, 0.0, 1.0))
}

/// Normalized direct linear transform. The solution is the eigenvector of
/// `AᵀA` with the smallest eigenvalue.
fn homography_dlt(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    if src.len() < 4 {
        return None;
    }
    let ts = normalization(src)?;
    let td = normalization(dst)?;

    let mut ata = DMatrix::<f64>::zeros(9, 9);
    for (p, q) in src.iter().zip(dst) {
        let p = ts * p.to_homogeneous();
        let q = td * q.to_homogeneous();
        let (x, y) = (p.x / p.z, p.y / p.z);
        let (u, v) = (q.x / q.z, q.y / q.z);
        let r1 = DVector::from_vec(vec![x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, -u]);
        let r2 = DVector::from_vec(vec![0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, -v]);
        ata += &r1 * r1.transpose();
        ata += &r2 * r2.transpose();
    }

    let eigen = ata.symmetric_eigen();
    let (smallest, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))?;
    let h = eigen.eigenvectors.column(smallest);
    let normalized = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let m = td.try_inverse()? * normalized * ts;
    if m[(2, 2)].abs() < 1e-12 {
        return None;
    }
    let m = m / m[(2, 2)];
    m.iter().all(|v| v.is_finite()).then_some(m)
}

fn reprojection_error_sq(m: &Matrix3<f64>, src: &Point2<f64>, dst: &Point2<f64>) -> f64 {
    let p = m * src.to_homogeneous();
    if p.z.abs() < 1e-12 {
        return f64::INFINITY;
    }
    let (x, y) = (p.x / p.z, p.y / p.z);
    (x - dst.x).powi(2) + (y - dst.y).powi(2)
}

/// Generic RANSAC loop. `residual` returns a squared error.
fn ransac<M, F, R>(
    count: usize,
    sample_size: usize,
    params: &RansacParams,
    fit: F,
    residual: R,
) -> Option<(M, Vec<usize>)>
where
    F: Fn(&[usize]) -> Option<M>,
    R: Fn(&M, usize) -> f64,
{
    if count < sample_size {
        return None;
    }
    let threshold_sq = params.threshold * params.threshold;
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<(M, Vec<usize>)> = None;
    let mut budget = params.max_iterations.max(1);
    let mut iteration = 0;

    while iteration < budget {
        iteration += 1;
        let sample = rand::seq::index::sample(&mut rng, count, sample_size).into_vec();
        let Some(model) = fit(&sample) else {
            continue;
        };
        let inliers: Vec<usize> = (0..count)
            .filter(|&i| residual(&model, i) <= threshold_sq)
            .collect();
        let best_len = best.as_ref().map_or(0, |(_, b)| b.len());
        if inliers.len() > best_len {
            let ratio = inliers.len() as f64 / count as f64;
            budget = budget.min(required_iterations(ratio, sample_size, params.confidence).max(iteration));
            best = Some((model, inliers));
        }
    }
    best
}

fn required_iterations(inlier_ratio: f64, sample_size: usize, confidence: f64) -> usize {
    let good_sample = inlier_ratio.powi(sample_size as i32);
    if good_sample >= 1.0 - 1e-12 {
        return 1;
    }
    if good_sample <= 1e-12 {
        return usize::MAX;
    }
    let confidence = confidence.clamp(0.0, 1.0 - 1e-12);
    let n = (1.0 - confidence).ln() / (1.0 - good_sample).ln();
    if n.is_finite() && n > 0.0 {
        n.ceil() as usize
    } else {
        1
    }
}
