//! 2D transform algebra.
//!
//! Two representations are used by the stabilizers:
//! - `RigidTransform`: translation + rotation with unit scale, stored as the
//!   `(dx, dy, da)` vector the rigid path smoother accumulates.
//! - `Homography`: a 3×3 projective matrix.
//!
//! Composition is left-composition: `a.compose(&b)` is `a ∘ b`, i.e. `b` is
//! applied first and `a` last. The newest transform always sits on the left.
//!
//! Inversion is guarded. A matrix whose determinant magnitude is below
//! `SINGULAR_EPSILON` is rejected with `TransformError::SingularTransform` and
//! the caller substitutes identity; no linear algebra runs on a singular input.

use nalgebra::{Matrix3, Point2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Determinant magnitude below which a matrix is treated as non-invertible.
pub const SINGULAR_EPSILON: f64 = 1e-9;

/// Bounds on the linear part of a fitted homography (normalized so `h22 = 1`).
/// An affine determinant outside this range is a collapsed or exploded fit.
const MIN_AFFINE_DET: f64 = 1e-2;
const MAX_AFFINE_DET: f64 = 1e2;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum TransformError {
    #[error("singular transform (determinant {determinant:e})")]
    SingularTransform { determinant: f64 },
    #[error("transform has non-finite entries")]
    NonFinite,
    #[error("degenerate transform: {0}")]
    Degenerate(&'static str),
}

// ----------------------------------------------------------------------------
// RigidTransform
// ----------------------------------------------------------------------------

/// Translation `(dx, dy)` plus rotation `da` (radians). Scale is fixed at 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    pub dx: f64,
    pub dy: f64,
    pub da: f64,
}

impl RigidTransform {
    pub const IDENTITY: RigidTransform = RigidTransform {
        dx: 0.0,
        dy: 0.0,
        da: 0.0,
    };

    pub fn new(dx: f64, dy: f64, da: f64) -> Self {
        Self { dx, dy, da }
    }

    /// Path accumulation: componentwise sum of `(dx, dy, da)`.
    pub fn accumulate(&self, delta: &RigidTransform) -> Self {
        Self {
            dx: self.dx + delta.dx,
            dy: self.dy + delta.dy,
            da: self.da + delta.da,
        }
    }

    /// Componentwise `self - other`.
    pub fn difference(&self, other: &RigidTransform) -> Self {
        Self {
            dx: self.dx - other.dx,
            dy: self.dy - other.dy,
            da: self.da - other.da,
        }
    }

    /// Vector EMA step: `(1 - weight) * self + weight * target`.
    pub fn blend(&self, target: &RigidTransform, weight: f64) -> Self {
        let keep = 1.0 - weight;
        Self {
            dx: keep * self.dx + weight * target.dx,
            dy: keep * self.dy + weight * target.dy,
            da: keep * self.da + weight * target.da,
        }
    }

    pub fn translation_magnitude(&self) -> f64 {
        self.dx.hypot(self.dy)
    }

    pub fn is_finite(&self) -> bool {
        self.dx.is_finite() && self.dy.is_finite() && self.da.is_finite()
    }

    /// Matrix form `[[cos, -sin, dx], [sin, cos, dy], [0, 0, 1]]`.
    pub fn to_homography(&self) -> Homography {
        let (sin, cos) = self.da.sin_cos();
        Homography(Matrix3::new(
            cos, -sin, self.dx, //
            sin, cos, self.dy, //
            0.0, 0.0, 1.0,
        ))
    }
}

// ----------------------------------------------------------------------------
// Homography
// ----------------------------------------------------------------------------

/// Rotation/scale limits applied by `Homography::decompose`.
///
/// These are robustness bounds: an occluded or degenerate fit can decompose
/// into arbitrarily large rotations or scales, and the clamp keeps reported
/// values inside a plausible handheld range. Real footage can exceed them.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecompositionBounds {
    /// Maximum absolute rotation in radians.
    pub max_rotation: f64,
    pub min_scale: f64,
    pub max_scale: f64,
}

impl Default for DecompositionBounds {
    fn default() -> Self {
        Self {
            max_rotation: std::f64::consts::FRAC_PI_4,
            min_scale: 0.8,
            max_scale: 1.2,
        }
    }
}

impl DecompositionBounds {
    /// Usable bounds: non-finite or non-positive values fall back to the
    /// defaults, a negative rotation limit is taken by magnitude and an
    /// inverted scale range is swapped.
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        let finite = [self.max_rotation, self.min_scale, self.max_scale]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.min_scale <= 0.0 || self.max_scale <= 0.0 {
            return defaults;
        }
        Self {
            max_rotation: self.max_rotation.abs(),
            min_scale: self.min_scale.min(self.max_scale),
            max_scale: self.min_scale.max(self.max_scale),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Decomposition {
    pub rotation: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub translation_x: f64,
    pub translation_y: f64,
}

/// Projective transform stored as a 3×3 matrix acting on homogeneous column
/// vectors.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography(Matrix3<f64>);

impl Default for Homography {
    fn default() -> Self {
        Self::identity()
    }
}

impl Homography {
    pub fn identity() -> Self {
        Self(Matrix3::identity())
    }

    /// Wrap a matrix, rejecting non-finite entries.
    pub fn from_matrix(matrix: Matrix3<f64>) -> Result<Self, TransformError> {
        if matrix.iter().all(|v| v.is_finite()) {
            Ok(Self(matrix))
        } else {
            Err(TransformError::NonFinite)
        }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self(Matrix3::new(1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0))
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.0
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    pub fn determinant(&self) -> f64 {
        self.0.determinant()
    }

    /// `self ∘ other`: apply `other`, then `self`.
    pub fn compose(&self, other: &Homography) -> Homography {
        Homography(self.0 * other.0)
    }

    /// Guarded inverse.
    pub fn invert(&self) -> Result<Homography, TransformError> {
        if !self.is_finite() {
            return Err(TransformError::NonFinite);
        }
        let determinant = self.determinant();
        if !determinant.is_finite() || determinant.abs() < SINGULAR_EPSILON {
            return Err(TransformError::SingularTransform { determinant });
        }
        self.0
            .try_inverse()
            .map(Homography)
            .ok_or(TransformError::SingularTransform { determinant })
    }

    /// Inverse, or identity when the matrix cannot be inverted.
    pub fn invert_or_identity(&self) -> Homography {
        match self.invert() {
            Ok(inverse) => inverse,
            Err(err) => {
                log::debug!("substituting identity: {}", err);
                Homography::identity()
            }
        }
    }

    /// Entrywise EMA step: `(1 - weight) * self + weight * target`.
    pub fn blend(&self, target: &Homography, weight: f64) -> Homography {
        Homography(self.0 * (1.0 - weight) + target.0 * weight)
    }

    /// Frobenius norm of `self - I`.
    pub fn deviation_from_identity(&self) -> f64 {
        (self.0 - Matrix3::identity()).norm()
    }

    /// Map a point. `None` when it lands on the line at infinity.
    pub fn apply(&self, point: &Point2<f64>) -> Option<Point2<f64>> {
        let v = self.0 * point.to_homogeneous();
        if v.z.abs() < f64::EPSILON {
            return None;
        }
        Some(Point2::new(v.x / v.z, v.y / v.z))
    }

    /// Rejects fits that are unusable as compensation: non-finite, singular,
    /// vanishing `h22`, or an affine part that collapses, explodes or mirrors.
    pub fn check_degenerate(&self) -> Result<(), TransformError> {
        if !self.is_finite() {
            return Err(TransformError::NonFinite);
        }
        let determinant = self.determinant();
        if determinant.abs() < SINGULAR_EPSILON {
            return Err(TransformError::SingularTransform { determinant });
        }
        let h22 = self.0[(2, 2)];
        if h22.abs() < SINGULAR_EPSILON {
            return Err(TransformError::Degenerate("h22 is zero"));
        }
        let m = self.0 / h22;
        let affine_det = m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)];
        if !(MIN_AFFINE_DET..=MAX_AFFINE_DET).contains(&affine_det) {
            return Err(TransformError::Degenerate("affine part collapsed or mirrored"));
        }
        Ok(())
    }

    /// Rotation from the first column's angle, scales from the column norms,
    /// translation from the last column. Rotation and scales are clamped to
    /// `bounds`.
    pub fn decompose(&self, bounds: &DecompositionBounds) -> Decomposition {
        if !self.is_finite() {
            return Decomposition {
                scale_x: 1.0,
                scale_y: 1.0,
                ..Decomposition::default()
            };
        }
        let bounds = bounds.sanitized();
        let h = &self.0;
        let rotation = h[(1, 0)].atan2(h[(0, 0)]);
        let scale_x = h[(0, 0)].hypot(h[(1, 0)]);
        let scale_y = h[(0, 1)].hypot(h[(1, 1)]);
        Decomposition {
            rotation: rotation.clamp(-bounds.max_rotation, bounds.max_rotation),
            scale_x: scale_x.clamp(bounds.min_scale, bounds.max_scale),
            scale_y: scale_y.clamp(bounds.min_scale, bounds.max_scale),
            translation_x: h[(0, 2)],
            translation_y: h[(1, 2)],
        }
    }

    /// Row-major `f32` copy, the layout `imageproc` projections take.
    pub fn to_row_major_f32(&self) -> [f32; 9] {
        let h = &self.0;
        [
            h[(0, 0)] as f32,
            h[(0, 1)] as f32,
            h[(0, 2)] as f32,
            h[(1, 0)] as f32,
            h[(1, 1)] as f32,
            h[(1, 2)] as f32,
            h[(2, 0)] as f32,
            h[(2, 1)] as f32,
            h[(2, 2)] as f32,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: &Homography, b: &Homography, tol: f64) -> bool {
        (a.matrix() - b.matrix()).norm() < tol
    }

    #[test]
    fn compose_applies_right_operand_first() {
        let shift = Homography::translation(10.0, 0.0);
        let rotate = RigidTransform::new(0.0, 0.0, std::f64::consts::FRAC_PI_2).to_homography();

        // rotate ∘ shift: (1, 0) -> (11, 0) -> (0, 11)
        let p = rotate.compose(&shift).apply(&Point2::new(1.0, 0.0)).unwrap();
        assert!((p.x - 0.0).abs() < 1e-9);
        assert!((p.y - 11.0).abs() < 1e-9);
    }

    #[test]
    fn invert_round_trips() {
        let h = Homography::from_matrix(Matrix3::new(
            1.02, 0.01, 4.0, -0.02, 0.98, -3.0, 1e-5, 2e-5, 1.0,
        ))
        .unwrap();
        let inv = h.invert().unwrap();
        assert!(approx_eq(&h.compose(&inv), &Homography::identity(), 1e-9));
    }

    #[test]
    fn invert_rejects_singular_matrix() {
        let singular =
            Homography::from_matrix(Matrix3::new(1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 0.0, 0.0, 1.0))
                .unwrap();
        assert!(matches!(
            singular.invert(),
            Err(TransformError::SingularTransform { .. })
        ));
        assert_eq!(singular.invert_or_identity(), Homography::identity());
    }

    #[test]
    fn from_matrix_rejects_nan() {
        let mut m = Matrix3::identity();
        m[(0, 2)] = f64::NAN;
        assert_eq!(Homography::from_matrix(m), Err(TransformError::NonFinite));
    }

    #[test]
    fn decompose_clamps_rotation_and_scale() {
        let bounds = DecompositionBounds::default();
        let wild = RigidTransform::new(3.0, -2.0, 1.2).to_homography();
        let d = wild.decompose(&bounds);
        assert!((d.rotation - std::f64::consts::FRAC_PI_4).abs() < 1e-12);
        assert!((d.translation_x - 3.0).abs() < 1e-12);
        assert!((d.translation_y + 2.0).abs() < 1e-12);

        let zoomed =
            Homography::from_matrix(Matrix3::new(2.0, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 1.0))
                .unwrap();
        let d = zoomed.decompose(&bounds);
        assert_eq!(d.scale_x, 1.2);
        assert_eq!(d.scale_y, 0.8);
    }

    #[test]
    fn decompose_honours_custom_bounds() {
        let bounds = DecompositionBounds {
            max_rotation: 0.1,
            min_scale: 0.5,
            max_scale: 3.0,
        };
        let h = RigidTransform::new(0.0, 0.0, 0.3).to_homography();
        let d = h.decompose(&bounds);
        assert!((d.rotation - 0.1).abs() < 1e-12);
        assert!((d.scale_x - 1.0).abs() < 1e-12);
    }

    #[test]
    fn decompose_tolerates_unusable_bounds() {
        let h = RigidTransform::new(1.0, 2.0, 0.3).to_homography();
        let inverted = DecompositionBounds {
            max_rotation: -0.1,
            min_scale: 1.5,
            max_scale: 1.0,
        };
        let d = h.decompose(&inverted);
        assert!((d.rotation - 0.1).abs() < 1e-12);
        assert!((d.scale_x - 1.0).abs() < 1e-12);

        let nan = DecompositionBounds {
            max_rotation: f64::NAN,
            ..DecompositionBounds::default()
        };
        assert_eq!(nan.sanitized(), DecompositionBounds::default());
        let d = h.decompose(&nan);
        assert!((d.rotation - 0.3).abs() < 1e-12);
    }

    #[test]
    fn blend_is_entrywise() {
        let a = Homography::identity();
        let b = Homography::translation(10.0, -4.0);
        let mid = a.blend(&b, 0.25);
        assert!((mid.matrix()[(0, 2)] - 2.5).abs() < 1e-12);
        assert!((mid.matrix()[(1, 2)] + 1.0).abs() < 1e-12);
        assert!((mid.matrix()[(0, 0)] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn deviation_from_identity_is_frobenius() {
        assert_eq!(Homography::identity().deviation_from_identity(), 0.0);
        let t = Homography::translation(3.0, 4.0);
        assert!((t.deviation_from_identity() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn check_degenerate_flags_mirrored_fit() {
        let mirrored =
            Homography::from_matrix(Matrix3::new(-1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0))
                .unwrap();
        assert!(mirrored.check_degenerate().is_err());
        assert!(Homography::translation(2.0, 1.0).check_degenerate().is_ok());
    }

    #[test]
    fn rigid_path_arithmetic() {
        let path = RigidTransform::IDENTITY
            .accumulate(&RigidTransform::new(1.0, 2.0, 0.1))
            .accumulate(&RigidTransform::new(1.0, 2.0, 0.1));
        assert!((path.dx - 2.0).abs() < 1e-12);
        assert!((path.da - 0.2).abs() < 1e-12);

        let smoothed = RigidTransform::IDENTITY.blend(&path, 0.5);
        let compensation = smoothed.difference(&path);
        let back = path.accumulate(&compensation);
        assert!((back.dx - smoothed.dx).abs() < 1e-12);
        assert!((back.dy - smoothed.dy).abs() < 1e-12);
        assert!((back.da - smoothed.da).abs() < 1e-12);
    }
}
