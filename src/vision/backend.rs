use anyhow::{anyhow, Result};
use image::GrayImage;
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;
use crate::transform::{Homography, RigidTransform};

use super::correspondence::{sample_flow_grid, CorrespondenceSet};
use super::{estimate, ssim, warp};

/// Capabilities a vision backend can provide.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VisionCapability {
    CornerDetection,
    SparseTracking,
    DenseFlow,
    RigidFit,
    HomographyFit,
    Warp,
    StructuralSimilarity,
}

/// Corner detection budget: at most `max_count` corners whose response is at
/// least `quality_level` times the strongest one, `min_distance` pixels apart.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CornerParams {
    pub max_count: usize,
    pub quality_level: f64,
    pub min_distance: f64,
}

impl CornerParams {
    pub fn new(max_count: usize, quality_level: f64, min_distance: f64) -> Self {
        Self {
            max_count,
            quality_level,
            min_distance,
        }
    }
}

impl Default for CornerParams {
    fn default() -> Self {
        Self::new(500, 0.01, 8.0)
    }
}

/// Outlier-robust fitting parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RansacParams {
    /// Reprojection error (pixels) under which a pair counts as an inlier.
    pub threshold: f64,
    /// Desired probability of drawing one outlier-free sample.
    pub confidence: f64,
    pub max_iterations: usize,
    pub seed: u64,
}

impl RansacParams {
    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            confidence: 0.99,
            max_iterations: 2000,
            seed: 0x5eed_cafe,
        }
    }
}

/// A point followed from a reference frame into the current frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackedPoint {
    pub origin: Point2<f64>,
    pub position: Point2<f64>,
    pub found: bool,
    /// Mean absolute intensity difference over the tracking window.
    pub error: f64,
}

/// Per-pixel displacement from a reference frame to the current frame.
#[derive(Clone, Debug)]
pub struct FlowField {
    width: u32,
    height: u32,
    vectors: Vec<Vector2<f32>>,
}

impl FlowField {
    pub fn new(width: u32, height: u32, vectors: Vec<Vector2<f32>>) -> Result<Self> {
        if vectors.len() != (width as usize) * (height as usize) {
            return Err(anyhow!(
                "flow field length mismatch: expected {}, got {}",
                (width as usize) * (height as usize),
                vectors.len()
            ));
        }
        Ok(Self {
            width,
            height,
            vectors,
        })
    }

    pub fn uniform(width: u32, height: u32, v: Vector2<f32>) -> Self {
        Self {
            width,
            height,
            vectors: vec![v; (width as usize) * (height as usize)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Displacement at `(x, y)`, clamped to the field bounds.
    pub fn at(&self, x: u32, y: u32) -> Vector2<f32> {
        let x = x.min(self.width.saturating_sub(1)) as usize;
        let y = y.min(self.height.saturating_sub(1)) as usize;
        self.vectors[y * self.width as usize + x]
    }
}

/// How `extract_correspondences` produces pairs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CorrespondenceMode {
    /// Dense flow sampled every `stride` pixels.
    DenseGrid { stride: u32 },
    /// Corners detected on the reference frame, tracked into the current one.
    SparseCorners(CornerParams),
}

/// Pixel value written where a warp has no source pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BorderFill {
    #[default]
    Black,
    Constant(u8),
}

impl BorderFill {
    pub fn value(self) -> u8 {
        match self {
            BorderFill::Black => 0,
            BorderFill::Constant(v) => v,
        }
    }
}

/// Vision primitives consumed by the stabilizers and the quality pipeline.
///
/// Backends are stateless with respect to the stream: everything they need
/// arrives as arguments, so one backend can be shared by several stabilizers
/// and indicator runs. Errors are transient estimation failures; callers
/// decide how to recover.
///
/// Fitting, warping and structural similarity have shared default
/// implementations; a backend normally only provides feature extraction.
pub trait VisionBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: VisionCapability) -> bool;

    /// Corners on `frame`, strongest first.
    fn detect_corners(&self, frame: &Frame, params: &CornerParams) -> Result<Vec<Point2<f64>>>;

    /// Follow `points` (positions in `prev`) into `curr`. One entry per input.
    fn track_points(
        &self,
        prev: &Frame,
        curr: &Frame,
        points: &[Point2<f64>],
    ) -> Result<Vec<TrackedPoint>>;

    /// Per-pixel flow from `prev` to `curr`.
    fn dense_flow(&self, prev: &Frame, curr: &Frame) -> Result<FlowField>;

    fn extract_correspondences(
        &self,
        prev: &Frame,
        curr: &Frame,
        mode: CorrespondenceMode,
    ) -> Result<CorrespondenceSet> {
        match mode {
            CorrespondenceMode::DenseGrid { stride } => {
                let flow = self.dense_flow(prev, curr)?;
                Ok(sample_flow_grid(&flow, stride))
            }
            CorrespondenceMode::SparseCorners(params) => {
                let corners = self.detect_corners(prev, &params)?;
                let tracked = self.track_points(prev, curr, &corners)?;
                Ok(CorrespondenceSet::from_tracked(&tracked))
            }
        }
    }

    /// Rotation + translation from source to destination points.
    fn fit_rigid(&self, set: &CorrespondenceSet, params: &RansacParams) -> Result<RigidTransform> {
        estimate::fit_similarity(set, params).map(|fit| fit.rigid())
    }

    fn fit_homography(&self, set: &CorrespondenceSet, params: &RansacParams) -> Result<Homography> {
        estimate::fit_homography(set, params)
    }

    /// Warp `frame` by `transform` (source → destination pixel mapping) into a
    /// frame of the same size.
    fn warp(&self, frame: &Frame, transform: &Homography, fill: BorderFill) -> Result<Frame> {
        warp::warp_frame(frame, transform, fill)
    }

    /// Mean structural similarity of two equally-sized luminance patches.
    fn structural_similarity(&self, a: &GrayImage, b: &GrayImage) -> Result<f64> {
        ssim::structural_similarity(a, b)
    }
}
