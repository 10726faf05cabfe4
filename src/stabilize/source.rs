use anyhow::{anyhow, Result};
use image::GrayImage;
use imageproc::gradients::sobel_gradients;
use nalgebra::Point2;

use crate::config::HomographyConfig;
use crate::frame::Frame;
use crate::vision::{
    grid_positions, sample_flow_grid, CornerParams, CorrespondenceSet, FlowField, VisionBackend,
};

use super::FlowSource;

/// Flow magnitude (pixels) at which the motion term falls to `1/e`.
const FLOW_MAGNITUDE_SCALE: f64 = 10.0;
const GRADIENT_FLOOR: f64 = 0.1;

/// How the homography stabilizer obtains confidence-carrying correspondences.
#[derive(Clone, Debug)]
pub enum CorrespondenceSource {
    /// Dense flow sampled every `stride` pixels, confidence from the
    /// flow-magnitude/gradient map at the same positions.
    DenseGridFlow { stride: u32 },
    /// Corners tracked frame to frame, confidence `1 / (1 + error)`.
    SparseCornerTrack {
        corners: CornerParams,
        tracked: Vec<Point2<f64>>,
    },
}

impl CorrespondenceSource {
    pub fn from_config(config: &HomographyConfig) -> Self {
        match config.flow_source {
            FlowSource::Dense => CorrespondenceSource::DenseGridFlow {
                stride: config.grid_stride.max(1),
            },
            FlowSource::Sparse => CorrespondenceSource::SparseCornerTrack {
                corners: config.corners,
                tracked: Vec::new(),
            },
        }
    }

    pub fn kind(&self) -> FlowSource {
        match self {
            CorrespondenceSource::DenseGridFlow { .. } => FlowSource::Dense,
            CorrespondenceSource::SparseCornerTrack { .. } => FlowSource::Sparse,
        }
    }

    /// Correspondences from `reference` into `current`, with confidence.
    ///
    /// The sparse source re-detects on `reference` when fewer than
    /// `min_count` points are still tracked.
    pub fn correspond(
        &mut self,
        backend: &dyn VisionBackend,
        reference: &Frame,
        current: &Frame,
        min_count: usize,
    ) -> Result<CorrespondenceSet> {
        match self {
            CorrespondenceSource::DenseGridFlow { stride } => {
                let flow = backend.dense_flow(reference, current)?;
                let set = sample_flow_grid(&flow, *stride);
                let positions = grid_positions(flow.width(), flow.height(), *stride);
                let confidence =
                    confidence_map(reference.luma(), current.luma(), &flow, &positions)?;
                set.with_confidence(confidence)
            }
            CorrespondenceSource::SparseCornerTrack { corners, tracked } => {
                if tracked.len() < min_count.max(1) {
                    *tracked = backend.detect_corners(reference, corners)?;
                    log::debug!("detected {} corners on frame {}", tracked.len(), reference.index());
                }
                let result = backend.track_points(reference, current, tracked)?;
                let set = CorrespondenceSet::from_tracked(&result);
                *tracked = set.destination().to_vec();
                Ok(set)
            }
        }
    }

    /// Drop tracked features so detection restarts on the next reference.
    pub fn reset(&mut self) {
        if let CorrespondenceSource::SparseCornerTrack { tracked, .. } = self {
            tracked.clear();
        }
    }

    pub fn tracked_len(&self) -> usize {
        match self {
            CorrespondenceSource::DenseGridFlow { .. } => 0,
            CorrespondenceSource::SparseCornerTrack { tracked, .. } => tracked.len(),
        }
    }
}

/// Per-position flow confidence: `exp(-|flow| / 10)` times the mean Sobel
/// magnitude of both frames over 255, floored at 0.1 and capped at 1.
pub fn confidence_map(
    prev: &GrayImage,
    curr: &GrayImage,
    flow: &FlowField,
    positions: &[(u32, u32)],
) -> Result<Vec<f64>> {
    if prev.dimensions() != curr.dimensions()
        || prev.dimensions() != (flow.width(), flow.height())
    {
        return Err(anyhow!(
            "confidence map size mismatch: {:?}, {:?}, flow {}x{}",
            prev.dimensions(),
            curr.dimensions(),
            flow.width(),
            flow.height()
        ));
    }
    let grad_prev = sobel_gradients(prev);
    let grad_curr = sobel_gradients(curr);

    Ok(positions
        .iter()
        .map(|&(x, y)| {
            let magnitude = flow.at(x, y).norm() as f64;
            let motion = (-magnitude / FLOW_MAGNITUDE_SCALE).exp();
            let gradient = (grad_prev.get_pixel(x, y).0[0] as f64
                + grad_curr.get_pixel(x, y).0[0] as f64)
                / (2.0 * 255.0);
            motion * gradient.clamp(GRADIENT_FLOOR, 1.0)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::RigidTransform;
    use crate::vision::StubBackend;
    use image::Luma;
    use nalgebra::Vector2;

    #[test]
    fn flat_static_scene_has_floor_confidence() -> Result<()> {
        let flat = GrayImage::from_pixel(40, 40, Luma([100]));
        let flow = FlowField::uniform(40, 40, Vector2::zeros());
        let conf = confidence_map(&flat, &flat, &flow, &[(20, 20)])?;
        assert!((conf[0] - 0.1).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn large_motion_is_down_weighted() -> Result<()> {
        let edges = GrayImage::from_fn(40, 40, |x, _| Luma([if x < 20 { 0 } else { 255 }]));
        let still = FlowField::uniform(40, 40, Vector2::zeros());
        let moving = FlowField::uniform(40, 40, Vector2::new(10.0, 0.0));
        let a = confidence_map(&edges, &edges, &still, &[(20, 20)])?;
        let b = confidence_map(&edges, &edges, &moving, &[(20, 20)])?;
        assert!((a[0] - 1.0).abs() < 1e-12);
        assert!((b[0] - (-1.0f64).exp()).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn sparse_source_keeps_tracking_and_redetects_when_empty() -> Result<()> {
        let backend = StubBackend::new().with_step(RigidTransform::new(1.0, 0.0, 0.0));
        let config = HomographyConfig::default().with_flow_source(FlowSource::Sparse);
        let mut source = CorrespondenceSource::from_config(&config);
        let a = Frame::from_gray_image(0, GrayImage::new(64, 64))?;
        let b = a.with_index(1);

        let set = source.correspond(&backend, &a, &b, 4)?;
        assert_eq!(set.len(), 16);
        assert_eq!(source.tracked_len(), 16);
        assert_eq!(set.destination()[0].x, set.source()[0].x + 1.0);

        source.reset();
        assert_eq!(source.tracked_len(), 0);
        Ok(())
    }
}
