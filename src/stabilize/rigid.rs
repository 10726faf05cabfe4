//! Rigid (translation + rotation) path smoother.
//!
//! The raw camera path is the running sum of per-frame `(dx, dy, da)`
//! deltas; the smoothed path is its EMA. Each frame is warped by
//! `smoothed - raw`, so the output follows the smoothed path.

use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::config::RigidConfig;
use crate::frame::Frame;
use crate::transform::RigidTransform;
use crate::vision::{BorderFill, CorrespondenceSet, RansacParams, VisionBackend};

use super::{clamp_alpha, Stabilizer, TrackingState};

pub struct RigidStabilizer {
    config: RigidConfig,
    backend: Arc<dyn VisionBackend>,
    state: TrackingState,
    reference: Option<Frame>,
    last_output: Option<Frame>,
    raw_path: RigidTransform,
    smoothed_path: RigidTransform,
}

impl RigidStabilizer {
    pub fn new(mut config: RigidConfig, backend: Arc<dyn VisionBackend>) -> Self {
        config.alpha = clamp_alpha(config.alpha);
        Self {
            config,
            backend,
            state: TrackingState::Uninitialized,
            reference: None,
            last_output: None,
            raw_path: RigidTransform::IDENTITY,
            smoothed_path: RigidTransform::IDENTITY,
        }
    }

    pub fn alpha(&self) -> f64 {
        self.config.alpha
    }

    /// Accumulated raw camera path.
    pub fn raw_path(&self) -> RigidTransform {
        self.raw_path
    }

    pub fn smoothed_path(&self) -> RigidTransform {
        self.smoothed_path
    }

    /// Correction applied to the latest frame: `smoothed - raw`.
    pub fn compensation(&self) -> RigidTransform {
        self.smoothed_path.difference(&self.raw_path)
    }

    fn estimate(&self, reference: &Frame, frame: &Frame) -> Result<RigidTransform> {
        let min = self.config.min_correspondences;
        let corners = self.backend.detect_corners(reference, &self.config.corners)?;
        if corners.len() < min {
            return Err(anyhow!("{} corners, need {}", corners.len(), min));
        }
        let tracked = self.backend.track_points(reference, frame, &corners)?;
        let set = CorrespondenceSet::from_tracked(&tracked);
        if set.len() < min {
            return Err(anyhow!("{} tracked points, need {}", set.len(), min));
        }
        let delta = self
            .backend
            .fit_rigid(&set, &RansacParams::with_threshold(self.config.ransac_threshold))?;
        if !delta.is_finite() {
            return Err(anyhow!("rigid fit is not finite"));
        }
        Ok(delta)
    }
}

impl Stabilizer for RigidStabilizer {
    fn name(&self) -> &'static str {
        "rigid"
    }

    fn process(&mut self, frame: &Frame) -> Frame {
        let Some(reference) = self.reference.replace(frame.clone()) else {
            self.last_output = Some(frame.clone());
            self.state = TrackingState::Tracking;
            return frame.clone();
        };

        let delta = match self.estimate(&reference, frame) {
            Ok(delta) => delta,
            Err(err) => {
                if self.state != TrackingState::Degraded {
                    log::debug!("frame {}: tracking -> degraded: {}", frame.index(), err);
                }
                self.state = TrackingState::Degraded;
                return self.last_output.clone().unwrap_or_else(|| frame.clone());
            }
        };
        if self.state == TrackingState::Degraded {
            log::debug!("frame {}: degraded -> tracking", frame.index());
        }
        self.state = TrackingState::Tracking;

        self.raw_path = self.raw_path.accumulate(&delta);
        self.smoothed_path = self.smoothed_path.blend(&self.raw_path, self.config.alpha);

        let compensation = self.compensation().to_homography();
        let output = match self.backend.warp(frame, &compensation, BorderFill::Black) {
            Ok(output) => output,
            Err(err) => {
                log::debug!("frame {}: warp failed ({}); passing through", frame.index(), err);
                frame.clone()
            }
        };
        self.last_output = Some(output.clone());
        output
    }

    fn reset(&mut self) {
        self.state = TrackingState::Uninitialized;
        self.reference = None;
        self.last_output = None;
        self.raw_path = RigidTransform::IDENTITY;
        self.smoothed_path = RigidTransform::IDENTITY;
    }

    fn state(&self) -> TrackingState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelLayout;
    use crate::vision::StubBackend;

    fn frame(index: u64) -> Frame {
        let data = (0..80 * 60).map(|i| (i % 250) as u8 + 5).collect();
        Frame::new(index, 80, 60, PixelLayout::Gray8, data).unwrap()
    }

    fn stabilizer(backend: StubBackend, alpha: f64) -> RigidStabilizer {
        let config = RigidConfig::default().with_alpha(alpha);
        RigidStabilizer::new(config, Arc::new(backend.with_grid_spacing(10)))
    }

    #[test]
    fn first_frame_is_returned_unchanged() {
        let mut stab = stabilizer(StubBackend::new(), 0.9);
        let input = frame(0);
        assert!(stab.process(&input).same_pixels(&input));
        assert_eq!(stab.raw_path(), RigidTransform::IDENTITY);
    }

    #[test]
    fn constant_translation_accumulates() {
        let backend = StubBackend::new().with_step(RigidTransform::new(2.0, -1.0, 0.0));
        let mut stab = stabilizer(backend, 0.9);
        for i in 0..11 {
            stab.process(&frame(i));
        }
        let raw = stab.raw_path();
        assert!((raw.dx - 20.0).abs() < 1e-6, "{raw:?}");
        assert!((raw.dy + 10.0).abs() < 1e-6, "{raw:?}");
        assert!(raw.da.abs() < 1e-9);
    }

    #[test]
    fn compensation_plus_raw_is_smoothed() {
        let backend = StubBackend::new().with_step(RigidTransform::new(1.0, 0.5, 0.02));
        let mut stab = stabilizer(backend, 0.3);
        for i in 0..6 {
            stab.process(&frame(i));
        }
        let back = stab.raw_path().accumulate(&stab.compensation());
        let smoothed = stab.smoothed_path();
        assert!((back.dx - smoothed.dx).abs() < 1e-12);
        assert!((back.dy - smoothed.dy).abs() < 1e-12);
        assert!((back.da - smoothed.da).abs() < 1e-12);
    }

    #[test]
    fn failed_estimate_holds_output_and_path() {
        let backend = StubBackend::new()
            .with_step(RigidTransform::new(3.0, 0.0, 0.0))
            .failing_at([2]);
        let mut stab = stabilizer(backend, 0.9);
        stab.process(&frame(0));
        let second = stab.process(&frame(1));
        let raw = stab.raw_path();

        let held = stab.process(&frame(2));
        assert!(held.same_pixels(&second));
        assert_eq!(stab.raw_path(), raw);
        assert_eq!(stab.state(), TrackingState::Degraded);

        // reference advanced to frame 2, so frame 3 is one step away
        stab.process(&frame(3));
        assert!((stab.raw_path().dx - 6.0).abs() < 1e-6);
        assert_eq!(stab.state(), TrackingState::Tracking);
    }

    #[test]
    fn alpha_is_clamped() {
        let stab = RigidStabilizer::new(
            RigidConfig {
                alpha: -5.0,
                ..RigidConfig::default()
            },
            Arc::new(StubBackend::new()),
        );
        assert_eq!(stab.alpha(), 0.0);
    }

    #[test]
    fn reset_forgets_reference_and_path() {
        let backend = StubBackend::new().with_step(RigidTransform::new(1.0, 0.0, 0.0));
        let mut stab = stabilizer(backend, 0.5);
        for i in 0..4 {
            stab.process(&frame(i));
        }
        stab.reset();
        assert_eq!(stab.state(), TrackingState::Uninitialized);
        assert_eq!(stab.raw_path(), RigidTransform::IDENTITY);
        let input = frame(4);
        assert!(stab.process(&input).same_pixels(&input));
    }
}
