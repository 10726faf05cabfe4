//! Confidence-weighted homography stabilizer.
//!
//! Per frame:
//! 1. correspondences from the configured source, with confidence;
//! 2. a RANSAC homography on the confident subset;
//! 3. `raw = H ∘ raw`;
//! 4. EMA of the cumulative matrix, weight `α · mean confidence`;
//! 5. warp by `smoothed ∘ raw⁻¹`.
//!
//! Too few correspondences (or a backend failure) is DEGRADED: path state is
//! left alone, the reference advances and the last output is held. A failed
//! fit is not DEGRADED: identity is used and the frame counts as
//! zero-confidence.

use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::config::HomographyConfig;
use crate::frame::Frame;
use crate::transform::{Decomposition, Homography};
use crate::vision::{BorderFill, CorrespondenceSet, RansacParams, VisionBackend};

use super::history::TransformHistory;
use super::source::CorrespondenceSource;
use super::{clamp_alpha, StabilizationInfo, Stabilizer, TrackingState};

const MIN_FIT_POINTS: usize = 4;
const MIN_CONFIDENCE: f64 = 0.1;
const MIN_EFFECTIVE_ALPHA: f64 = 0.1;
const MAX_EFFECTIVE_ALPHA: f64 = 0.95;

pub struct HomographyStabilizer {
    config: HomographyConfig,
    backend: Arc<dyn VisionBackend>,
    source: CorrespondenceSource,
    state: TrackingState,
    reference: Option<Frame>,
    last_output: Option<Frame>,
    raw_path: Homography,
    smoothed_path: Homography,
    /// False until the first successful estimate seeds the smoothed path.
    seeded: bool,
    last_compensation: Homography,
    history: TransformHistory,
}

impl HomographyStabilizer {
    pub fn new(mut config: HomographyConfig, backend: Arc<dyn VisionBackend>) -> Self {
        config.alpha = clamp_alpha(config.alpha);
        config.decomposition = config.decomposition.sanitized();
        let source = CorrespondenceSource::from_config(&config);
        Self {
            config,
            backend,
            source,
            state: TrackingState::Uninitialized,
            reference: None,
            last_output: None,
            raw_path: Homography::identity(),
            smoothed_path: Homography::identity(),
            seeded: false,
            last_compensation: Homography::identity(),
            history: TransformHistory::new(),
        }
    }

    pub fn config(&self) -> &HomographyConfig {
        &self.config
    }

    pub fn alpha(&self) -> f64 {
        self.config.alpha
    }

    pub fn raw_path(&self) -> &Homography {
        &self.raw_path
    }

    pub fn smoothed_path(&self) -> &Homography {
        &self.smoothed_path
    }

    pub fn last_compensation(&self) -> &Homography {
        &self.last_compensation
    }

    pub fn history(&self) -> &TransformHistory {
        &self.history
    }

    /// Recent confidence, correction magnitude and history length.
    pub fn get_info(&self) -> StabilizationInfo {
        StabilizationInfo {
            avg_confidence: self.history.recent_confidence(),
            transform_magnitude: self
                .history
                .latest()
                .map_or(0.0, |entry| entry.smoothed.deviation_from_identity()),
            history_length: self.history.len(),
        }
    }

    /// Bounded decomposition of the latest compensation.
    pub fn current_correction(&self) -> Decomposition {
        self.last_compensation.decompose(&self.config.decomposition)
    }

    fn correspondences(&mut self, reference: &Frame, frame: &Frame) -> Result<CorrespondenceSet> {
        let set = self.source.correspond(
            self.backend.as_ref(),
            reference,
            frame,
            self.config.min_correspondences,
        )?;
        if set.len() < self.config.min_correspondences {
            return Err(anyhow!(
                "{} correspondences, need {}",
                set.len(),
                self.config.min_correspondences
            ));
        }
        Ok(set)
    }

    /// Fit on the confident subset. Identity with zero confidence on failure.
    fn fit(&self, set: &CorrespondenceSet) -> (Homography, f64) {
        let subset = confident_subset(set, self.config.confidence_threshold);
        let params = RansacParams::with_threshold(self.config.ransac_threshold);
        match self.backend.fit_homography(&subset, &params) {
            Ok(h) if h.is_finite() => (h, set.mean_confidence().unwrap_or(0.5)),
            Ok(_) => {
                log::debug!("homography fit is not finite; using identity");
                (Homography::identity(), 0.0)
            }
            Err(err) => {
                log::debug!("homography fit failed ({}); using identity", err);
                (Homography::identity(), 0.0)
            }
        }
    }

    fn degrade(&mut self, frame: &Frame, reason: anyhow::Error) -> Frame {
        if self.state != TrackingState::Degraded {
            log::debug!("frame {}: tracking -> degraded: {}", frame.index(), reason);
        }
        self.state = TrackingState::Degraded;
        self.source.reset();
        self.reference = Some(frame.clone());
        self.last_output.clone().unwrap_or_else(|| frame.clone())
    }
}

/// Pairs above `threshold` if at least four; else above half of it; else all.
fn confident_subset(set: &CorrespondenceSet, threshold: f64) -> CorrespondenceSet {
    if set.confidence().is_none() {
        return set.clone();
    }
    for t in [threshold, threshold * 0.5] {
        if set.count_above(t) >= MIN_FIT_POINTS {
            return set.filter_by_confidence(t);
        }
    }
    set.clone()
}

impl Stabilizer for HomographyStabilizer {
    fn name(&self) -> &'static str {
        match self.source.kind() {
            super::FlowSource::Dense => "homography-dense",
            super::FlowSource::Sparse => "homography-sparse",
        }
    }

    fn process(&mut self, frame: &Frame) -> Frame {
        let Some(reference) = self.reference.take() else {
            self.reference = Some(frame.clone());
            self.last_output = Some(frame.clone());
            self.state = TrackingState::Tracking;
            return frame.clone();
        };

        let set = match self.correspondences(&reference, frame) {
            Ok(set) => set,
            Err(err) => return self.degrade(frame, err),
        };
        if self.state == TrackingState::Degraded {
            log::debug!("frame {}: degraded -> tracking", frame.index());
        }

        let (fitted, confidence) = self.fit(&set);
        self.raw_path = fitted.compose(&self.raw_path);

        let avg_confidence = confidence.clamp(MIN_CONFIDENCE, 1.0);
        let effective_alpha =
            (self.config.alpha * avg_confidence).clamp(MIN_EFFECTIVE_ALPHA, MAX_EFFECTIVE_ALPHA);
        self.smoothed_path = if self.seeded {
            self.smoothed_path.blend(&self.raw_path, effective_alpha)
        } else {
            self.raw_path
        };
        self.seeded = true;

        let compensation = self
            .smoothed_path
            .compose(&self.raw_path.invert_or_identity());
        let output = match self.backend.warp(frame, &compensation, BorderFill::Black) {
            Ok(output) => output,
            Err(err) => {
                log::debug!("frame {}: warp failed ({}); passing through", frame.index(), err);
                frame.clone()
            }
        };

        self.last_compensation = compensation;
        self.history.push(self.smoothed_path, avg_confidence);
        self.reference = Some(frame.clone());
        self.last_output = Some(output.clone());
        self.state = TrackingState::Tracking;
        output
    }

    fn reset(&mut self) {
        self.state = TrackingState::Uninitialized;
        self.reference = None;
        self.last_output = None;
        self.raw_path = Homography::identity();
        self.smoothed_path = Homography::identity();
        self.seeded = false;
        self.last_compensation = Homography::identity();
        self.history.clear();
        self.source.reset();
    }

    fn state(&self) -> TrackingState {
        self.state
    }

    fn info(&self) -> Option<StabilizationInfo> {
        Some(self.get_info())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelLayout;
    use crate::stabilize::FlowSource;
    use crate::transform::{DecompositionBounds, RigidTransform};
    use crate::vision::StubBackend;
    use nalgebra::Point2;

    fn frame(index: u64) -> Frame {
        let data = (0..64 * 48).map(|i| (i % 200) as u8 + 30).collect();
        Frame::new(index, 64, 48, PixelLayout::Gray8, data).unwrap()
    }

    fn stabilizer(backend: StubBackend, source: FlowSource) -> HomographyStabilizer {
        let config = HomographyConfig {
            min_correspondences: 8,
            grid_stride: 8,
            ..HomographyConfig::default()
        }
        .with_flow_source(source);
        HomographyStabilizer::new(config, Arc::new(backend.with_grid_spacing(8)))
    }

    #[test]
    fn first_frame_passes_through_without_reporting() {
        let mut stab = stabilizer(StubBackend::new(), FlowSource::Dense);
        let input = frame(0);
        let out = stab.process(&input);
        assert!(out.same_pixels(&input));
        assert_eq!(stab.state(), TrackingState::Tracking);
        assert_eq!(stab.get_info(), StabilizationInfo::default());
    }

    #[test]
    fn compensation_maps_raw_onto_smoothed() {
        let backend = StubBackend::new().with_step(RigidTransform::new(1.5, -0.5, 0.01));
        for source in [FlowSource::Dense, FlowSource::Sparse] {
            let mut stab = stabilizer(backend.clone(), source);
            for i in 0..8 {
                stab.process(&frame(i));
            }
            let round_trip = stab.last_compensation().compose(stab.raw_path());
            let diff = (round_trip.matrix() - stab.smoothed_path().matrix()).abs().max();
            assert!(diff < 1e-9, "{source}: {diff}");
            assert!(stab.get_info().transform_magnitude > 0.0);
        }
    }

    #[test]
    fn confidence_stays_in_range_and_history_is_bounded() {
        let backend = StubBackend::new()
            .with_step(RigidTransform::new(0.5, 0.5, 0.0))
            .with_tracking_error(3.0);
        let mut stab = stabilizer(backend, FlowSource::Sparse);
        for i in 0..50 {
            stab.process(&frame(i));
            let info = stab.get_info();
            assert!(info.history_length <= 30);
            if info.history_length > 0 {
                assert!((0.1..=1.0).contains(&info.avg_confidence));
            }
        }
        assert_eq!(stab.get_info().history_length, 30);
        // error 3 -> confidence 0.25 for every point
        assert!((stab.get_info().avg_confidence - 0.25).abs() < 1e-12);
    }

    #[test]
    fn degraded_frame_holds_last_output_and_advances_reference() {
        let backend = StubBackend::new()
            .with_step(RigidTransform::new(2.0, 0.0, 0.0))
            .failing_at([3]);
        let mut stab = stabilizer(backend, FlowSource::Dense);
        let mut outputs = Vec::new();
        for i in 0..3 {
            outputs.push(stab.process(&frame(i)));
        }
        let raw_before = *stab.raw_path();
        let history_before = stab.get_info().history_length;

        let held = stab.process(&frame(3));
        assert_eq!(stab.state(), TrackingState::Degraded);
        assert!(held.same_pixels(&outputs[2]));
        assert_eq!(*stab.raw_path(), raw_before);
        assert_eq!(stab.get_info().history_length, history_before);

        // frame 4 is estimated against frame 3: one step of motion
        stab.process(&frame(4));
        assert_eq!(stab.state(), TrackingState::Tracking);
        let tx = stab.raw_path().apply(&Point2::origin()).unwrap().x;
        assert!((tx - 6.0).abs() < 1e-6, "{tx}");
    }

    #[test]
    fn reset_returns_to_first_frame_behaviour() {
        let backend = StubBackend::new().with_step(RigidTransform::new(1.0, 1.0, 0.0));
        let mut stab = stabilizer(backend, FlowSource::Dense);
        for i in 0..5 {
            stab.process(&frame(i));
        }
        stab.reset();
        let info = stab.get_info();
        assert_eq!(info.avg_confidence, 0.0);
        assert_eq!(info.transform_magnitude, 0.0);
        assert_eq!(stab.state(), TrackingState::Uninitialized);

        let input = frame(5);
        assert!(stab.process(&input).same_pixels(&input));
    }

    #[test]
    fn alpha_is_clamped_on_construction() {
        let config = HomographyConfig {
            alpha: 3.0,
            ..HomographyConfig::default()
        };
        let stab = HomographyStabilizer::new(config, Arc::new(StubBackend::new()));
        assert_eq!(stab.alpha(), 1.0);
    }

    /// Scripted backend whose homography fit always fails.
    struct UnfittableBackend(StubBackend);

    impl VisionBackend for UnfittableBackend {
        fn name(&self) -> &'static str {
            "unfittable"
        }

        fn supports(&self, capability: crate::vision::VisionCapability) -> bool {
            self.0.supports(capability)
        }

        fn detect_corners(
            &self,
            frame: &Frame,
            params: &crate::vision::CornerParams,
        ) -> Result<Vec<Point2<f64>>> {
            self.0.detect_corners(frame, params)
        }

        fn track_points(
            &self,
            prev: &Frame,
            curr: &Frame,
            points: &[Point2<f64>],
        ) -> Result<Vec<crate::vision::TrackedPoint>> {
            self.0.track_points(prev, curr, points)
        }

        fn dense_flow(&self, prev: &Frame, curr: &Frame) -> Result<crate::vision::FlowField> {
            self.0.dense_flow(prev, curr)
        }

        fn fit_homography(
            &self,
            _set: &CorrespondenceSet,
            _params: &RansacParams,
        ) -> Result<Homography> {
            Err(anyhow!("no consensus"))
        }
    }

    #[test]
    fn failed_fit_uses_identity_at_floor_confidence() {
        let backend = UnfittableBackend(
            StubBackend::new()
                .with_step(RigidTransform::new(2.0, 1.0, 0.0))
                .with_grid_spacing(8),
        );
        let config = HomographyConfig {
            min_correspondences: 8,
            grid_stride: 8,
            ..HomographyConfig::default()
        };
        let mut stab = HomographyStabilizer::new(config, Arc::new(backend));
        for i in 0..4 {
            let input = frame(i);
            let output = stab.process(&input);
            assert!(output.same_pixels(&input));
        }

        assert_eq!(*stab.raw_path(), Homography::identity());
        assert_eq!(stab.state(), TrackingState::Tracking);
        let info = stab.get_info();
        assert_eq!(info.history_length, 3);
        assert!((info.avg_confidence - 0.1).abs() < 1e-12, "{info:?}");
        assert_eq!(info.transform_magnitude, 0.0);
    }

    #[test]
    fn inverted_decomposition_bounds_are_repaired() {
        let config = HomographyConfig {
            decomposition: DecompositionBounds {
                max_rotation: 0.2,
                min_scale: 1.5,
                max_scale: 1.0,
            },
            ..HomographyConfig::default()
        };
        let stab = HomographyStabilizer::new(config, Arc::new(StubBackend::new()));
        assert_eq!(stab.config().decomposition.min_scale, 1.0);
        assert_eq!(stab.config().decomposition.max_scale, 1.5);
        let correction = stab.current_correction();
        assert_eq!(correction.scale_x, 1.0);
        assert_eq!(correction.rotation, 0.0);
    }

    #[test]
    fn confident_subset_falls_back_in_two_steps() {
        let pts: Vec<Point2<f64>> = (0..6).map(|i| Point2::new(i as f64, 0.0)).collect();
        let set = CorrespondenceSet::new(pts.clone(), pts)
            .unwrap()
            .with_confidence(vec![0.9, 0.9, 0.9, 0.9, 0.1, 0.1])
            .unwrap();
        assert_eq!(confident_subset(&set, 0.6).len(), 4);

        let set = set.with_confidence(vec![0.4, 0.4, 0.4, 0.4, 0.1, 0.9]).unwrap();
        assert_eq!(confident_subset(&set, 0.6).len(), 5);

        let set = set.with_confidence(vec![0.1; 6]).unwrap();
        assert_eq!(confident_subset(&set, 0.6).len(), 6);
    }
}
