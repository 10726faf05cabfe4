//! Stability score: RMS of inter-frame camera translation.
//!
//! Motion is estimated independently of any stabilizer: corners on the
//! previous frame, tracked into the next one, robust rigid fit. A pair that
//! cannot be estimated contributes no sample.

use anyhow::Result;

use crate::config::MotionEstimateConfig;
use crate::frame::Frame;
use crate::ingest::{FileSource, FrameSource};
use crate::vision::{CorrespondenceSet, RansacParams, VisionBackend};

/// Translation magnitude `hypot(dx, dy)` between two frames, if estimable.
pub fn frame_motion(
    backend: &dyn VisionBackend,
    prev: &Frame,
    next: &Frame,
    params: &MotionEstimateConfig,
) -> Option<f64> {
    let corners = match backend.detect_corners(prev, &params.corners) {
        Ok(corners) if corners.len() >= params.min_points => corners,
        Ok(_) => return None,
        Err(err) => {
            log::debug!("frame {}: corner detection failed: {}", prev.index(), err);
            return None;
        }
    };
    let tracked = match backend.track_points(prev, next, &corners) {
        Ok(tracked) => tracked,
        Err(err) => {
            log::debug!("frame {}: tracking failed: {}", next.index(), err);
            return None;
        }
    };
    let set = CorrespondenceSet::from_tracked(&tracked);
    if set.len() < params.min_points {
        return None;
    }
    let fit = backend
        .fit_rigid(&set, &RansacParams::with_threshold(params.ransac_threshold))
        .ok()?;
    let magnitude = fit.dx.hypot(fit.dy);
    magnitude.is_finite().then_some(magnitude)
}

/// Per-step translation magnitudes. `max_frames` caps the number of steps.
pub fn motion_magnitudes(
    source: &mut dyn FrameSource,
    backend: &dyn VisionBackend,
    params: &MotionEstimateConfig,
    max_frames: Option<usize>,
) -> Result<Vec<f64>> {
    let Some(mut prev) = source.next_frame()? else {
        return Ok(Vec::new());
    };
    let mut motions = Vec::new();
    let mut steps = 0usize;
    loop {
        if max_frames.is_some_and(|max| steps >= max) {
            break;
        }
        let Some(frame) = source.next_frame()? else {
            break;
        };
        if let Some(magnitude) = frame_motion(backend, &prev, &frame, params) {
            motions.push(magnitude);
        }
        prev = frame;
        steps += 1;
    }
    log::debug!("stability: {} motion samples over {} steps", motions.len(), steps);
    Ok(motions)
}

/// Root mean square; NaN for no samples.
pub fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

/// Lower is smoother.
pub fn stability_score(
    source: &mut dyn FrameSource,
    backend: &dyn VisionBackend,
    params: &MotionEstimateConfig,
    max_frames: Option<usize>,
) -> Result<f64> {
    Ok(rms(&motion_magnitudes(source, backend, params, max_frames)?))
}

pub fn stability_score_from_video(
    path: &str,
    backend: &dyn VisionBackend,
    params: &MotionEstimateConfig,
    max_frames: Option<usize>,
) -> Result<f64> {
    let mut source = FileSource::open(path)?;
    stability_score(&mut source, backend, params, max_frames)
}

/// `clamp(1 - after / before, 0, 1)`. NaN when either score is undefined or
/// the baseline is zero.
pub fn stability_improvement(before: f64, after: f64) -> f64 {
    if !before.is_finite() || !after.is_finite() || before == 0.0 {
        return f64::NAN;
    }
    (1.0 - after / before).clamp(0.0, 1.0)
}

pub fn stability_improvement_from_videos(
    before_path: &str,
    after_path: &str,
    backend: &dyn VisionBackend,
    params: &MotionEstimateConfig,
    max_frames: Option<usize>,
) -> Result<f64> {
    let before = stability_score_from_video(before_path, backend, params, max_frames)?;
    let after = stability_score_from_video(after_path, backend, params, max_frames)?;
    Ok(stability_improvement(before, after))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::MemorySource;
    use crate::transform::RigidTransform;
    use crate::vision::StubBackend;

    fn frames(count: u64) -> MemorySource {
        let scene = crate::ingest::SyntheticScene::new(
            64,
            48,
            count,
            crate::ingest::SceneMotion::Static,
        );
        MemorySource::new((0..count).map(|i| scene.render(i).unwrap()).collect())
    }

    #[test]
    fn constant_step_gives_constant_magnitude() {
        let backend = StubBackend::new().with_step(RigidTransform::new(3.0, 4.0, 0.0));
        let params = MotionEstimateConfig::default();
        let motions = motion_magnitudes(&mut frames(5), &backend, &params, None).unwrap();
        assert_eq!(motions.len(), 4);
        assert!(motions.iter().all(|m| (m - 5.0).abs() < 1e-6), "{motions:?}");
    }

    #[test]
    fn failed_pairs_are_skipped() {
        let backend = StubBackend::new()
            .with_step(RigidTransform::new(1.0, 0.0, 0.0))
            .failing_at([2]);
        let params = MotionEstimateConfig::default();
        let motions = motion_magnitudes(&mut frames(4), &backend, &params, None).unwrap();
        assert_eq!(motions.len(), 2);
    }

    #[test]
    fn max_frames_caps_steps() {
        let backend = StubBackend::new();
        let params = MotionEstimateConfig::default();
        let motions = motion_magnitudes(&mut frames(10), &backend, &params, Some(3)).unwrap();
        assert_eq!(motions.len(), 3);
    }

    #[test]
    fn single_frame_is_undefined() {
        let backend = StubBackend::new();
        let score =
            stability_score(&mut frames(1), &backend, &MotionEstimateConfig::default(), None)
                .unwrap();
        assert!(score.is_nan());
    }

    #[test]
    fn rms_of_samples() {
        assert!((rms(&[3.0, 4.0]) - (12.5f64).sqrt()).abs() < 1e-12);
        assert!(rms(&[]).is_nan());
    }

    #[test]
    fn improvement_is_clamped_or_undefined() {
        assert!((stability_improvement(4.0, 1.0) - 0.75).abs() < 1e-12);
        assert_eq!(stability_improvement(1.0, 3.0), 0.0);
        assert_eq!(stability_improvement(2.0, 0.0), 1.0);
        assert!(stability_improvement(0.0, 1.0).is_nan());
        assert!(stability_improvement(f64::NAN, 1.0).is_nan());
        assert!(stability_improvement(1.0, f64::NAN).is_nan());
    }
}
