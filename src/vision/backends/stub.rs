use std::collections::HashSet;

use anyhow::{anyhow, Result};
use nalgebra::{Point2, Vector2};

use crate::frame::Frame;
use crate::transform::{Homography, RigidTransform};
use crate::vision::backend::{
    CornerParams, FlowField, TrackedPoint, VisionBackend, VisionCapability,
};

/// Scripted backend for testing.
///
/// Scene motion is a fixed rigid step per frame index: the motion from frame
/// `i` to frame `j` is the step applied `j - i` times. Pixel content is
/// ignored. Frames whose index is marked failing yield no usable features.
#[derive(Clone, Debug)]
pub struct StubBackend {
    step: RigidTransform,
    failing: HashSet<u64>,
    tracking_error: f64,
    grid_spacing: u32,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            step: RigidTransform::IDENTITY,
            failing: HashSet::new(),
            tracking_error: 0.0,
            grid_spacing: 16,
        }
    }

    /// Motion applied between consecutive frame indices.
    pub fn with_step(mut self, step: RigidTransform) -> Self {
        self.step = step;
        self
    }

    /// Frames at these indices cannot be tracked into.
    pub fn failing_at(mut self, indices: impl IntoIterator<Item = u64>) -> Self {
        self.failing.extend(indices);
        self
    }

    /// Reported tracking error for every point (confidence `1 / (1 + e)`).
    pub fn with_tracking_error(mut self, error: f64) -> Self {
        self.tracking_error = error;
        self
    }

    pub fn with_grid_spacing(mut self, spacing: u32) -> Self {
        self.grid_spacing = spacing.max(1);
        self
    }

    /// Scripted motion from frame `from` to frame `to`.
    pub fn motion_between(&self, from: u64, to: u64) -> Homography {
        let step = self.step.to_homography();
        let mut motion = Homography::identity();
        for _ in 0..from.abs_diff(to) {
            motion = step.compose(&motion);
        }
        if to < from {
            motion.invert_or_identity()
        } else {
            motion
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VisionBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, _capability: VisionCapability) -> bool {
        true
    }

    fn detect_corners(&self, frame: &Frame, params: &CornerParams) -> Result<Vec<Point2<f64>>> {
        let spacing = self.grid_spacing;
        let half = spacing / 2;
        let mut points = Vec::new();
        for y in (half..frame.height()).step_by(spacing as usize) {
            for x in (half..frame.width()).step_by(spacing as usize) {
                if points.len() >= params.max_count {
                    return Ok(points);
                }
                points.push(Point2::new(x as f64, y as f64));
            }
        }
        Ok(points)
    }

    fn track_points(
        &self,
        prev: &Frame,
        curr: &Frame,
        points: &[Point2<f64>],
    ) -> Result<Vec<TrackedPoint>> {
        let failing = self.failing.contains(&curr.index());
        let motion = self.motion_between(prev.index(), curr.index());
        Ok(points
            .iter()
            .map(|&origin| match motion.apply(&origin) {
                Some(position) if !failing => TrackedPoint {
                    origin,
                    position,
                    found: true,
                    error: self.tracking_error,
                },
                _ => TrackedPoint {
                    origin,
                    position: origin,
                    found: false,
                    error: f64::INFINITY,
                },
            })
            .collect())
    }

    fn dense_flow(&self, prev: &Frame, curr: &Frame) -> Result<FlowField> {
        if self.failing.contains(&curr.index()) {
            return Err(anyhow!("scripted flow failure at frame {}", curr.index()));
        }
        let motion = self.motion_between(prev.index(), curr.index());
        let (width, height) = prev.dimensions();
        let mut vectors = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let p = Point2::new(x as f64, y as f64);
                let q = motion.apply(&p).unwrap_or(p);
                vectors.push(Vector2::new((q.x - p.x) as f32, (q.y - p.y) as f32));
            }
        }
        FlowField::new(width, height, vectors)
    }
}
