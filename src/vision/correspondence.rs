use anyhow::{anyhow, Result};
use nalgebra::Point2;

use super::backend::{FlowField, TrackedPoint};

/// Matched point pairs between a reference frame (`source`) and the current
/// frame (`destination`), optionally with a per-pair confidence in `[0, 1]`.
#[derive(Clone, Debug, Default)]
pub struct CorrespondenceSet {
    source: Vec<Point2<f64>>,
    destination: Vec<Point2<f64>>,
    confidence: Option<Vec<f64>>,
}

impl CorrespondenceSet {
    pub fn new(source: Vec<Point2<f64>>, destination: Vec<Point2<f64>>) -> Result<Self> {
        if source.len() != destination.len() {
            return Err(anyhow!(
                "correspondence length mismatch: {} sources, {} destinations",
                source.len(),
                destination.len()
            ));
        }
        Ok(Self {
            source,
            destination,
            confidence: None,
        })
    }

    /// Attach confidences. Values are clamped into `[0, 1]`; NaN becomes 0.
    pub fn with_confidence(mut self, confidence: Vec<f64>) -> Result<Self> {
        if confidence.len() != self.source.len() {
            return Err(anyhow!(
                "confidence length mismatch: expected {}, got {}",
                self.source.len(),
                confidence.len()
            ));
        }
        self.confidence = Some(
            confidence
                .into_iter()
                .map(|c| if c.is_nan() { 0.0 } else { c.clamp(0.0, 1.0) })
                .collect(),
        );
        Ok(self)
    }

    /// Successfully tracked points, confidence `1 / (1 + error)`.
    pub fn from_tracked(tracked: &[TrackedPoint]) -> Self {
        let found: Vec<&TrackedPoint> = tracked.iter().filter(|t| t.found).collect();
        Self {
            source: found.iter().map(|t| t.origin).collect(),
            destination: found.iter().map(|t| t.position).collect(),
            confidence: Some(
                found
                    .iter()
                    .map(|t| 1.0 / (1.0 + t.error.max(0.0)))
                    .collect(),
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn source(&self) -> &[Point2<f64>] {
        &self.source
    }

    pub fn destination(&self) -> &[Point2<f64>] {
        &self.destination
    }

    pub fn confidence(&self) -> Option<&[f64]> {
        self.confidence.as_deref()
    }

    pub fn mean_confidence(&self) -> Option<f64> {
        let confidence = self.confidence.as_ref()?;
        if confidence.is_empty() {
            return None;
        }
        Some(confidence.iter().sum::<f64>() / confidence.len() as f64)
    }

    /// Number of pairs whose confidence is strictly above `threshold`.
    /// Zero when no confidences are attached.
    pub fn count_above(&self, threshold: f64) -> usize {
        self.confidence
            .as_ref()
            .map_or(0, |c| c.iter().filter(|&&v| v > threshold).count())
    }

    /// Pairs whose confidence is strictly above `threshold`.
    pub fn filter_by_confidence(&self, threshold: f64) -> CorrespondenceSet {
        let Some(confidence) = &self.confidence else {
            return CorrespondenceSet::default();
        };
        let keep: Vec<usize> = (0..self.len())
            .filter(|&i| confidence[i] > threshold)
            .collect();
        CorrespondenceSet {
            source: keep.iter().map(|&i| self.source[i]).collect(),
            destination: keep.iter().map(|&i| self.destination[i]).collect(),
            confidence: Some(keep.iter().map(|&i| confidence[i]).collect()),
        }
    }
}

/// Grid sample positions `(x, y)` every `stride` pixels in both axes,
/// row-major, starting at the origin.
pub fn grid_positions(width: u32, height: u32, stride: u32) -> Vec<(u32, u32)> {
    let stride = stride.max(1) as usize;
    (0..height)
        .step_by(stride)
        .flat_map(|y| (0..width).step_by(stride).map(move |x| (x, y)))
        .collect()
}

/// Turn a flow field into correspondences on a fixed stride grid.
pub fn sample_flow_grid(flow: &FlowField, stride: u32) -> CorrespondenceSet {
    let positions = grid_positions(flow.width(), flow.height(), stride);
    let mut source = Vec::with_capacity(positions.len());
    let mut destination = Vec::with_capacity(positions.len());
    for (x, y) in positions {
        let v = flow.at(x, y);
        source.push(Point2::new(x as f64, y as f64));
        destination.push(Point2::new(x as f64 + v.x as f64, y as f64 + v.y as f64));
    }
    CorrespondenceSet {
        source,
        destination,
        confidence: None,
    }
}
