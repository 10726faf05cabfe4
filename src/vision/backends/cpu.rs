use anyhow::{anyhow, Result};
use nalgebra::Point2;

use crate::frame::Frame;
use crate::vision::backend::{
    CornerParams, FlowField, TrackedPoint, VisionBackend, VisionCapability,
};
use crate::vision::corners::good_features_to_track;
use crate::vision::flow::{self, LkParams};

/// Default cell size of the dense flow lattice.
pub const DEFAULT_FLOW_CELL: u32 = 8;

/// Pure-Rust reference backend.
#[derive(Clone, Debug)]
pub struct CpuBackend {
    lk: LkParams,
    flow_cell: u32,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracker(mut self, lk: LkParams) -> Self {
        self.lk = lk;
        self
    }

    pub fn with_flow_cell(mut self, cell: u32) -> Self {
        self.flow_cell = cell.max(1);
        self
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self {
            lk: LkParams::default(),
            flow_cell: DEFAULT_FLOW_CELL,
        }
    }
}

fn ensure_same_size(prev: &Frame, curr: &Frame) -> Result<()> {
    if prev.dimensions() != curr.dimensions() {
        return Err(anyhow!(
            "frame size changed mid-stream: {:?} -> {:?}",
            prev.dimensions(),
            curr.dimensions()
        ));
    }
    Ok(())
}

impl VisionBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn supports(&self, _capability: VisionCapability) -> bool {
        true
    }

    fn detect_corners(&self, frame: &Frame, params: &CornerParams) -> Result<Vec<Point2<f64>>> {
        Ok(good_features_to_track(frame.luma(), params))
    }

    fn track_points(
        &self,
        prev: &Frame,
        curr: &Frame,
        points: &[Point2<f64>],
    ) -> Result<Vec<TrackedPoint>> {
        ensure_same_size(prev, curr)?;
        Ok(flow::track_points(prev.luma(), curr.luma(), points, &self.lk))
    }

    fn dense_flow(&self, prev: &Frame, curr: &Frame) -> Result<FlowField> {
        ensure_same_size(prev, curr)?;
        flow::dense_flow(prev.luma(), curr.luma(), self.flow_cell, &self.lk)
    }
}
