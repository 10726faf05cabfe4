//! Vision primitives behind the stabilizers and quality indicators.

mod backend;
mod backends;
mod correspondence;
mod registry;

pub mod corners;
pub mod estimate;
pub mod flow;
pub mod ssim;
pub mod warp;

pub use backend::{
    BorderFill, CornerParams, CorrespondenceMode, FlowField, RansacParams, TrackedPoint,
    VisionBackend, VisionCapability,
};
pub use backends::{CpuBackend, StubBackend};
pub use correspondence::{grid_positions, sample_flow_grid, CorrespondenceSet};
pub use flow::LkParams;
pub use registry::BackendRegistry;
