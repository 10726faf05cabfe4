//! Unshake: online video stabilization.
//!
//! Two stabilizers share one per-frame contract (`Stabilizer::process`):
//!
//! 1. **Rigid path smoother**: per-frame translation + rotation from tracked
//!    corners, accumulated into a camera path, smoothed with an EMA; each
//!    frame is warped by `smoothed - raw`.
//! 2. **Confidence-weighted homography**: per-frame homography from dense
//!    grid flow or tracked corners, composed into a projective path whose EMA
//!    weight follows the correspondence confidence; each frame is warped by
//!    `smoothed ∘ raw⁻¹`.
//!
//! Estimation failures never surface from `process`: the stabilizer holds its
//! previous output and advances its reference frame.
//!
//! # Module Structure
//!
//! - `transform`: rigid and projective transform algebra
//! - `frame`: immutable frames with cached luminance
//! - `vision`: correspondence, fitting, warping and SSIM behind `VisionBackend`
//! - `stabilize`: the stabilizers and their path state
//! - `quality`: latency, stability, cropping and distortion indicators
//! - `ingest`: frame sources and sinks (synthetic, image sequences, video files)
//! - `pipeline`: source → stabilizer → sink
//! - `config`: file + environment configuration

pub mod config;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod quality;
pub mod stabilize;
pub mod transform;
pub mod ui;
pub mod vision;

pub use config::{HomographyConfig, QualityConfig, RigidConfig, StabilizeConfig};
pub use frame::{Frame, PixelLayout};
pub use ingest::{FileSource, FrameSink, FrameSource, ImageSequenceSink, MemorySink, MemorySource};
pub use pipeline::{stabilize_stream, StreamSummary};
pub use quality::{QualityReport, WarmupPolicy};
pub use stabilize::{
    FlowSource, HomographyStabilizer, Method, RigidStabilizer, StabilizationInfo, Stabilizer,
    TrackingState,
};
pub use transform::{Decomposition, DecompositionBounds, Homography, RigidTransform, TransformError};
pub use vision::{BackendRegistry, CpuBackend, StubBackend, VisionBackend};
