//! Online stabilizers.
//!
//! A stabilizer owns the path state of exactly one stream. Frames must arrive
//! in temporal order without gaps; `reset` returns the instance to its
//! initial state and keeps the configuration.

mod history;
mod homography;
mod rigid;
mod source;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::config::StabilizeConfig;
use crate::frame::Frame;
use crate::vision::VisionBackend;

pub use history::{HistoryEntry, TransformHistory, HISTORY_CAPACITY, RECENT_WINDOW};
pub use homography::HomographyStabilizer;
pub use rigid::RigidStabilizer;
pub use source::{confidence_map, CorrespondenceSource};

/// Smoothing factor used when a NaN is supplied.
const NAN_ALPHA_FALLBACK: f64 = 0.0;

/// Clamp a smoothing factor into `[0, 1]`. NaN maps to 0.
pub fn clamp_alpha(alpha: f64) -> f64 {
    if alpha.is_nan() {
        NAN_ALPHA_FALLBACK
    } else {
        alpha.clamp(0.0, 1.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    /// No reference frame yet; the next frame is a first frame.
    Uninitialized,
    Tracking,
    /// The last frame could not be estimated; its output was a hold.
    Degraded,
}

/// Correspondence strategy of the homography stabilizer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowSource {
    /// Dense flow sampled on a fixed grid.
    #[default]
    Dense,
    /// Rolling set of tracked corners.
    Sparse,
}

impl FromStr for FlowSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dense" | "farneback" | "grid" => Ok(FlowSource::Dense),
            "sparse" | "lucas_kanade" | "corners" => Ok(FlowSource::Sparse),
            other => Err(anyhow!("unknown flow source '{}' (expected dense|sparse)", other)),
        }
    }
}

impl fmt::Display for FlowSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowSource::Dense => write!(f, "dense"),
            FlowSource::Sparse => write!(f, "sparse"),
        }
    }
}

/// Reporting snapshot of the homography stabilizer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct StabilizationInfo {
    /// Mean confidence of the most recent history entries.
    pub avg_confidence: f64,
    /// Frobenius norm of `smoothed_path - I`.
    pub transform_magnitude: f64,
    pub history_length: usize,
}

/// Per-frame stabilization callable.
pub trait Stabilizer: Send {
    fn name(&self) -> &'static str;

    /// Stabilize the next frame of the stream. Never fails: estimation
    /// problems degrade to a held output.
    fn process(&mut self, frame: &Frame) -> Frame;

    /// Forget all path state, history and the reference frame.
    fn reset(&mut self);

    fn state(&self) -> TrackingState;

    /// Reporting snapshot, for stabilizers that keep one.
    fn info(&self) -> Option<StabilizationInfo> {
        None
    }
}

/// Stabilization methods selectable from configuration and the CLI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Rigid,
    HomographyDense,
    HomographySparse,
}

impl Method {
    pub const ALL: [Method; 3] = [Method::Rigid, Method::HomographyDense, Method::HomographySparse];

    /// Build a fresh stabilizer for this method.
    pub fn build(
        self,
        config: &StabilizeConfig,
        backend: Arc<dyn VisionBackend>,
    ) -> Box<dyn Stabilizer> {
        match self {
            Method::Rigid => Box::new(RigidStabilizer::new(config.rigid.clone(), backend)),
            Method::HomographyDense => Box::new(HomographyStabilizer::new(
                config.homography.clone().with_flow_source(FlowSource::Dense),
                backend,
            )),
            Method::HomographySparse => Box::new(HomographyStabilizer::new(
                config.homography.clone().with_flow_source(FlowSource::Sparse),
                backend,
            )),
        }
    }
}

impl FromStr for Method {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rigid" => Ok(Method::Rigid),
            "homography-dense" | "homography" | "dense" => Ok(Method::HomographyDense),
            "homography-sparse" | "sparse" => Ok(Method::HomographySparse),
            other => Err(anyhow!(
                "unknown method '{}' (expected rigid|homography-dense|homography-sparse)",
                other
            )),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Rigid => write!(f, "rigid"),
            Method::HomographyDense => write!(f, "homography-dense"),
            Method::HomographySparse => write!(f, "homography-sparse"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpha_clamps_into_unit_interval() {
        assert_eq!(clamp_alpha(1.7), 1.0);
        assert_eq!(clamp_alpha(-0.2), 0.0);
        assert_eq!(clamp_alpha(0.42), 0.42);
        assert_eq!(clamp_alpha(f64::NAN), 0.0);
    }

    #[test]
    fn method_names_round_trip() {
        for method in Method::ALL {
            assert_eq!(method.to_string().parse::<Method>().unwrap(), method);
        }
        assert!("affine".parse::<Method>().is_err());
    }

    #[test]
    fn flow_source_accepts_aliases() {
        assert_eq!("farneback".parse::<FlowSource>().unwrap(), FlowSource::Dense);
        assert_eq!(" Sparse ".parse::<FlowSource>().unwrap(), FlowSource::Sparse);
    }
}
