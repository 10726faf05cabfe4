//! Per-frame processing latency.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use crate::config::QualityConfig;
use crate::frame::Frame;
use crate::ingest::{FileSource, FrameSource};
use crate::stabilize::Stabilizer;

/// How the warm-up prefix relates to the timed window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmupPolicy {
    /// Time the frames that follow the warm-up prefix.
    #[default]
    Disjoint,
    /// Rewind after warm-up and time from frame 0 with primed state. The
    /// warm-up frames are processed twice.
    Rewind,
}

impl FromStr for WarmupPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disjoint" => Ok(WarmupPolicy::Disjoint),
            "rewind" | "reuse" => Ok(WarmupPolicy::Rewind),
            other => Err(anyhow!(
                "unknown warm-up policy '{}' (expected disjoint|rewind)",
                other
            )),
        }
    }
}

impl fmt::Display for WarmupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarmupPolicy::Disjoint => write!(f, "disjoint"),
            WarmupPolicy::Rewind => write!(f, "rewind"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatencyOptions {
    pub warmup_frames: usize,
    pub policy: WarmupPolicy,
    /// Cap on timed frames.
    pub max_frames: Option<usize>,
}

impl Default for LatencyOptions {
    fn default() -> Self {
        Self::from(&QualityConfig::default())
    }
}

impl From<&QualityConfig> for LatencyOptions {
    fn from(config: &QualityConfig) -> Self {
        Self {
            warmup_frames: config.warmup_frames,
            policy: config.warmup_policy,
            max_frames: config.max_frames,
        }
    }
}

/// Mean wall-clock milliseconds per call of `process` over the timed window.
/// NaN when the timed window is empty.
pub fn measure_latency_with<F>(
    source: &mut dyn FrameSource,
    options: &LatencyOptions,
    mut process: F,
) -> Result<f64>
where
    F: FnMut(&Frame),
{
    let mut warmed = 0usize;
    while warmed < options.warmup_frames {
        let Some(frame) = source.next_frame()? else {
            break;
        };
        process(&frame);
        warmed += 1;
    }
    if options.policy == WarmupPolicy::Rewind {
        source.rewind()?;
    }

    let mut timed = 0usize;
    let mut total_ms = 0.0;
    loop {
        if options.max_frames.is_some_and(|max| timed >= max) {
            break;
        }
        let Some(frame) = source.next_frame()? else {
            break;
        };
        let started = Instant::now();
        process(&frame);
        total_ms += started.elapsed().as_secs_f64() * 1000.0;
        timed += 1;
    }

    log::debug!(
        "latency: {} warm-up frames ({}), {} timed",
        warmed,
        options.policy,
        timed
    );
    if timed == 0 {
        return Ok(f64::NAN);
    }
    Ok(total_ms / timed as f64)
}

/// Latency of a stabilizer. The stabilizer is reset before warm-up.
pub fn measure_latency(
    source: &mut dyn FrameSource,
    stabilizer: &mut dyn Stabilizer,
    options: &LatencyOptions,
) -> Result<f64> {
    stabilizer.reset();
    measure_latency_with(source, options, |frame| {
        stabilizer.process(frame);
    })
}

pub fn measure_latency_from_video(
    path: &str,
    stabilizer: &mut dyn Stabilizer,
    options: &LatencyOptions,
) -> Result<f64> {
    let mut source = FileSource::open(path)?;
    measure_latency(&mut source, stabilizer, options)
}
