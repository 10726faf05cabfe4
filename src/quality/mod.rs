//! Quality indicators for stabilized video.
//!
//! Four measurements, each independent of any stabilizer's path state:
//! - latency: mean milliseconds per processed frame
//! - stability: RMS of inter-frame camera translation, before and after
//! - cropping: fraction of frame area not lost to border fill
//! - distortion: mean `1 - SSIM` between raw and stabilized frames
//!
//! Degenerate input (empty stream, motionless baseline) yields NaN rather
//! than an error. Errors are reserved for streams that cannot be read.

pub mod cropping;
pub mod distortion;
pub mod latency;
pub mod stability;

use anyhow::{Context, Result};
use serde::{Serialize, Serializer};
use std::io::Write;
use std::path::Path;

use crate::config::QualityConfig;
use crate::ingest::FrameSource;
use crate::stabilize::Stabilizer;
use crate::vision::VisionBackend;

pub use cropping::{cropping_ratio, cropping_ratio_from_video, frame_cropping_ratio};
pub use distortion::{common_crop, distortion_value, distortion_value_from_videos, frame_distortion};
pub use latency::{
    measure_latency, measure_latency_from_video, measure_latency_with, LatencyOptions,
    WarmupPolicy,
};
pub use stability::{
    frame_motion, motion_magnitudes, stability_improvement, stability_improvement_from_videos,
    stability_score, stability_score_from_video,
};

/// Serialize undefined (non-finite) metrics as `null`.
fn metric<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_some(value)
    } else {
        serializer.serialize_none()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct QualityReport {
    /// Stabilizer that produced the latency figure.
    pub method: String,
    #[serde(serialize_with = "metric")]
    pub latency_ms: f64,
    #[serde(serialize_with = "metric")]
    pub stability_before: f64,
    #[serde(serialize_with = "metric")]
    pub stability_after: f64,
    #[serde(serialize_with = "metric")]
    pub improvement: f64,
    #[serde(serialize_with = "metric")]
    pub cropping_ratio: f64,
    #[serde(serialize_with = "metric")]
    pub distortion: f64,
}

impl QualityReport {
    /// Compute every indicator. Both streams are rewound before each pass,
    /// and `stabilizer` is reset before the latency run.
    pub fn evaluate(
        raw: &mut dyn FrameSource,
        stabilized: &mut dyn FrameSource,
        stabilizer: &mut dyn Stabilizer,
        backend: &dyn VisionBackend,
        config: &QualityConfig,
    ) -> Result<Self> {
        let max_frames = config.max_frames;

        raw.rewind()?;
        let latency_ms = measure_latency(raw, stabilizer, &LatencyOptions::from(config))?;
        log::info!("quality: latency {:.2} ms/frame ({})", latency_ms, stabilizer.name());

        raw.rewind()?;
        let stability_before = stability_score(raw, backend, &config.motion, max_frames)?;
        stabilized.rewind()?;
        let stability_after = stability_score(stabilized, backend, &config.motion, max_frames)?;
        let improvement = stability_improvement(stability_before, stability_after);
        log::info!(
            "quality: stability {:.3} -> {:.3} (improvement {:.3})",
            stability_before,
            stability_after,
            improvement
        );

        stabilized.rewind()?;
        let cropping_ratio = cropping_ratio(stabilized, config.black_threshold, max_frames)?;

        raw.rewind()?;
        stabilized.rewind()?;
        let distortion =
            distortion_value(raw, stabilized, backend, config.black_threshold, max_frames)?;
        log::info!(
            "quality: cropping {:.3}, distortion {:.4}",
            cropping_ratio,
            distortion
        );

        Ok(Self {
            method: stabilizer.name().to_string(),
            latency_ms,
            stability_before,
            stability_after,
            improvement,
            cropping_ratio,
            distortion,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serialize quality report")
    }

    /// Write the report as JSON through a temporary file renamed into place,
    /// so an interrupted run never leaves a truncated report behind.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp)
                .with_context(|| format!("failed to create {}", tmp.display()))?;
            file.write_all(json.as_bytes())
                .and_then(|_| file.write_all(b"\n"))
                .and_then(|_| file.sync_all())
                .with_context(|| format!("failed to write {}", tmp.display()))?;
        }
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to move report into {}", path.display()))?;
        Ok(())
    }
}
