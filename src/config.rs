use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::quality::WarmupPolicy;
use crate::stabilize::{clamp_alpha, FlowSource};
use crate::transform::DecompositionBounds;
use crate::vision::CornerParams;

const DEFAULT_BACKEND: &str = "cpu";

const DEFAULT_RIGID_ALPHA: f64 = 0.90;
const DEFAULT_RIGID_RANSAC: f64 = 3.0;
const DEFAULT_RIGID_MIN_CORRESPONDENCES: usize = 6;
const DEFAULT_RIGID_CORNERS: CornerParams = CornerParams {
    max_count: 500,
    quality_level: 0.01,
    min_distance: 8.0,
};

const DEFAULT_HOMOGRAPHY_ALPHA: f64 = 0.90;
const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;
/// The dense grid yields `(w/20)·(h/20)` samples, a few hundred at VGA.
const DEFAULT_MIN_CORRESPONDENCES: usize = 50;
const DEFAULT_HOMOGRAPHY_RANSAC: f64 = 5.0;
const DEFAULT_GRID_STRIDE: u32 = 20;
const DEFAULT_HOMOGRAPHY_CORNERS: CornerParams = CornerParams {
    max_count: 1000,
    quality_level: 0.01,
    min_distance: 10.0,
};

const DEFAULT_WARMUP_FRAMES: usize = 5;
const DEFAULT_BLACK_THRESHOLD: u8 = 3;
const DEFAULT_MOTION_MIN_POINTS: usize = 6;
const DEFAULT_MOTION_RANSAC: f64 = 3.0;

#[derive(Debug, Deserialize, Default)]
struct StabilizeConfigFile {
    backend: Option<String>,
    rigid: Option<RigidConfigFile>,
    homography: Option<HomographyConfigFile>,
    quality: Option<QualityConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CornerConfigFile {
    max_count: Option<usize>,
    quality_level: Option<f64>,
    min_distance: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct RigidConfigFile {
    alpha: Option<f64>,
    ransac_threshold: Option<f64>,
    min_correspondences: Option<usize>,
    corners: Option<CornerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DecompositionConfigFile {
    max_rotation: Option<f64>,
    min_scale: Option<f64>,
    max_scale: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct HomographyConfigFile {
    alpha: Option<f64>,
    flow_source: Option<String>,
    confidence_threshold: Option<f64>,
    min_correspondences: Option<usize>,
    ransac_threshold: Option<f64>,
    grid_stride: Option<u32>,
    corners: Option<CornerConfigFile>,
    decomposition: Option<DecompositionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    corners: Option<CornerConfigFile>,
    min_points: Option<usize>,
    ransac_threshold: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct QualityConfigFile {
    warmup_frames: Option<usize>,
    warmup_policy: Option<String>,
    max_frames: Option<usize>,
    black_threshold: Option<u8>,
    motion: Option<MotionConfigFile>,
}

/// Rigid path smoother settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidConfig {
    /// EMA weight of the raw path, in `[0, 1]`.
    pub alpha: f64,
    pub ransac_threshold: f64,
    pub min_correspondences: usize,
    pub corners: CornerParams,
}

impl Default for RigidConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_RIGID_ALPHA,
            ransac_threshold: DEFAULT_RIGID_RANSAC,
            min_correspondences: DEFAULT_RIGID_MIN_CORRESPONDENCES,
            corners: DEFAULT_RIGID_CORNERS,
        }
    }
}

impl RigidConfig {
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = clamp_alpha(alpha);
        self
    }
}

/// Confidence-weighted homography stabilizer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct HomographyConfig {
    pub alpha: f64,
    pub flow_source: FlowSource,
    /// Pairs above this confidence are preferred for fitting.
    pub confidence_threshold: f64,
    /// Fewer correspondences than this sends the frame to DEGRADED.
    pub min_correspondences: usize,
    pub ransac_threshold: f64,
    /// Dense flow sampling stride in pixels.
    pub grid_stride: u32,
    /// Detection budget of the sparse source.
    pub corners: CornerParams,
    pub decomposition: DecompositionBounds,
}

impl Default for HomographyConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_HOMOGRAPHY_ALPHA,
            flow_source: FlowSource::Dense,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            min_correspondences: DEFAULT_MIN_CORRESPONDENCES,
            ransac_threshold: DEFAULT_HOMOGRAPHY_RANSAC,
            grid_stride: DEFAULT_GRID_STRIDE,
            corners: DEFAULT_HOMOGRAPHY_CORNERS,
            decomposition: DecompositionBounds::default(),
        }
    }
}

impl HomographyConfig {
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = clamp_alpha(alpha);
        self
    }

    pub fn with_flow_source(mut self, flow_source: FlowSource) -> Self {
        self.flow_source = flow_source;
        self
    }
}

/// Inter-frame motion estimate used by the stability indicator.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionEstimateConfig {
    pub corners: CornerParams,
    pub min_points: usize,
    pub ransac_threshold: f64,
}

impl Default for MotionEstimateConfig {
    fn default() -> Self {
        Self {
            corners: DEFAULT_RIGID_CORNERS,
            min_points: DEFAULT_MOTION_MIN_POINTS,
            ransac_threshold: DEFAULT_MOTION_RANSAC,
        }
    }
}

/// Quality indicator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityConfig {
    pub warmup_frames: usize,
    pub warmup_policy: WarmupPolicy,
    /// Cap on frames read per stream; `None` reads to the end.
    pub max_frames: Option<usize>,
    /// Luminance at or below this counts as border fill.
    pub black_threshold: u8,
    pub motion: MotionEstimateConfig,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            warmup_frames: DEFAULT_WARMUP_FRAMES,
            warmup_policy: WarmupPolicy::default(),
            max_frames: None,
            black_threshold: DEFAULT_BLACK_THRESHOLD,
            motion: MotionEstimateConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StabilizeConfig {
    /// Vision backend name, resolved through `BackendRegistry`.
    pub backend: String,
    pub rigid: RigidConfig,
    pub homography: HomographyConfig,
    pub quality: QualityConfig,
}

impl Default for StabilizeConfig {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            rigid: RigidConfig::default(),
            homography: HomographyConfig::default(),
            quality: QualityConfig::default(),
        }
    }
}

impl StabilizeConfig {
    /// File named by `UNSHAKE_CONFIG` (if set), then `UNSHAKE_*` overrides.
    pub fn load() -> Result<Self> {
        Self::load_with(None)
    }

    /// Like `load`, but an explicit `path` takes precedence over
    /// `UNSHAKE_CONFIG`.
    pub fn load_with(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("UNSHAKE_CONFIG").ok();
        let config_path = path.map(Path::to_path_buf).or_else(|| {
            env_path
                .filter(|p| !p.trim().is_empty())
                .map(std::path::PathBuf::from)
        });
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(&path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a config file without consulting the environment.
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: StabilizeConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let rigid_file = file.rigid.unwrap_or_default();
        let rigid = RigidConfig {
            alpha: rigid_file.alpha.unwrap_or(defaults.rigid.alpha),
            ransac_threshold: rigid_file
                .ransac_threshold
                .unwrap_or(defaults.rigid.ransac_threshold),
            min_correspondences: rigid_file
                .min_correspondences
                .unwrap_or(defaults.rigid.min_correspondences),
            corners: corners_from_file(rigid_file.corners, defaults.rigid.corners),
        };

        let homography_file = file.homography.unwrap_or_default();
        let flow_source = match homography_file.flow_source.as_deref() {
            Some(value) => value.parse()?,
            None => defaults.homography.flow_source,
        };
        let decomposition_file = homography_file.decomposition.unwrap_or_default();
        let bounds = defaults.homography.decomposition;
        let homography = HomographyConfig {
            alpha: homography_file.alpha.unwrap_or(defaults.homography.alpha),
            flow_source,
            confidence_threshold: homography_file
                .confidence_threshold
                .unwrap_or(defaults.homography.confidence_threshold),
            min_correspondences: homography_file
                .min_correspondences
                .unwrap_or(defaults.homography.min_correspondences),
            ransac_threshold: homography_file
                .ransac_threshold
                .unwrap_or(defaults.homography.ransac_threshold),
            grid_stride: homography_file
                .grid_stride
                .unwrap_or(defaults.homography.grid_stride),
            corners: corners_from_file(homography_file.corners, defaults.homography.corners),
            decomposition: DecompositionBounds {
                max_rotation: decomposition_file
                    .max_rotation
                    .unwrap_or(bounds.max_rotation),
                min_scale: decomposition_file.min_scale.unwrap_or(bounds.min_scale),
                max_scale: decomposition_file.max_scale.unwrap_or(bounds.max_scale),
            },
        };

        let quality_file = file.quality.unwrap_or_default();
        let warmup_policy = match quality_file.warmup_policy.as_deref() {
            Some(value) => value.parse()?,
            None => defaults.quality.warmup_policy,
        };
        let motion_file = quality_file.motion.unwrap_or_default();
        let quality = QualityConfig {
            warmup_frames: quality_file
                .warmup_frames
                .unwrap_or(defaults.quality.warmup_frames),
            warmup_policy,
            max_frames: quality_file.max_frames,
            black_threshold: quality_file
                .black_threshold
                .unwrap_or(defaults.quality.black_threshold),
            motion: MotionEstimateConfig {
                corners: corners_from_file(motion_file.corners, defaults.quality.motion.corners),
                min_points: motion_file
                    .min_points
                    .unwrap_or(defaults.quality.motion.min_points),
                ransac_threshold: motion_file
                    .ransac_threshold
                    .unwrap_or(defaults.quality.motion.ransac_threshold),
            },
        };

        Ok(Self {
            backend: file.backend.unwrap_or(defaults.backend),
            rigid,
            homography,
            quality,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(backend) = std::env::var("UNSHAKE_BACKEND") {
            if !backend.trim().is_empty() {
                self.backend = backend.trim().to_string();
            }
        }
        if let Ok(alpha) = std::env::var("UNSHAKE_ALPHA") {
            let alpha: f64 = alpha
                .trim()
                .parse()
                .map_err(|_| anyhow!("UNSHAKE_ALPHA must be a number"))?;
            self.rigid.alpha = alpha;
            self.homography.alpha = alpha;
        }
        if let Ok(source) = std::env::var("UNSHAKE_FLOW_SOURCE") {
            if !source.trim().is_empty() {
                self.homography.flow_source = source.parse()?;
            }
        }
        if let Ok(threshold) = std::env::var("UNSHAKE_CONFIDENCE_THRESHOLD") {
            self.homography.confidence_threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("UNSHAKE_CONFIDENCE_THRESHOLD must be a number"))?;
        }
        if let Ok(count) = std::env::var("UNSHAKE_MIN_CORRESPONDENCES") {
            self.homography.min_correspondences = count
                .trim()
                .parse()
                .map_err(|_| anyhow!("UNSHAKE_MIN_CORRESPONDENCES must be an integer"))?;
        }
        if let Ok(frames) = std::env::var("UNSHAKE_WARMUP_FRAMES") {
            self.quality.warmup_frames = frames
                .trim()
                .parse()
                .map_err(|_| anyhow!("UNSHAKE_WARMUP_FRAMES must be an integer"))?;
        }
        if let Ok(policy) = std::env::var("UNSHAKE_LATENCY_POLICY") {
            if !policy.trim().is_empty() {
                self.quality.warmup_policy = policy.parse()?;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.rigid.alpha = clamp_alpha(self.rigid.alpha);
        self.homography.alpha = clamp_alpha(self.homography.alpha);

        if self.backend.trim().is_empty() {
            return Err(anyhow!("backend name must not be empty"));
        }
        require_positive("rigid.ransac_threshold", self.rigid.ransac_threshold)?;
        require_positive("homography.ransac_threshold", self.homography.ransac_threshold)?;
        require_positive(
            "quality.motion.ransac_threshold",
            self.quality.motion.ransac_threshold,
        )?;
        let threshold = self.homography.confidence_threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "homography.confidence_threshold must be within [0, 1], got {}",
                threshold
            ));
        }
        if self.rigid.min_correspondences < 2 {
            return Err(anyhow!("rigid.min_correspondences must be at least 2"));
        }
        if self.homography.min_correspondences < 4 {
            return Err(anyhow!("homography.min_correspondences must be at least 4"));
        }
        if self.homography.grid_stride == 0 {
            return Err(anyhow!("homography.grid_stride must be at least 1"));
        }
        validate_corners("rigid.corners", &self.rigid.corners)?;
        validate_corners("homography.corners", &self.homography.corners)?;
        validate_corners("quality.motion.corners", &self.quality.motion.corners)?;

        let bounds = &self.homography.decomposition;
        require_positive("decomposition.max_rotation", bounds.max_rotation)?;
        require_positive("decomposition.min_scale", bounds.min_scale)?;
        if !(bounds.max_scale.is_finite() && bounds.max_scale >= bounds.min_scale) {
            return Err(anyhow!(
                "decomposition.max_scale must be finite and >= min_scale"
            ));
        }
        Ok(())
    }
}

fn corners_from_file(file: Option<CornerConfigFile>, defaults: CornerParams) -> CornerParams {
    let file = file.unwrap_or_default();
    CornerParams {
        max_count: file.max_count.unwrap_or(defaults.max_count),
        quality_level: file.quality_level.unwrap_or(defaults.quality_level),
        min_distance: file.min_distance.unwrap_or(defaults.min_distance),
    }
}

fn require_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(anyhow!("{} must be finite and positive, got {}", name, value));
    }
    Ok(())
}

fn validate_corners(name: &str, corners: &CornerParams) -> Result<()> {
    if corners.max_count == 0 {
        return Err(anyhow!("{}.max_count must be at least 1", name));
    }
    require_positive(&format!("{}.quality_level", name), corners.quality_level)?;
    if !corners.min_distance.is_finite() || corners.min_distance < 0.0 {
        return Err(anyhow!("{}.min_distance must be finite and >= 0", name));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<StabilizeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = StabilizeConfig::from_file(StabilizeConfigFile::default()).unwrap();
        assert_eq!(cfg, StabilizeConfig::default());
    }

    #[test]
    fn alpha_is_clamped_not_rejected() {
        let mut cfg = StabilizeConfig::default();
        cfg.rigid.alpha = 4.0;
        cfg.homography.alpha = -1.0;
        cfg.validate().unwrap();
        assert_eq!(cfg.rigid.alpha, 1.0);
        assert_eq!(cfg.homography.alpha, 0.0);
    }

    #[test]
    fn rejects_too_few_homography_correspondences() {
        let mut cfg = StabilizeConfig::default();
        cfg.homography.min_correspondences = 3;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_grid_stride() {
        let mut cfg = StabilizeConfig::default();
        cfg.homography.grid_stride = 0;
        assert!(cfg.validate().is_err());
    }
}
