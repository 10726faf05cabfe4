//! Synthetic scenes with known camera motion.
//!
//! A smooth, fully textured background is rendered through a per-frame
//! offset, so the true motion of every frame is known. The texture never
//! goes near black, which keeps cropping and distortion measurements clean.

use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use url::Url;

use crate::frame::Frame;

use super::FrameSource;

pub const SYNTHETIC_SCHEME: &str = "synthetic://";

const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 240;
const DEFAULT_FRAMES: u64 = 60;

/// Camera motion of a synthetic scene.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SceneMotion {
    /// Every frame identical.
    Static,
    /// Constant translation of `(dx, dy)` pixels per frame.
    Pan { dx: f64, dy: f64 },
    /// Handheld-style jitter: `(ax·sin(0.5 i), ay·cos(0.3 i))`.
    Shake { amplitude_x: f64, amplitude_y: f64 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticScene {
    pub width: u32,
    pub height: u32,
    pub frames: u64,
    pub motion: SceneMotion,
}

impl SyntheticScene {
    pub fn new(width: u32, height: u32, frames: u64, motion: SceneMotion) -> Self {
        Self {
            width,
            height,
            frames,
            motion,
        }
    }

    /// The shaky test clip: 5 px horizontal, 3 px vertical jitter.
    pub fn shaky(width: u32, height: u32, frames: u64) -> Self {
        Self::new(
            width,
            height,
            frames,
            SceneMotion::Shake {
                amplitude_x: 5.0,
                amplitude_y: 3.0,
            },
        )
    }

    /// Parse `synthetic://<motion>?width=..&height=..&frames=..&dx=..&dy=..`
    /// where motion is `static`, `pan` or `shake`.
    pub fn from_uri(uri: &str) -> Result<Self> {
        if !uri.starts_with(SYNTHETIC_SCHEME) {
            return Err(anyhow!("not a synthetic uri: {}", uri));
        }
        let url = Url::parse(uri).with_context(|| format!("parse synthetic uri {}", uri))?;
        let kind = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => url
                .path_segments()
                .and_then(|mut segments| segments.find(|s| !s.is_empty()))
                .unwrap_or_default()
                .to_string(),
        };

        let mut width = DEFAULT_WIDTH;
        let mut height = DEFAULT_HEIGHT;
        let mut frames = DEFAULT_FRAMES;
        let (mut dx, mut dy) = (2.0, 0.0);
        let (mut ax, mut ay) = (5.0, 3.0);
        for (key, value) in url.query_pairs() {
            let bad = || anyhow!("invalid value for synthetic parameter '{}': {}", key, value);
            match key.as_ref() {
                "width" => width = value.parse().map_err(|_| bad())?,
                "height" => height = value.parse().map_err(|_| bad())?,
                "frames" => frames = value.parse().map_err(|_| bad())?,
                "dx" => dx = value.parse().map_err(|_| bad())?,
                "dy" => dy = value.parse().map_err(|_| bad())?,
                "ax" => ax = value.parse().map_err(|_| bad())?,
                "ay" => ay = value.parse().map_err(|_| bad())?,
                other => return Err(anyhow!("unknown synthetic parameter '{}'", other)),
            }
        }
        if width < 16 || height < 16 {
            return Err(anyhow!("synthetic scene must be at least 16x16"));
        }

        let motion = match kind.as_str() {
            "" | "shake" => SceneMotion::Shake {
                amplitude_x: ax,
                amplitude_y: ay,
            },
            "pan" => SceneMotion::Pan { dx, dy },
            "static" => SceneMotion::Static,
            other => return Err(anyhow!("unknown synthetic motion '{}'", other)),
        };
        Ok(Self::new(width, height, frames, motion))
    }

    /// Camera offset of frame `index` in pixels.
    pub fn offset(&self, index: u64) -> (f64, f64) {
        let i = index as f64;
        match self.motion {
            SceneMotion::Static => (0.0, 0.0),
            SceneMotion::Pan { dx, dy } => (dx * i, dy * i),
            SceneMotion::Shake {
                amplitude_x,
                amplitude_y,
            } => (amplitude_x * (0.5 * i).sin(), amplitude_y * (0.3 * i).cos()),
        }
    }

    pub fn render(&self, index: u64) -> Result<Frame> {
        let (ox, oy) = self.offset(index);
        let image = RgbImage::from_fn(self.width, self.height, |x, y| {
            let v = texture(x as f64 - ox, y as f64 - oy);
            Rgb([
                v as u8,
                (0.75 * v + 30.0) as u8,
                (250.0 - 0.6 * v).max(10.0) as u8,
            ])
        });
        Frame::from_rgb_image(index, image)
    }

    pub fn source(&self) -> SyntheticSource {
        SyntheticSource {
            scene: self.clone(),
            next: 0,
        }
    }
}

/// Smooth multi-frequency pattern in `[28, 228]`.
fn texture(u: f64, v: f64) -> f64 {
    128.0
        + 45.0 * (0.21 * u).sin() * (0.17 * v).cos()
        + 30.0 * (0.09 * (u + v)).sin()
        + 25.0 * (0.05 * u - 0.13 * v).cos()
}

/// Streams the frames of a `SyntheticScene`.
#[derive(Clone, Debug)]
pub struct SyntheticSource {
    scene: SyntheticScene,
    next: u64,
}

impl SyntheticSource {
    pub fn scene(&self) -> &SyntheticScene {
        &self.scene
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.next >= self.scene.frames {
            return Ok(None);
        }
        let frame = self.scene.render(self.next)?;
        self.next += 1;
        Ok(Some(frame))
    }

    fn rewind(&mut self) -> Result<()> {
        self.next = 0;
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "synthetic {:?} {}x{} ({} frames)",
            self.scene.motion, self.scene.width, self.scene.height, self.scene.frames
        )
    }
}
