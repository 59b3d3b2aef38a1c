use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    render::{RenderKind, RenderLayout},
    Result,
};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub render: RenderConfig,
    pub clock: ClockConfig,
    pub export: ExportConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing sections and fields fall back
    /// to their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config = serde_json::from_str(text)?;
        Ok(config)
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Samples pulled from the buffer per device callback.
    pub block_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self { block_size: 8192 }
    }
}

/// Parameters for turning a window of samples into a frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub kind: RenderKind,
    pub layout: RenderLayout,
    /// Trailing samples handed to the renderer on each tick.
    pub window_size: usize,
    pub bar_count: usize,
    /// Standard deviation of the Gaussian smoothing, in bins. Zero disables it.
    pub smooth_width: f32,
    /// Windows shorter than this are not drawn.
    pub min_samples: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            kind: RenderKind::Spectrum,
            layout: RenderLayout::Single,
            window_size: 4096,
            bar_count: 48,
            smooth_width: 2.0,
            min_samples: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub interval_ms: u64,
    /// Ticks per second. Takes precedence over `interval_ms` and gives the
    /// exact `1 / fps` period export needs to stay in step with the audio.
    pub fps: Option<u32>,
}

impl ClockConfig {
    pub fn interval(&self) -> Duration {
        match self.fps {
            Some(fps) if fps > 0 => Duration::from_secs_f64(1.0 / f64::from(fps)),
            _ => Duration::from_millis(self.interval_ms.max(1)),
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            interval_ms: 33,
            fps: None,
        }
    }
}

/// Video export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            width: 640,
            height: 360,
        }
    }
}
