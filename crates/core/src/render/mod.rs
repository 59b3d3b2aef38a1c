use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::{
    analysis::{gaussian_smooth, select_bars, SpectrumAnalyzer},
    config::RenderConfig,
    playback::PlaybackState,
    Result,
};

pub mod raster;

pub use raster::{rasterize, rasterize_panels, PixelBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderKind {
    Waveform,
    #[default]
    Spectrum,
}

/// Which panels are drawn on each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderLayout {
    /// Only the selected kind.
    #[default]
    Single,
    /// Waveform above spectrum, like the classic two-panel window.
    Stacked,
}

impl RenderLayout {
    /// Kinds to render, top panel first.
    pub fn kinds(self, selected: RenderKind) -> Vec<RenderKind> {
        match self {
            Self::Single => vec![selected],
            Self::Stacked => vec![RenderKind::Waveform, RenderKind::Spectrum],
        }
    }
}

/// Knobs for a single render call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParams {
    pub bar_count: usize,
    pub smooth_width: f32,
    pub min_samples: usize,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self::from(&RenderConfig::default())
    }
}

impl From<&RenderConfig> for RenderParams {
    fn from(config: &RenderConfig) -> Self {
        Self {
            bar_count: config.bar_count,
            smooth_width: config.smooth_width,
            min_samples: config.min_samples,
        }
    }
}

/// A visual snapshot of the audio around the cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderFrame {
    pub kind: RenderKind,
    /// Clipped samples for a waveform, normalised bar heights for a spectrum.
    pub values: Vec<f32>,
    pub position_fraction: f32,
    pub timestamp: Instant,
}

/// Receives frames for display. Terminal and GUI front ends implement this.
pub trait FrameDisplay {
    /// Shows the panels of one tick, top panel first.
    fn present(&mut self, frames: &[RenderFrame], state: PlaybackState) -> Result<()>;
}

/// Turns a trailing window of samples into a [`RenderFrame`].
#[derive(Debug, Default)]
pub struct Renderer {
    analyzer: SpectrumAnalyzer,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` for windows shorter than `params.min_samples`, which
    /// happens right after loading or stopping.
    pub fn render(
        &mut self,
        window: &[f32],
        position_fraction: f32,
        kind: RenderKind,
        params: &RenderParams,
    ) -> Result<Option<RenderFrame>> {
        if window.is_empty() || window.len() < params.min_samples {
            return Ok(None);
        }

        let values = match kind {
            RenderKind::Waveform => window.iter().map(|s| s.clamp(-1.0, 1.0)).collect(),
            RenderKind::Spectrum => {
                let spectrum = self.analyzer.magnitude_spectrum(window)?;
                let smoothed = gaussian_smooth(&spectrum, params.smooth_width);
                select_bars(&smoothed, params.bar_count)
            }
        };

        Ok(Some(RenderFrame {
            kind,
            values,
            position_fraction: position_fraction.clamp(0.0, 1.0),
            timestamp: Instant::now(),
        }))
    }
}
