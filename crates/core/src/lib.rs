//! Core library for the Audio Visualiser application.
//!
//! Audio is decoded into a [`SampleBuffer`] and streamed to an output device by
//! the [`PlaybackEngine`] on the device's real-time schedule. A [`FrameClock`]
//! ticks on its own schedule, the [`Renderer`] turns the window behind the
//! playback cursor into a [`RenderFrame`], and while recording the
//! [`FrameSink`] collects rasterised frames for export on a background thread.
//! [`Visualiser`] wires these together for one loaded file.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod playback;
pub mod record;
pub mod render;
pub mod session;
pub mod timeline;

pub use analysis::SpectrumAnalyzer;
pub use audio::{
    decode_file, AudioOutput, BlockSource, DecodedAudio, HeadlessOutput, SampleBuffer,
    StreamSignal,
};
#[cfg(feature = "native")]
pub use audio::CpalOutput;
pub use config::{AppConfig, AudioConfig, ClockConfig, ExportConfig, RenderConfig};
pub use error::{Result, VisualiserError};
pub use playback::{PlaybackEngine, PlaybackState};
pub use record::{
    ExportProgress, ExportStatus, FfmpegEncoder, FrameSink, FrameWriter, PngSequenceEncoder,
    VideoEncoder,
};
pub use render::{
    rasterize, rasterize_panels, FrameDisplay, PixelBuffer, RenderFrame, RenderKind,
    RenderLayout, RenderParams, Renderer,
};
pub use session::Visualiser;
pub use timeline::{ClockStopper, FrameClock};
