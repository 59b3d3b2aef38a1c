use crate::playback::PlaybackState;

/// Result alias that carries the custom [`VisualiserError`] type.
pub type Result<T> = std::result::Result<T, VisualiserError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum VisualiserError {
    /// The audio file could not be read or decoded, or decoded to nothing.
    #[error("failed to decode audio: {0}")]
    Decode(String),
    /// A transport action needs a loaded buffer.
    #[error("no audio loaded")]
    NoAudioLoaded,
    /// The requested transport action is not legal from the current state.
    #[error("cannot {action} while {state:?}")]
    InvalidTransition {
        state: PlaybackState,
        action: &'static str,
    },
    #[error("a recording session is already active")]
    AlreadyRecording,
    #[error("no recording session is active")]
    NotRecording,
    #[error("nothing to export: no frames were captured")]
    NothingToExport,
    /// The output stream failed to open or start.
    #[error("audio device error: {0}")]
    AudioDevice(String),
    /// The video writer failed to open, accept a frame or finalise.
    #[error("encoder error: {0}")]
    Encoder(String),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("fft failed: {0}")]
    Fft(#[from] realfft::FftError),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Free-form message for failures without a dedicated variant.
    #[error("{0}")]
    Message(String),
}

impl VisualiserError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn decode<T: Into<String>>(msg: T) -> Self {
        Self::Decode(msg.into())
    }

    pub fn device<T: Into<String>>(msg: T) -> Self {
        Self::AudioDevice(msg.into())
    }

    pub fn encoder<T: Into<String>>(msg: T) -> Self {
        Self::Encoder(msg.into())
    }
}

impl From<&str> for VisualiserError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for VisualiserError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
