//! Decoded audio, the device contract and its implementations.

mod buffer;
pub mod decode;
mod feed;
pub mod output;

#[cfg(feature = "native")]
pub mod cpal_output;

pub use buffer::{Block, BlockRead, SampleBuffer};
pub use decode::{decode_file, DecodedAudio};
pub use output::{AudioOutput, BlockSource, HeadlessOutput, StreamSignal};

#[cfg(feature = "native")]
pub use cpal_output::CpalOutput;
