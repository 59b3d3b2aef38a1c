use std::{fs::File, io, path::Path};

use symphonia::core::{
    audio::SampleBuffer as SymphoniaBuffer,
    codecs::DecoderOptions,
    errors::Error,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use super::SampleBuffer;
use crate::{Result, VisualiserError};

/// Mono audio as produced by the decoder.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn into_buffer(self) -> Result<SampleBuffer> {
        SampleBuffer::load(self.samples, self.sample_rate)
    }
}

/// Decodes the default track of `path` and folds every channel down to mono.
pub fn decode_file(path: &Path) -> Result<DecodedAudio> {
    let file = File::open(path)
        .map_err(|e| VisualiserError::decode(format!("cannot open {}: {e}", path.display())))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| VisualiserError::decode(format!("unsupported format: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| VisualiserError::decode("no default audio track"))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| VisualiserError::decode(format!("no decoder for track: {e}")))?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| VisualiserError::decode("track has no sample rate"))?;

    let mut samples = Vec::<f32>::new();
    let mut scratch: Option<(u64, SymphoniaBuffer<f32>)> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(err) => {
                end_of_stream(err)?;
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(Error::DecodeError(err)) => {
                tracing::warn!(%err, "skipping undecodable packet");
                continue;
            }
            Err(err) => return Err(VisualiserError::decode(format!("decode failed: {err}"))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let capacity = decoded.capacity() as u64;
        let buffer = match &mut scratch {
            Some((frames, buffer)) if *frames >= capacity => buffer,
            slot => &mut slot.insert((capacity, SymphoniaBuffer::new(capacity, spec))).1,
        };
        buffer.copy_interleaved_ref(decoded);
        samples.extend(downmix(buffer.samples(), channels));
    }

    tracing::debug!(path = %path.display(), samples = samples.len(), sample_rate, "decoded audio");

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Symphonia reports the end of a stream as an unexpected-EOF I/O error.
/// Every other read error is a failure.
fn end_of_stream(err: Error) -> Result<()> {
    match err {
        Error::IoError(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(()),
        Error::ResetRequired => Err(VisualiserError::decode(
            "stream changed mid-file; decoder reset is not supported",
        )),
        err => Err(VisualiserError::decode(format!("read failed: {err}"))),
    }
}

fn downmix(interleaved: &[f32], channels: usize) -> impl Iterator<Item = f32> + '_ {
    interleaved
        .chunks(channels)
        .map(move |frame| frame.iter().sum::<f32>() / channels as f32)
}
