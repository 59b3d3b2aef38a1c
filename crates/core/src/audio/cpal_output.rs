use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, Device, FromSample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
    SupportedStreamConfig,
};

use super::{
    feed::DeviceFeed,
    output::{AudioOutput, BlockSource},
};
use crate::{Result, VisualiserError};

/// Sound output through the default cpal device.
///
/// The stream uses the device's default sample format and channel count and
/// copies the mono signal into every channel. It runs at the file's sample
/// rate when the device supports it, otherwise at the device's default rate
/// with the signal resampled on the way out.
#[derive(Default)]
pub struct CpalOutput {
    stream: Option<Stream>,
}

impl CpalOutput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioOutput for CpalOutput {
    fn open(&mut self, source: BlockSource) -> Result<()> {
        self.close();

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| VisualiserError::device("no default output device available"))?;
        let supported = device
            .default_output_config()
            .map_err(|e| VisualiserError::device(e.to_string()))?;

        let sample_format = supported.sample_format();
        let device_rate = pick_rate(&device, &supported, source.sample_rate());
        let config = StreamConfig {
            channels: supported.channels().max(1),
            sample_rate: device_rate,
            buffer_size: BufferSize::Default,
        };

        let file_rate = source.sample_rate();
        let feed = DeviceFeed::new(source, device_rate.0)?;
        tracing::info!(
            device = %device.name().unwrap_or_default(),
            channels = config.channels,
            ?sample_format,
            file_rate,
            device_rate = device_rate.0,
            resampling = feed.is_resampling(),
            "opening output stream"
        );

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, feed)?,
            SampleFormat::F64 => build_stream::<f64>(&device, &config, feed)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config, feed)?,
            SampleFormat::I32 => build_stream::<i32>(&device, &config, feed)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config, feed)?,
            SampleFormat::U8 => build_stream::<u8>(&device, &config, feed)?,
            other => {
                return Err(VisualiserError::device(format!(
                    "unsupported output sample format {other}"
                )))
            }
        };

        stream
            .pause()
            .map_err(|e| VisualiserError::device(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| VisualiserError::device("output stream is not open"))?;
        stream
            .play()
            .map_err(|e| VisualiserError::device(e.to_string()))
    }

    fn pause(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| VisualiserError::device("output stream is not open"))?;
        stream
            .pause()
            .map_err(|e| VisualiserError::device(e.to_string()))
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("output stream closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

/// The file's rate when a config with the default format and channel count
/// accepts it, else the device's default rate.
fn pick_rate(device: &Device, default: &SupportedStreamConfig, file_rate: u32) -> SampleRate {
    let wanted = SampleRate(file_rate);
    let supported = device
        .supported_output_configs()
        .map(|mut configs| {
            configs.any(|range| {
                range.channels() == default.channels()
                    && range.sample_format() == default.sample_format()
                    && range.min_sample_rate() <= wanted
                    && wanted <= range.max_sample_rate()
            })
        })
        .unwrap_or(false);

    if supported {
        wanted
    } else {
        default.sample_rate()
    }
}

fn build_stream<T>(device: &Device, config: &StreamConfig, mut feed: DeviceFeed) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    frame.fill(T::from_sample(feed.next_sample()));
                }
            },
            |err| tracing::error!(%err, "output stream error"),
            None,
        )
        .map_err(|e| VisualiserError::device(e.to_string()))
}
