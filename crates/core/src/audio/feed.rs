// Driven by the cpal output only.
#![cfg_attr(not(feature = "native"), allow(dead_code))]

use std::collections::VecDeque;

use rubato::{FftFixedIn, Resampler};

use super::output::BlockSource;
use crate::{Result, VisualiserError};

/// Turns whole blocks pulled from a [`BlockSource`] into a per-sample stream
/// at the device rate.
///
/// Devices ask for arbitrary frame counts, so converted samples are queued
/// and handed out one at a time. When the device runs at another rate than
/// the file, each block goes through an FFT resampler first.
pub(crate) struct DeviceFeed {
    source: BlockSource,
    resampler: Option<FftFixedIn<f32>>,
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
    pending: VecDeque<f32>,
}

impl DeviceFeed {
    pub(crate) fn new(source: BlockSource, device_rate: u32) -> Result<Self> {
        let block = source.block_size();
        let resampler = if device_rate == source.sample_rate() {
            None
        } else {
            let resampler = FftFixedIn::<f32>::new(
                source.sample_rate() as usize,
                device_rate as usize,
                block,
                2,
                1,
            )
            .map_err(|e| VisualiserError::device(format!("cannot build resampler: {e}")))?;
            Some(resampler)
        };

        let output = match &resampler {
            Some(resampler) => resampler.output_buffer_allocate(true),
            None => vec![Vec::new()],
        };
        let capacity = output[0].len().max(block) * 2;

        Ok(Self {
            source,
            resampler,
            input: vec![vec![0.0; block]],
            output,
            pending: VecDeque::with_capacity(capacity),
        })
    }

    pub(crate) fn is_resampling(&self) -> bool {
        self.resampler.is_some()
    }

    pub(crate) fn next_sample(&mut self) -> f32 {
        loop {
            if let Some(sample) = self.pending.pop_front() {
                return sample;
            }
            self.refill();
        }
    }

    fn refill(&mut self) {
        self.source.pull(&mut self.input[0]);
        match &mut self.resampler {
            None => self.pending.extend(self.input[0].iter().copied()),
            Some(resampler) => {
                match resampler.process_into_buffer(&self.input, &mut self.output, None) {
                    Ok((_, written)) => {
                        self.pending.extend(self.output[0][..written].iter().copied())
                    }
                    Err(err) => {
                        tracing::error!(%err, "resampling failed; writing silence");
                        self.pending.extend(std::iter::repeat(0.0).take(self.input[0].len()));
                    }
                }
            }
        }
        // The resampler may hold back a whole chunk while it primes.
        if self.pending.is_empty() {
            self.pending.push_back(0.0);
        }
    }
}
