use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{Result, VisualiserError};

/// Outcome of a single block read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRead {
    /// Real samples copied out of the buffer. The rest of the block is padding.
    pub consumed: usize,
    /// True once the cursor sits at the end of the buffer.
    pub exhausted: bool,
}

/// A block returned by [`SampleBuffer::read_block`].
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub samples: Vec<f32>,
    pub consumed: usize,
    pub exhausted: bool,
}

/// Decoded mono audio plus the playback cursor.
///
/// The samples never change after construction; only the cursor moves. The
/// cursor is a single atomic word so the audio callback can advance it while
/// the renderer reads a trailing window from another thread without either
/// side taking a lock. A window read that races with an advance may observe a
/// slightly stale cursor, which only shows up as visual jitter.
#[derive(Debug)]
pub struct SampleBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
    cursor: AtomicUsize,
}

impl SampleBuffer {
    /// Builds a buffer with the cursor at the start.
    pub fn load(samples: impl Into<Arc<[f32]>>, sample_rate: u32) -> Result<Self> {
        let samples = samples.into();
        if samples.is_empty() {
            return Err(VisualiserError::decode("decoded audio contains no samples"));
        }
        if sample_rate == 0 {
            return Err(VisualiserError::decode("sample rate must be positive"));
        }

        Ok(Self {
            samples,
            sample_rate,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor() >= self.len()
    }

    /// Total playing time of the buffer.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.len() as f64 / self.sample_rate as f64)
    }

    /// Playing time up to the cursor.
    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.cursor() as f64 / self.sample_rate as f64)
    }

    /// Cursor position as a fraction of the buffer length, in [0, 1].
    pub fn position_fraction(&self) -> f32 {
        (self.cursor() as f64 / self.len() as f64) as f32
    }

    /// Fills `out` from the cursor onwards, zero-padding past the end, and
    /// advances the cursor by the number of real samples copied.
    ///
    /// Called from the real-time audio callback: it never blocks and never
    /// allocates.
    pub fn read_block_into(&self, out: &mut [f32]) -> BlockRead {
        let len = self.samples.len();
        let start = self.cursor.load(Ordering::Acquire).min(len);
        let take = out.len().min(len - start);

        out[..take].copy_from_slice(&self.samples[start..start + take]);
        out[take..].fill(0.0);

        let end = start + take;
        if take > 0 {
            self.cursor.store(end, Ordering::Release);
        }

        BlockRead {
            consumed: take,
            exhausted: end == len,
        }
    }

    /// Allocating variant of [`read_block_into`](Self::read_block_into).
    pub fn read_block(&self, count: usize) -> Block {
        let mut samples = vec![0.0; count];
        let read = self.read_block_into(&mut samples);
        Block {
            samples,
            consumed: read.consumed,
            exhausted: read.exhausted,
        }
    }

    /// Returns the `min(count, cursor)` samples that end at the cursor
    /// without moving it.
    pub fn read_window(&self, count: usize) -> &[f32] {
        let end = self.cursor().min(self.len());
        let start = end.saturating_sub(count);
        &self.samples[start..end]
    }

    /// Rewinds the cursor. Only call this while nothing is streaming from
    /// the buffer.
    pub fn seek_to_start(&self) {
        self.cursor.store(0, Ordering::Release);
    }
}
