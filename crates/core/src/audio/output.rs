use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crossbeam::channel::{bounded, select, tick, Sender};

use super::SampleBuffer;
use crate::{
    playback::{PlaybackState, TransportShared},
    Result, VisualiserError,
};

/// What the pull callback wants the device to do after a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSignal {
    Continue,
    /// The buffer is drained; the block just produced is pure padding.
    End,
}

/// The block-pull callback handed to an [`AudioOutput`].
///
/// It only copies samples and advances the cursor. End of stream is reported
/// to the engine through a bounded channel carrying the transport generation,
/// so the device thread never waits on the control thread.
pub struct BlockSource {
    buffer: Arc<SampleBuffer>,
    transport: Arc<TransportShared>,
    finished: Sender<u64>,
    block_size: usize,
}

impl BlockSource {
    pub(crate) fn new(
        buffer: Arc<SampleBuffer>,
        transport: Arc<TransportShared>,
        finished: Sender<u64>,
        block_size: usize,
    ) -> Self {
        Self {
            buffer,
            transport,
            finished,
            block_size: block_size.max(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.buffer.sample_rate()
    }

    /// Preferred number of samples per pull.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Fills `out` with the next block. Outside of `Playing` the block is
    /// silence and the cursor stays put.
    pub fn pull(&mut self, out: &mut [f32]) -> StreamSignal {
        if self.transport.state() != PlaybackState::Playing {
            out.fill(0.0);
            return StreamSignal::Continue;
        }

        let buffer = &self.buffer;
        let read = match catch_unwind(AssertUnwindSafe(|| buffer.read_block_into(out))) {
            Ok(read) => read,
            Err(_) => {
                out.fill(0.0);
                self.notify_finished();
                return StreamSignal::End;
            }
        };

        if read.consumed == 0 && read.exhausted {
            self.notify_finished();
            StreamSignal::End
        } else {
            StreamSignal::Continue
        }
    }

    fn notify_finished(&self) {
        // A full channel already holds a pending notification.
        let _ = self.finished.try_send(self.transport.generation());
    }
}

impl std::fmt::Debug for BlockSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockSource")
            .field("sample_rate", &self.sample_rate())
            .field("block_size", &self.block_size)
            .finish()
    }
}

/// Sound device abstraction driven by the playback engine.
pub trait AudioOutput {
    /// Builds a stream that pulls from `source`. The stream starts paused.
    fn open(&mut self, source: BlockSource) -> Result<()>;

    /// Starts or resumes the open stream.
    fn start(&mut self) -> Result<()>;

    /// Halts the stream without discarding it.
    fn pause(&mut self) -> Result<()>;

    /// Tears the stream down. Safe to call when nothing is open.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Output without a sound device: a background thread pulls one block per
/// block duration and discards it, so the cursor advances in real time.
#[derive(Debug, Default)]
pub struct HeadlessOutput {
    running: Option<Arc<AtomicBool>>,
    shutdown: Option<Sender<()>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl HeadlessOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_running(&self, value: bool) -> Result<()> {
        let running = self
            .running
            .as_ref()
            .ok_or_else(|| VisualiserError::device("headless stream is not open"))?;
        running.store(value, Ordering::Release);
        Ok(())
    }
}

impl AudioOutput for HeadlessOutput {
    fn open(&mut self, mut source: BlockSource) -> Result<()> {
        self.close();

        let running = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let period =
            Duration::from_secs_f64(source.block_size() as f64 / source.sample_rate() as f64);
        let worker_running = Arc::clone(&running);

        let worker = thread::Builder::new()
            .name("headless-output".into())
            .spawn(move || {
                let mut block = vec![0.0_f32; source.block_size()];
                let ticker = tick(period);
                loop {
                    select! {
                        // A send or a dropped sender both end the stream.
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            if worker_running.load(Ordering::Acquire) {
                                source.pull(&mut block);
                            }
                        }
                    }
                }
            })?;

        self.running = Some(running);
        self.shutdown = Some(shutdown_tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.set_running(true)
    }

    fn pause(&mut self) -> Result<()> {
        self.set_running(false)
    }

    fn close(&mut self) {
        self.running = None;
        drop(self.shutdown.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn is_open(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for HeadlessOutput {
    fn drop(&mut self) {
        self.close();
    }
}
