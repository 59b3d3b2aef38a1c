//! Transport state machine for a single loaded buffer.
//!
//! ```text
//! Stopped --play--> Playing --pause--> Paused --play--> Playing
//! Playing|Paused --stop--> Stopped
//! Playing --buffer exhausted--> Stopped
//! ```
//!
//! The device callback and the control thread only share the play state and a
//! generation counter, both atomics. End of stream travels back as a
//! generation number over a bounded channel and is applied by
//! [`PlaybackEngine::poll_finished`] on the control thread.

use std::sync::{
    atomic::{AtomicU64, AtomicU8, Ordering},
    Arc,
};

use crossbeam::channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::{
    audio::{AudioOutput, BlockSource, SampleBuffer},
    Result, VisualiserError,
};

/// Pending end-of-stream notifications kept before the callback drops them.
const FINISHED_CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

impl PlaybackState {
    fn to_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Playing => 1,
            Self::Paused => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Playing,
            2 => Self::Paused,
            _ => Self::Stopped,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Playing => "Playing",
            Self::Paused => "Paused",
        }
    }
}

/// State shared with the audio callback.
#[derive(Debug, Default)]
pub(crate) struct TransportShared {
    state: AtomicU8,
    generation: AtomicU64,
}

impl TransportShared {
    pub(crate) fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: PlaybackState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Owns the loaded [`SampleBuffer`] and drives an [`AudioOutput`] through the
/// play/pause/stop state machine.
pub struct PlaybackEngine {
    output: Box<dyn AudioOutput>,
    buffer: Option<Arc<SampleBuffer>>,
    transport: Arc<TransportShared>,
    finished_tx: Sender<u64>,
    finished_rx: Receiver<u64>,
    block_size: usize,
}

impl PlaybackEngine {
    pub fn new(output: Box<dyn AudioOutput>, block_size: usize) -> Self {
        let (finished_tx, finished_rx) = bounded(FINISHED_CAPACITY);
        Self {
            output,
            buffer: None,
            transport: Arc::new(TransportShared::default()),
            finished_tx,
            finished_rx,
            block_size: block_size.max(1),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.transport.state()
    }

    pub fn generation(&self) -> u64 {
        self.transport.generation()
    }

    /// The loaded buffer, shared read-only with the renderer.
    pub fn buffer(&self) -> Option<&Arc<SampleBuffer>> {
        self.buffer.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.buffer.is_some()
    }

    /// Stops whatever is playing and replaces the buffer.
    pub fn load(&mut self, buffer: SampleBuffer) {
        self.stop();
        tracing::info!(
            samples = buffer.len(),
            sample_rate = buffer.sample_rate(),
            seconds = buffer.duration().as_secs_f32(),
            "audio loaded"
        );
        self.buffer = Some(Arc::new(buffer));
    }

    pub fn unload(&mut self) {
        self.stop();
        if self.buffer.take().is_some() {
            tracing::info!("audio unloaded");
        }
    }

    /// Starts from `Stopped` or resumes from `Paused`. A no-op while playing.
    pub fn play(&mut self) -> Result<()> {
        match self.state() {
            PlaybackState::Playing => {
                tracing::debug!("play ignored: already playing");
                Ok(())
            }
            PlaybackState::Paused => {
                self.transport.bump_generation();
                self.transport.set_state(PlaybackState::Playing);
                if let Err(err) = self.output.start() {
                    self.roll_back(&err);
                    return Err(err);
                }
                tracing::info!(generation = self.generation(), "playback resumed");
                Ok(())
            }
            PlaybackState::Stopped => {
                let buffer = self.buffer.clone().ok_or(VisualiserError::NoAudioLoaded)?;
                self.transport.bump_generation();
                let source = BlockSource::new(
                    buffer,
                    Arc::clone(&self.transport),
                    self.finished_tx.clone(),
                    self.block_size,
                );

                self.transport.set_state(PlaybackState::Playing);
                if let Err(err) = self.output.open(source).and_then(|()| self.output.start()) {
                    self.roll_back(&err);
                    return Err(err);
                }
                tracing::info!(generation = self.generation(), "playback started");
                Ok(())
            }
        }
    }

    /// Halts the stream but keeps the cursor. Only legal while playing.
    pub fn pause(&mut self) -> Result<()> {
        let state = self.state();
        if state != PlaybackState::Playing {
            return Err(VisualiserError::InvalidTransition {
                state,
                action: "pause",
            });
        }

        self.transport.set_state(PlaybackState::Paused);
        if let Err(err) = self.output.pause() {
            self.roll_back(&err);
            return Err(err);
        }
        tracing::info!("playback paused");
        Ok(())
    }

    /// Single play/pause control.
    pub fn toggle(&mut self) -> Result<()> {
        match self.state() {
            PlaybackState::Playing => self.pause(),
            _ => self.play(),
        }
    }

    /// Closes the stream and rewinds. Legal from every state.
    pub fn stop(&mut self) {
        let previous = self.state();
        self.transport.bump_generation();
        self.transport.set_state(PlaybackState::Stopped);
        self.output.close();
        if let Some(buffer) = &self.buffer {
            buffer.seek_to_start();
        }
        if previous != PlaybackState::Stopped {
            tracing::info!(generation = self.generation(), "playback stopped");
        }
    }

    /// Applies end-of-stream notifications from the audio callback.
    ///
    /// A notification stops playback only if it carries the current
    /// generation and the engine is still playing; anything older was
    /// overtaken by a manual `play` or `stop`. Returns true when playback was
    /// stopped here.
    pub fn poll_finished(&mut self) -> bool {
        let mut stopped = false;
        while let Ok(generation) = self.finished_rx.try_recv() {
            if generation != self.generation() || self.state() != PlaybackState::Playing {
                tracing::debug!(
                    generation,
                    current = self.generation(),
                    "ignoring stale end-of-stream notification"
                );
                continue;
            }
            tracing::info!("reached end of audio");
            self.stop();
            stopped = true;
        }
        stopped
    }

    fn roll_back(&mut self, err: &VisualiserError) {
        tracing::warn!(%err, "output stream failed; rolling back to stopped");
        self.stop();
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.output.close();
    }
}

impl std::fmt::Debug for PlaybackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackEngine")
            .field("state", &self.state())
            .field("generation", &self.generation())
            .field("loaded", &self.is_loaded())
            .field("block_size", &self.block_size)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        sync::Mutex,
        thread,
        time::{Duration, Instant},
    };

    use super::*;
    use crate::audio::{HeadlessOutput, StreamSignal};

    /// Output whose stream is pulled by hand from the test.
    #[derive(Clone, Default)]
    pub(crate) struct ManualOutput {
        pub(crate) inner: Arc<Mutex<ManualState>>,
    }

    #[derive(Default)]
    pub(crate) struct ManualState {
        pub(crate) source: Option<BlockSource>,
        pub(crate) running: bool,
        pub(crate) opens: usize,
        pub(crate) fail_start: bool,
    }

    impl ManualOutput {
        /// Pulls one block the way the device thread would.
        pub(crate) fn pull(&self, count: usize) -> Option<StreamSignal> {
            let mut inner = self.inner.lock().unwrap();
            let running = inner.running;
            let source = inner.source.as_mut()?;
            let mut block = vec![0.0; count];
            if running {
                Some(source.pull(&mut block))
            } else {
                None
            }
        }
    }

    impl AudioOutput for ManualOutput {
        fn open(&mut self, source: BlockSource) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            inner.source = Some(source);
            inner.running = false;
            inner.opens += 1;
            Ok(())
        }

        fn start(&mut self) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_start {
                return Err(VisualiserError::device("device unplugged"));
            }
            inner.running = true;
            Ok(())
        }

        fn pause(&mut self) -> Result<()> {
            self.inner.lock().unwrap().running = false;
            Ok(())
        }

        fn close(&mut self) {
            let mut inner = self.inner.lock().unwrap();
            inner.source = None;
            inner.running = false;
        }

        fn is_open(&self) -> bool {
            self.inner.lock().unwrap().source.is_some()
        }
    }

    fn engine() -> (PlaybackEngine, ManualOutput) {
        let output = ManualOutput::default();
        let engine = PlaybackEngine::new(Box::new(output.clone()), 4);
        (engine, output)
    }

    fn loaded(len: usize, rate: u32) -> (PlaybackEngine, ManualOutput) {
        let (mut engine, output) = engine();
        engine.load(SampleBuffer::load(vec![0.0_f32; len], rate).unwrap());
        (engine, output)
    }

    fn cursor(engine: &PlaybackEngine) -> usize {
        engine.buffer().unwrap().cursor()
    }

    #[test]
    fn play_without_audio_fails() {
        let (mut engine, output) = engine();
        assert!(matches!(engine.play(), Err(VisualiserError::NoAudioLoaded)));
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert!(!output.is_open());
    }

    #[test]
    fn play_twice_is_a_no_op() {
        let (mut engine, output) = loaded(16, 100);
        engine.play().unwrap();
        let generation = engine.generation();

        engine.play().unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);
        assert_eq!(engine.generation(), generation);
        assert_eq!(output.inner.lock().unwrap().opens, 1);
    }

    #[test]
    fn pause_is_rejected_unless_playing() {
        let (mut engine, _output) = loaded(16, 100);
        let err = engine.pause().unwrap_err();
        assert!(matches!(
            err,
            VisualiserError::InvalidTransition {
                state: PlaybackState::Stopped,
                action: "pause"
            }
        ));
        assert_eq!(engine.state(), PlaybackState::Stopped);

        engine.play().unwrap();
        engine.pause().unwrap();
        assert!(engine.pause().is_err());
        assert_eq!(engine.state(), PlaybackState::Paused);
    }

    #[test]
    fn walks_every_transition() {
        let (mut engine, output) = loaded(16, 100);

        engine.play().unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);
        output.pull(4);
        assert_eq!(cursor(&engine), 4);

        engine.pause().unwrap();
        assert_eq!(engine.state(), PlaybackState::Paused);
        assert_eq!(output.pull(4), None);
        assert_eq!(cursor(&engine), 4);

        engine.play().unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);
        assert_eq!(output.inner.lock().unwrap().opens, 1);
        output.pull(4);
        assert_eq!(cursor(&engine), 8);

        engine.stop();
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert_eq!(cursor(&engine), 0);
        assert!(!output.is_open());

        engine.play().unwrap();
        engine.pause().unwrap();
        engine.stop();
        assert_eq!(engine.state(), PlaybackState::Stopped);

        engine.stop();
        assert_eq!(engine.state(), PlaybackState::Stopped);
    }

    #[test]
    fn toggle_alternates_play_and_pause() {
        let (mut engine, _output) = loaded(16, 100);
        engine.toggle().unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);
        engine.toggle().unwrap();
        assert_eq!(engine.state(), PlaybackState::Paused);
        engine.toggle().unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);
    }

    #[test]
    fn device_failure_rolls_back_to_stopped() {
        let (mut engine, output) = loaded(16, 100);
        output.inner.lock().unwrap().fail_start = true;

        assert!(matches!(engine.play(), Err(VisualiserError::AudioDevice(_))));
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert!(!output.is_open());

        output.inner.lock().unwrap().fail_start = false;
        engine.play().unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);
    }

    #[test]
    fn exhausted_buffer_stops_exactly_once() {
        let (mut engine, output) = loaded(44_100, 44_100);
        engine.play().unwrap();

        assert_eq!(output.pull(44_100), Some(StreamSignal::Continue));
        let buffer = Arc::clone(engine.buffer().unwrap());
        assert!(buffer.is_exhausted());
        assert_eq!(buffer.cursor(), 44_100);
        assert!(!engine.poll_finished());

        assert_eq!(output.pull(4), Some(StreamSignal::End));
        assert_eq!(output.pull(4), Some(StreamSignal::End));
        assert!(engine.poll_finished());

        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert_eq!(buffer.cursor(), 0);
        assert!(!engine.poll_finished());
    }

    #[test]
    fn notification_after_manual_stop_is_ignored() {
        let (mut engine, output) = loaded(4, 100);
        engine.play().unwrap();
        output.pull(4);
        output.pull(4);

        engine.stop();
        engine.play().unwrap();
        let generation = engine.generation();

        assert!(!engine.poll_finished());
        assert_eq!(engine.state(), PlaybackState::Playing);
        assert_eq!(engine.generation(), generation);
    }

    #[test]
    fn notification_while_paused_is_ignored_until_resume() {
        let (mut engine, output) = loaded(4, 100);
        engine.play().unwrap();
        output.pull(4);
        output.pull(4);
        engine.pause().unwrap();

        assert!(!engine.poll_finished());
        assert_eq!(engine.state(), PlaybackState::Paused);

        engine.play().unwrap();
        assert_eq!(output.pull(4), Some(StreamSignal::End));
        assert!(engine.poll_finished());
        assert_eq!(engine.state(), PlaybackState::Stopped);
    }

    #[test]
    fn loading_new_audio_stops_playback() {
        let (mut engine, output) = loaded(16, 100);
        engine.play().unwrap();
        output.pull(4);

        engine.load(SampleBuffer::load(vec![0.5_f32; 8], 100).unwrap());
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert_eq!(engine.buffer().unwrap().len(), 8);

        engine.unload();
        assert!(!engine.is_loaded());
        assert!(matches!(engine.play(), Err(VisualiserError::NoAudioLoaded)));
    }

    #[test]
    fn headless_device_thread_plays_out_and_stops_the_engine() {
        // 40 ms blocks: four full blocks then one padded block.
        let mut engine = PlaybackEngine::new(Box::new(HeadlessOutput::new()), 40);
        engine.load(SampleBuffer::load(vec![0.2_f32; 160], 1_000).unwrap());
        engine.play().unwrap();
        let generation = engine.generation();

        let deadline = Instant::now() + Duration::from_secs(3);
        let mut stopped = false;
        while Instant::now() < deadline {
            if engine.poll_finished() {
                stopped = true;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        assert!(stopped, "engine never saw the end of the buffer");
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert_eq!(cursor(&engine), 0);
        assert!(engine.generation() > generation);
        assert!(!engine.poll_finished());

        // A second run over the same buffer ends the same way.
        engine.play().unwrap();
        let deadline = Instant::now() + Duration::from_secs(3);
        while engine.state() == PlaybackState::Playing && Instant::now() < deadline {
            engine.poll_finished();
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(engine.state(), PlaybackState::Stopped);
    }
}
