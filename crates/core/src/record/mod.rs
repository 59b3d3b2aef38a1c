//! Frame capture and asynchronous video export.
//!
//! Frames are appended in memory while a session is recording. Stopping the
//! session flips the job to `Draining` and moves the whole frame sequence
//! into a drain thread, which is from then on its only owner. The render path
//! therefore never waits on the encoder, and the two sides never touch the
//! sequence at the same time.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU8, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
};

use serde::{Deserialize, Serialize};

use crate::{render::PixelBuffer, Result, VisualiserError};

pub mod encoder;

pub use encoder::{FfmpegEncoder, FrameWriter, PngSequenceEncoder, VideoEncoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportStatus {
    Idle,
    Recording,
    Draining,
    Done,
    Failed,
}

impl ExportStatus {
    fn to_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Recording => 1,
            Self::Draining => 2,
            Self::Done => 3,
            Self::Failed => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Recording,
            2 => Self::Draining,
            3 => Self::Done,
            4 => Self::Failed,
            _ => Self::Idle,
        }
    }

    /// True once the job can no longer change.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[derive(Debug)]
struct ProgressState {
    target_path: PathBuf,
    fps: u32,
    status: AtomicU8,
    drained: AtomicUsize,
    total: AtomicUsize,
    error: Mutex<Option<String>>,
}

/// Cloneable, non-blocking view of one export job.
#[derive(Debug, Clone)]
pub struct ExportProgress {
    state: Arc<ProgressState>,
}

impl ExportProgress {
    fn new(target_path: PathBuf, fps: u32) -> Self {
        Self {
            state: Arc::new(ProgressState {
                target_path,
                fps,
                status: AtomicU8::new(ExportStatus::Recording.to_u8()),
                drained: AtomicUsize::new(0),
                total: AtomicUsize::new(0),
                error: Mutex::new(None),
            }),
        }
    }

    pub fn status(&self) -> ExportStatus {
        ExportStatus::from_u8(self.state.status.load(Ordering::Acquire))
    }

    pub fn drained(&self) -> usize {
        self.state.drained.load(Ordering::Acquire)
    }

    /// Frame count, fixed once recording stops. Zero while recording.
    pub fn total(&self) -> usize {
        self.state.total.load(Ordering::Acquire)
    }

    pub fn target_path(&self) -> &Path {
        &self.state.target_path
    }

    pub fn fps(&self) -> u32 {
        self.state.fps
    }

    /// Why the job failed, if it did.
    pub fn error(&self) -> Option<String> {
        self.state
            .error
            .lock()
            .map(|error| error.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn set_status(&self, status: ExportStatus) {
        self.state.status.store(status.to_u8(), Ordering::Release);
    }

    fn fail(&self, err: &VisualiserError) {
        let mut error = self
            .state
            .error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *error = Some(err.to_string());
        drop(error);
        self.set_status(ExportStatus::Failed);
    }
}

struct RecordingSession {
    frames: Vec<PixelBuffer>,
    progress: ExportProgress,
}

/// Collects rendered frames during a recording window and exports them on a
/// background thread afterwards.
pub struct FrameSink {
    encoder: Arc<dyn VideoEncoder>,
    session: Option<RecordingSession>,
    last: Option<ExportProgress>,
    drains: Vec<thread::JoinHandle<()>>,
}

impl FrameSink {
    pub fn new(encoder: Arc<dyn VideoEncoder>) -> Self {
        Self {
            encoder,
            session: None,
            last: None,
            drains: Vec::new(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Status of the current session, or of the most recent job.
    pub fn status(&self) -> ExportStatus {
        self.progress()
            .map(|progress| progress.status())
            .unwrap_or(ExportStatus::Idle)
    }

    pub fn progress(&self) -> Option<ExportProgress> {
        self.session
            .as_ref()
            .map(|session| session.progress.clone())
            .or_else(|| self.last.clone())
    }

    /// Frames captured so far in the active session.
    pub fn captured(&self) -> usize {
        self.session
            .as_ref()
            .map(|session| session.frames.len())
            .unwrap_or(0)
    }

    pub fn start_recording(
        &mut self,
        target_path: impl Into<PathBuf>,
        fps: u32,
    ) -> Result<ExportProgress> {
        if self.session.is_some() {
            return Err(VisualiserError::AlreadyRecording);
        }
        if fps == 0 {
            return Err(VisualiserError::InvalidInput("export fps must be positive"));
        }

        let target_path = target_path.into();
        tracing::info!(path = %target_path.display(), fps, "recording started");
        let progress = ExportProgress::new(target_path, fps);
        self.session = Some(RecordingSession {
            frames: Vec::new(),
            progress: progress.clone(),
        });
        self.reap_finished();
        Ok(progress)
    }

    /// Appends a frame to the active session. Memory only, never I/O.
    pub fn capture(&mut self, frame: PixelBuffer) -> Result<()> {
        let session = self.session.as_mut().ok_or(VisualiserError::NotRecording)?;
        session.frames.push(frame);
        Ok(())
    }

    /// Ends the session and hands its frames to a drain thread.
    ///
    /// With no frames captured the job fails with
    /// [`VisualiserError::NothingToExport`] without touching the encoder.
    pub fn stop_recording(&mut self) -> Result<ExportProgress> {
        let session = self.session.take().ok_or(VisualiserError::NotRecording)?;
        let RecordingSession { frames, progress } = session;
        self.last = Some(progress.clone());

        if frames.is_empty() {
            let err = VisualiserError::NothingToExport;
            tracing::warn!(%err, "recording stopped");
            progress.fail(&err);
            return Err(err);
        }

        progress.state.total.store(frames.len(), Ordering::Release);
        progress.set_status(ExportStatus::Draining);
        tracing::info!(frames = frames.len(), "recording stopped; draining to encoder");

        let encoder = Arc::clone(&self.encoder);
        let drain_progress = progress.clone();
        let spawned = thread::Builder::new()
            .name("export-drain".into())
            .spawn(move || drain(encoder.as_ref(), frames, &drain_progress));
        match spawned {
            Ok(handle) => self.drains.push(handle),
            Err(err) => {
                let err = VisualiserError::from(err);
                progress.fail(&err);
                return Err(err);
            }
        }
        Ok(progress)
    }

    /// Blocks until every drain thread has finished.
    pub fn wait(&mut self) {
        for handle in self.drains.drain(..) {
            let _ = handle.join();
        }
    }

    fn reap_finished(&mut self) {
        self.drains.retain(|handle| !handle.is_finished());
    }
}

impl Drop for FrameSink {
    fn drop(&mut self) {
        if !self.drains.is_empty() {
            tracing::info!(jobs = self.drains.len(), "waiting for exports to finish");
        }
        self.wait();
    }
}

impl std::fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSink")
            .field("status", &self.status())
            .field("captured", &self.captured())
            .field("drains", &self.drains.len())
            .finish()
    }
}

/// Writes `frames` in order, then records `Done` or `Failed`. Frames are
/// released one by one as they are written.
fn drain(encoder: &dyn VideoEncoder, frames: Vec<PixelBuffer>, progress: &ExportProgress) {
    let outcome = catch_unwind(AssertUnwindSafe(|| write_all(encoder, frames, progress)))
        .unwrap_or_else(|_| Err(VisualiserError::encoder("encoder panicked")));

    match outcome {
        Ok(()) => {
            progress.set_status(ExportStatus::Done);
            tracing::info!(
                path = %progress.target_path().display(),
                frames = progress.drained(),
                "export finished"
            );
        }
        Err(err) => {
            tracing::error!(
                %err,
                path = %progress.target_path().display(),
                drained = progress.drained(),
                total = progress.total(),
                "export failed"
            );
            progress.fail(&err);
        }
    }
}

fn write_all(
    encoder: &dyn VideoEncoder,
    frames: Vec<PixelBuffer>,
    progress: &ExportProgress,
) -> Result<()> {
    let (width, height) = frames
        .first()
        .map(|frame| (frame.width(), frame.height()))
        .ok_or(VisualiserError::NothingToExport)?;
    let mut writer = encoder.open_writer(progress.target_path(), progress.fps(), width, height)?;

    for frame in frames {
        writer.append(&frame)?;
        progress.state.drained.fetch_add(1, Ordering::AcqRel);
    }

    writer.close()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    /// Encoder that keeps the first byte of every appended frame.
    #[derive(Clone, Default)]
    pub(crate) struct MemoryEncoder {
        pub(crate) written: Arc<Mutex<Vec<u8>>>,
        pub(crate) opens: Arc<AtomicUsize>,
        pub(crate) fail_at: Option<usize>,
    }

    struct MemoryWriter {
        written: Arc<Mutex<Vec<u8>>>,
        fail_at: Option<usize>,
        appended: usize,
    }

    impl VideoEncoder for MemoryEncoder {
        fn open_writer(
            &self,
            _path: &Path,
            _fps: u32,
            _width: u32,
            _height: u32,
        ) -> Result<Box<dyn FrameWriter>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MemoryWriter {
                written: Arc::clone(&self.written),
                fail_at: self.fail_at,
                appended: 0,
            }))
        }
    }

    impl FrameWriter for MemoryWriter {
        fn append(&mut self, frame: &PixelBuffer) -> Result<()> {
            if self.fail_at == Some(self.appended) {
                return Err(VisualiserError::encoder("disk full"));
            }
            self.written.lock().unwrap().push(frame.as_bytes()[0]);
            self.appended += 1;
            Ok(())
        }

        fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    pub(crate) fn wait_until_finished(progress: &ExportProgress) -> ExportStatus {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !progress.status().is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        progress.status()
    }

    fn tagged(tag: u8) -> PixelBuffer {
        PixelBuffer::filled(2, 2, [tag, 0, 0])
    }

    #[test]
    fn drains_frames_in_capture_order() {
        let encoder = MemoryEncoder::default();
        let mut sink = FrameSink::new(Arc::new(encoder.clone()));

        sink.start_recording("out.mp4", 30).unwrap();
        for tag in [10, 11, 12] {
            sink.capture(tagged(tag)).unwrap();
        }
        assert_eq!(sink.captured(), 3);

        let progress = sink.stop_recording().unwrap();
        assert_eq!(progress.total(), 3);
        assert!(!sink.is_recording());

        assert_eq!(wait_until_finished(&progress), ExportStatus::Done);
        assert_eq!(progress.drained(), 3);
        assert_eq!(progress.total(), 3);
        assert_eq!(*encoder.written.lock().unwrap(), vec![10, 11, 12]);
        assert_eq!(sink.status(), ExportStatus::Done);
    }

    #[test]
    fn second_start_while_recording_fails() {
        let mut sink = FrameSink::new(Arc::new(MemoryEncoder::default()));
        sink.start_recording("a.mp4", 30).unwrap();

        assert!(matches!(
            sink.start_recording("b.mp4", 30),
            Err(VisualiserError::AlreadyRecording)
        ));
        assert_eq!(sink.status(), ExportStatus::Recording);
        assert_eq!(sink.progress().unwrap().target_path(), Path::new("a.mp4"));
    }

    #[test]
    fn empty_recording_fails_without_opening_the_encoder() {
        let encoder = MemoryEncoder::default();
        let mut sink = FrameSink::new(Arc::new(encoder.clone()));
        sink.start_recording("out.mp4", 30).unwrap();

        assert!(matches!(sink.stop_recording(), Err(VisualiserError::NothingToExport)));
        assert_eq!(sink.status(), ExportStatus::Failed);
        assert_eq!(encoder.opens.load(Ordering::SeqCst), 0);
        assert!(sink.progress().unwrap().error().is_some());
    }

    #[test]
    fn capture_and_stop_need_a_session() {
        let mut sink = FrameSink::new(Arc::new(MemoryEncoder::default()));
        assert_eq!(sink.status(), ExportStatus::Idle);
        assert!(matches!(sink.capture(tagged(1)), Err(VisualiserError::NotRecording)));
        assert!(matches!(sink.stop_recording(), Err(VisualiserError::NotRecording)));
        assert!(matches!(
            sink.start_recording("out.mp4", 0),
            Err(VisualiserError::InvalidInput(_))
        ));
    }

    #[test]
    fn encoder_failure_is_isolated_from_later_sessions() {
        let encoder = MemoryEncoder {
            fail_at: Some(1),
            ..Default::default()
        };
        let mut sink = FrameSink::new(Arc::new(encoder.clone()));

        sink.start_recording("broken.mp4", 30).unwrap();
        sink.capture(tagged(1)).unwrap();
        sink.capture(tagged(2)).unwrap();
        let failed = sink.stop_recording().unwrap();

        assert_eq!(wait_until_finished(&failed), ExportStatus::Failed);
        assert_eq!(failed.drained(), 1);
        assert!(failed.error().unwrap().contains("disk full"));

        sink.start_recording("again.mp4", 30).unwrap();
        sink.capture(tagged(3)).unwrap();
        let retried = sink.stop_recording().unwrap();
        assert_eq!(wait_until_finished(&retried), ExportStatus::Done);
        assert_eq!(*encoder.written.lock().unwrap(), vec![1, 3]);
        assert_eq!(failed.status(), ExportStatus::Failed);
    }

    #[test]
    fn dropping_the_sink_flushes_pending_exports() {
        let encoder = MemoryEncoder::default();
        let progress = {
            let mut sink = FrameSink::new(Arc::new(encoder.clone()));
            sink.start_recording("out.mp4", 30).unwrap();
            for tag in 0..50 {
                sink.capture(tagged(tag)).unwrap();
            }
            sink.stop_recording().unwrap()
        };

        assert_eq!(progress.status(), ExportStatus::Done);
        assert_eq!(encoder.written.lock().unwrap().len(), 50);
    }
}
