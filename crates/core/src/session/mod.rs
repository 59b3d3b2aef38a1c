use std::{path::Path, sync::Arc, time::Instant};

use crate::{
    audio::{decode_file, AudioOutput, SampleBuffer},
    config::AppConfig,
    playback::{PlaybackEngine, PlaybackState},
    record::{ExportProgress, ExportStatus, FrameSink, VideoEncoder},
    render::{rasterize_panels, RenderFrame, RenderKind, RenderLayout, RenderParams, Renderer},
    timeline::{ClockStopper, FrameClock},
    Result,
};

/// One visualiser window: the transport, the redraw clock, the renderer and
/// the export sink for whatever audio is currently loaded.
///
/// The frame clock exists exactly while audio is loaded and keeps ticking
/// through pauses and stops, so the display always reflects the current
/// position and state.
pub struct Visualiser {
    config: AppConfig,
    engine: PlaybackEngine,
    renderer: Renderer,
    params: RenderParams,
    kind: RenderKind,
    layout: RenderLayout,
    sink: FrameSink,
    clock: Option<FrameClock>,
}

impl Visualiser {
    pub fn new(
        config: AppConfig,
        output: Box<dyn AudioOutput>,
        encoder: Arc<dyn VideoEncoder>,
    ) -> Self {
        let engine = PlaybackEngine::new(output, config.audio.block_size);
        let params = RenderParams::from(&config.render);
        let kind = config.render.kind;
        let layout = config.render.layout;
        Self {
            config,
            engine,
            renderer: Renderer::new(),
            params,
            kind,
            layout,
            sink: FrameSink::new(encoder),
            clock: None,
        }
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    pub fn state(&self) -> PlaybackState {
        self.engine.state()
    }

    pub fn kind(&self) -> RenderKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: RenderKind) {
        self.kind = kind;
    }

    pub fn layout(&self) -> RenderLayout {
        self.layout
    }

    pub fn set_layout(&mut self, layout: RenderLayout) {
        self.layout = layout;
    }

    pub fn is_loaded(&self) -> bool {
        self.engine.is_loaded()
    }

    /// Decodes `path` and makes it the current audio.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let decoded = decode_file(path)?;
        self.load_samples(decoded.samples, decoded.sample_rate)
    }

    pub fn load_samples(&mut self, samples: Vec<f32>, sample_rate: u32) -> Result<()> {
        let buffer = SampleBuffer::load(samples, sample_rate)?;
        self.engine.load(buffer);
        self.clock = Some(FrameClock::new(self.config.clock.interval()));
        Ok(())
    }

    pub fn unload(&mut self) {
        self.engine.unload();
        self.clock = None;
    }

    pub fn play(&mut self) -> Result<()> {
        self.engine.play()
    }

    pub fn pause(&mut self) -> Result<()> {
        self.engine.pause()
    }

    pub fn toggle(&mut self) -> Result<()> {
        self.engine.toggle()
    }

    pub fn stop(&mut self) {
        self.engine.stop();
    }

    /// Blocks until the next redraw is due. `None` when nothing is loaded or
    /// the clock was stopped.
    pub fn wait_tick(&mut self) -> Option<Instant> {
        self.clock.as_mut()?.next_tick()
    }

    pub fn clock_stopper(&self) -> Option<ClockStopper> {
        self.clock.as_ref().map(FrameClock::stopper)
    }

    /// Work done on each clock tick: apply end-of-stream notifications,
    /// render the window behind the cursor once per panel of the layout and,
    /// while recording, capture the rasterised panels as one image.
    ///
    /// Empty when nothing is loaded or the window is still too short to draw.
    pub fn tick(&mut self) -> Result<Vec<RenderFrame>> {
        self.engine.poll_finished();

        let Some(buffer) = self.engine.buffer().map(Arc::clone) else {
            return Ok(Vec::new());
        };
        let window = buffer.read_window(self.config.render.window_size);
        let position = buffer.position_fraction();

        let mut frames = Vec::new();
        for kind in self.layout.kinds(self.kind) {
            if let Some(frame) = self.renderer.render(window, position, kind, &self.params)? {
                frames.push(frame);
            }
        }

        if !frames.is_empty() && self.sink.is_recording() {
            let export = &self.config.export;
            self.sink.capture(rasterize_panels(&frames, export.width, export.height))?;
        }

        Ok(frames)
    }

    pub fn start_recording(&mut self, target_path: &Path, fps: u32) -> Result<ExportProgress> {
        self.sink.start_recording(target_path, fps)
    }

    pub fn stop_recording(&mut self) -> Result<ExportProgress> {
        self.sink.stop_recording()
    }

    pub fn is_recording(&self) -> bool {
        self.sink.is_recording()
    }

    pub fn export_status(&self) -> ExportStatus {
        self.sink.status()
    }

    pub fn export_progress(&self) -> Option<ExportProgress> {
        self.sink.progress()
    }

    /// Blocks until every export has drained.
    pub fn finish_exports(&mut self) {
        self.sink.wait();
    }

    /// One-line summary for a status bar.
    pub fn status_line(&self) -> String {
        match self.engine.buffer() {
            None => "Ready to load audio file".to_string(),
            Some(buffer) => {
                let mut line = format!(
                    "Progress: {:.1}% | {:.2}s / {:.2}s | Status: {}",
                    buffer.position_fraction() * 100.0,
                    buffer.elapsed().as_secs_f32(),
                    buffer.duration().as_secs_f32(),
                    self.state().label()
                );
                if self.sink.is_recording() {
                    line.push_str(&format!(" | REC {} frames", self.sink.captured()));
                }
                line
            }
        }
    }
}

impl std::fmt::Debug for Visualiser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Visualiser")
            .field("engine", &self.engine)
            .field("kind", &self.kind)
            .field("sink", &self.sink)
            .field("clock", &self.clock.as_ref().map(FrameClock::interval))
            .finish()
    }
}
