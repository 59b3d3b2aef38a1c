use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use audio_visualiser_core::{
    AppConfig, AudioOutput, ExportStatus, FfmpegEncoder, FrameDisplay, HeadlessOutput,
    PlaybackState, PngSequenceEncoder, RenderKind, RenderLayout, SampleBuffer, VideoEncoder,
    Visualiser, VisualiserError,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod display;

use display::TerminalDisplay;

const EXPORT_POLL: Duration = Duration::from_millis(100);

fn main() -> audio_visualiser_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Play {
            input,
            kind,
            layout,
            bars,
        } => run_play(config, &input, kind, layout, bars),
        Commands::Export {
            input,
            output,
            fps,
            encoder,
        } => run_export(config, &input, &output, fps, encoder),
        Commands::Info { input } => run_info(&input),
    }
}

fn run_play(
    mut config: AppConfig,
    input: &Path,
    kind: Option<KindArg>,
    layout: Option<LayoutArg>,
    bars: Option<usize>,
) -> audio_visualiser_core::Result<()> {
    if let Some(kind) = kind {
        config.render.kind = kind.into();
    }
    if let Some(layout) = layout {
        config.render.layout = layout.into();
    }
    if let Some(bars) = bars {
        config.render.bar_count = bars;
    }
    tracing::info!(
        input = %input.display(),
        kind = ?config.render.kind,
        layout = ?config.render.layout,
        "starting playback"
    );

    let mut visualiser = Visualiser::new(config, default_output(), Arc::new(FfmpegEncoder::new()));
    visualiser.load_file(input)?;
    visualiser.play()?;

    let mut display = TerminalDisplay::new(std::io::stdout());
    while visualiser.wait_tick().is_some() {
        let frames = visualiser.tick()?;
        display.present(&frames, visualiser.state())?;
        if visualiser.state() == PlaybackState::Stopped {
            break;
        }
    }
    display.finish()?;

    tracing::info!("playback finished");
    Ok(())
}

fn run_export(
    mut config: AppConfig,
    input: &Path,
    output: &Path,
    fps: Option<u32>,
    encoder: EncoderArg,
) -> audio_visualiser_core::Result<()> {
    let fps = fps.unwrap_or(config.export.fps);
    if fps == 0 {
        return Err(VisualiserError::InvalidInput("export fps must be positive"));
    }
    // One redraw per exported frame.
    config.clock.fps = Some(fps);

    let encoder: Arc<dyn VideoEncoder> = match encoder {
        EncoderArg::Ffmpeg => Arc::new(FfmpegEncoder::new()),
        EncoderArg::Png => Arc::new(PngSequenceEncoder::new()),
    };
    tracing::info!(input = %input.display(), output = %output.display(), fps, "starting export");

    // Export never needs the sound device; the headless output keeps the
    // cursor moving in real time.
    let mut visualiser = Visualiser::new(config, Box::new(HeadlessOutput::new()), encoder);
    visualiser.load_file(input)?;
    visualiser.start_recording(output, fps)?;
    visualiser.play()?;

    while visualiser.wait_tick().is_some() {
        visualiser.tick()?;
        if visualiser.state() == PlaybackState::Stopped {
            break;
        }
    }

    let progress = visualiser.stop_recording()?;
    loop {
        let status = progress.status();
        tracing::info!(
            drained = progress.drained(),
            total = progress.total(),
            ?status,
            "export progress"
        );
        if status.is_finished() {
            break;
        }
        thread::sleep(EXPORT_POLL);
    }

    match progress.status() {
        ExportStatus::Done => {
            tracing::info!(path = %output.display(), frames = progress.total(), "export written");
            Ok(())
        }
        _ => Err(VisualiserError::encoder(
            progress.error().unwrap_or_else(|| "export failed".to_string()),
        )),
    }
}

fn run_info(input: &Path) -> audio_visualiser_core::Result<()> {
    let buffer: SampleBuffer = audio_visualiser_core::decode_file(input)?.into_buffer()?;
    let name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string());

    println!(
        "Loaded: {name} | Duration: {:.2}s | {} Hz | {} samples",
        buffer.duration().as_secs_f32(),
        buffer.sample_rate(),
        buffer.len()
    );
    Ok(())
}

#[cfg(feature = "native")]
fn default_output() -> Box<dyn AudioOutput> {
    Box::new(audio_visualiser_core::CpalOutput::new())
}

#[cfg(not(feature = "native"))]
fn default_output() -> Box<dyn AudioOutput> {
    tracing::warn!("built without the `native` feature; playing without sound output");
    Box::new(HeadlessOutput::new())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Audio player with a synchronised waveform and spectrum display",
    long_about = None
)]
struct Cli {
    /// JSON configuration file; missing fields use defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play an audio file and draw it in the terminal.
    Play {
        /// Audio file to play (wav, flac, mp3, ogg).
        input: PathBuf,
        /// What to draw.
        #[arg(short, long, value_enum)]
        kind: Option<KindArg>,
        /// Draw the selected kind alone or waveform and spectrum together.
        #[arg(short, long, value_enum)]
        layout: Option<LayoutArg>,
        /// Number of spectrum bars.
        #[arg(short, long)]
        bars: Option<usize>,
    },
    /// Play an audio file silently and export the visualisation as video.
    Export {
        input: PathBuf,
        /// Video file, or a directory for the png encoder.
        output: PathBuf,
        #[arg(long)]
        fps: Option<u32>,
        #[arg(short, long, value_enum, default_value_t = EncoderArg::Ffmpeg)]
        encoder: EncoderArg,
    },
    /// Print duration and sample rate of an audio file.
    Info { input: PathBuf },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Waveform,
    Spectrum,
}

impl From<KindArg> for RenderKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Waveform => RenderKind::Waveform,
            KindArg::Spectrum => RenderKind::Spectrum,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LayoutArg {
    Single,
    Stacked,
}

impl From<LayoutArg> for RenderLayout {
    fn from(value: LayoutArg) -> Self {
        match value {
            LayoutArg::Single => RenderLayout::Single,
            LayoutArg::Stacked => RenderLayout::Stacked,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EncoderArg {
    Ffmpeg,
    Png,
}
