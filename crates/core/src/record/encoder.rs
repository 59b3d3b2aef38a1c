use std::{
    io::{Read, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, ExitStatus, Stdio},
    thread,
};

use image::RgbImage;

use crate::{render::PixelBuffer, Result, VisualiserError};

/// Opens frame writers for a target path.
pub trait VideoEncoder: Send + Sync {
    fn open_writer(
        &self,
        path: &Path,
        fps: u32,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn FrameWriter>>;
}

/// Accepts frames strictly in display order.
pub trait FrameWriter: Send {
    fn append(&mut self, frame: &PixelBuffer) -> Result<()>;

    /// Finalises the output. Dropping a writer without closing it leaves
    /// whatever was written so far.
    fn close(self: Box<Self>) -> Result<()>;
}

fn check_size(frame: &PixelBuffer, width: u32, height: u32) -> Result<()> {
    if frame.width() != width || frame.height() != height {
        return Err(VisualiserError::encoder(format!(
            "frame is {}x{}, writer expects {width}x{height}",
            frame.width(),
            frame.height()
        )));
    }
    Ok(())
}

/// Pipes raw RGB frames into an `ffmpeg` child process.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: PathBuf,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self::with_program("ffmpeg")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, path: &Path, fps: u32, width: u32, height: u32) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .arg("-s")
            .arg(format!("{width}x{height}"))
            .arg("-r")
            .arg(fps.to_string())
            .args(["-i", "-", "-an", "-pix_fmt", "yuv420p"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        command
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn open_writer(
        &self,
        path: &Path,
        fps: u32,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn FrameWriter>> {
        let writer = FfmpegWriter::spawn(self.command(path, fps, width, height), width, height)?;
        tracing::debug!(path = %path.display(), fps, width, height, "ffmpeg writer opened");
        Ok(Box::new(writer))
    }
}

/// A running ffmpeg process. Its stderr is collected on a helper thread so a
/// chatty encoder can never stall frame writes, and the child is always
/// reaped, even when the writer is dropped after a failed append.
struct FfmpegWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<thread::JoinHandle<String>>,
    outcome: Option<(ExitStatus, String)>,
    width: u32,
    height: u32,
}

impl FfmpegWriter {
    fn spawn(mut command: Command, width: u32, height: u32) -> Result<Self> {
        let mut child = command.spawn().map_err(|e| {
            VisualiserError::encoder(format!(
                "cannot start {}: {e}",
                command.get_program().to_string_lossy()
            ))
        })?;
        let stdin = child.stdin.take();
        let stderr = child.stderr.take();

        let mut writer = Self {
            child,
            stdin,
            stderr: None,
            outcome: None,
            width,
            height,
        };
        if writer.stdin.is_none() {
            let _ = writer.child.kill();
            return Err(VisualiserError::encoder("ffmpeg stdin is not piped"));
        }
        if let Some(mut pipe) = stderr {
            let reader = thread::Builder::new()
                .name("ffmpeg-stderr".into())
                .spawn(move || {
                    let mut log = String::new();
                    let _ = pipe.read_to_string(&mut log);
                    log
                })?;
            writer.stderr = Some(reader);
        }
        Ok(writer)
    }

    /// Closes stdin, reaps the child and returns its exit status with
    /// everything it logged. Later calls return the same outcome.
    fn finish(&mut self) -> Result<(ExitStatus, String)> {
        if let Some(outcome) = &self.outcome {
            return Ok(outcome.clone());
        }

        drop(self.stdin.take());
        let status = self
            .child
            .wait()
            .map_err(|e| VisualiserError::encoder(format!("ffmpeg did not finish: {e}")))?;
        let log = self
            .stderr
            .take()
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default()
            .trim()
            .to_string();

        self.outcome = Some((status, log.clone()));
        Ok((status, log))
    }
}

fn with_log(message: String, log: &str) -> String {
    if log.is_empty() {
        message
    } else {
        format!("{message}: {log}")
    }
}

impl FrameWriter for FfmpegWriter {
    fn append(&mut self, frame: &PixelBuffer) -> Result<()> {
        check_size(frame, self.width, self.height)?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| VisualiserError::encoder("ffmpeg writer already closed"))?;
        if let Err(err) = stdin.write_all(frame.as_bytes()) {
            let log = self.finish().map(|(_, log)| log).unwrap_or_default();
            return Err(VisualiserError::encoder(with_log(
                format!("ffmpeg rejected frame: {err}"),
                &log,
            )));
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        let (status, log) = self.finish()?;
        if status.success() {
            Ok(())
        } else {
            Err(VisualiserError::encoder(with_log(
                format!("ffmpeg exited with {status}"),
                &log,
            )))
        }
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if self.outcome.is_none() {
            if let Err(err) = self.finish() {
                tracing::warn!(%err, "ffmpeg writer dropped uncleanly");
            }
        }
    }
}

/// Writes each frame as `frame_00000.png`, `frame_00001.png`, ... into a
/// directory. Useful where ffmpeg is unavailable; the sequence can be
/// assembled into a video later.
#[derive(Debug, Clone, Default)]
pub struct PngSequenceEncoder;

impl PngSequenceEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl VideoEncoder for PngSequenceEncoder {
    fn open_writer(
        &self,
        path: &Path,
        fps: u32,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn FrameWriter>> {
        std::fs::create_dir_all(path).map_err(|e| {
            VisualiserError::encoder(format!("cannot create {}: {e}", path.display()))
        })?;
        tracing::debug!(path = %path.display(), fps, width, height, "png sequence opened");
        Ok(Box::new(PngSequenceWriter {
            directory: path.to_path_buf(),
            width,
            height,
            next: 0,
        }))
    }
}

struct PngSequenceWriter {
    directory: PathBuf,
    width: u32,
    height: u32,
    next: usize,
}

impl FrameWriter for PngSequenceWriter {
    fn append(&mut self, frame: &PixelBuffer) -> Result<()> {
        check_size(frame, self.width, self.height)?;
        let image = RgbImage::from_raw(self.width, self.height, frame.as_bytes().to_vec())
            .ok_or_else(|| VisualiserError::encoder("pixel buffer does not match its size"))?;
        let path = self.directory.join(format!("frame_{:05}.png", self.next));
        image
            .save(&path)
            .map_err(|e| {
                VisualiserError::encoder(format!("cannot write {}: {e}", path.display()))
            })?;
        self.next += 1;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_sequence_writes_numbered_frames() {
        let scratch = tempfile::tempdir().unwrap();
        let dir = scratch.path().join("frames");
        let mut writer = PngSequenceEncoder::new().open_writer(&dir, 30, 4, 2).unwrap();

        writer.append(&PixelBuffer::filled(4, 2, [255, 0, 0])).unwrap();
        writer.append(&PixelBuffer::filled(4, 2, [0, 255, 0])).unwrap();
        writer.close().unwrap();

        let second = image::open(dir.join("frame_00001.png")).unwrap().to_rgb8();
        assert_eq!(second.dimensions(), (4, 2));
        assert_eq!(second.get_pixel(0, 0).0, [0, 255, 0]);
        assert!(dir.join("frame_00000.png").exists());
    }

    #[test]
    fn writers_reject_mismatched_frames() {
        let scratch = tempfile::tempdir().unwrap();
        let mut writer = PngSequenceEncoder::new()
            .open_writer(scratch.path(), 30, 4, 2)
            .unwrap();

        let err = writer.append(&PixelBuffer::new(2, 2)).unwrap_err();
        assert!(matches!(err, VisualiserError::Encoder(_)));
    }

    #[test]
    fn missing_ffmpeg_is_an_encoder_error() {
        let encoder = FfmpegEncoder::with_program("/nonexistent/ffmpeg-binary");
        let err = encoder
            .open_writer(Path::new("out.mp4"), 30, 4, 2)
            .err()
            .unwrap();
        assert!(matches!(err, VisualiserError::Encoder(_)));
    }

    #[test]
    fn ffmpeg_command_describes_raw_rgb_input() {
        let command = FfmpegEncoder::new().command(Path::new("out.mp4"), 24, 640, 360);
        let args: Vec<String> = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        assert!(args.windows(2).any(|w| w == ["-s", "640x360"]));
        assert!(args.windows(2).any(|w| w == ["-r", "24"]));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "rgb24"]));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[cfg(unix)]
    fn shell(script: &str) -> Command {
        let mut command = Command::new("sh");
        command
            .args(["-c", script])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        command
    }

    #[cfg(unix)]
    #[test]
    fn noisy_encoder_does_not_stall_frame_writes() {
        // Logs far more than a pipe buffer before it reads any input.
        let script = "head -c 300000 /dev/zero | tr '\\0' x >&2; cat > /dev/null";
        let mut writer = FfmpegWriter::spawn(shell(script), 100, 100).unwrap();

        for _ in 0..10 {
            writer.append(&PixelBuffer::new(100, 100)).unwrap();
        }
        Box::new(writer).close().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn failed_append_reports_the_encoder_log() {
        let script = "echo 'unknown encoder libfoo' >&2; exit 1";
        let mut writer = FfmpegWriter::spawn(shell(script), 100, 100).unwrap();

        let err = (0..50)
            .find_map(|_| writer.append(&PixelBuffer::new(100, 100)).err())
            .unwrap();
        match err {
            VisualiserError::Encoder(message) => {
                assert!(message.contains("unknown encoder libfoo"), "{message}")
            }
            other => panic!("unexpected error {other:?}"),
        }

        let (status, _) = writer.finish().unwrap();
        assert!(!status.success());
        assert!(writer.stdin.is_none());
    }
}
