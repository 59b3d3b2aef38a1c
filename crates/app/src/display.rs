use std::io::Write;

use audio_visualiser_core::{FrameDisplay, PlaybackState, RenderFrame, RenderKind, Result};

const LEVELS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
/// Columns used for waveform traces.
const WAVEFORM_COLUMNS: usize = 64;

/// Single-line terminal display: one character cell per bar, redrawn in
/// place with a carriage return. Stacked panels sit side by side.
pub struct TerminalDisplay<W: Write> {
    out: W,
}

impl<W: Write> TerminalDisplay<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Moves past the redrawn line.
    pub fn finish(&mut self) -> Result<()> {
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> FrameDisplay for TerminalDisplay<W> {
    fn present(&mut self, frames: &[RenderFrame], state: PlaybackState) -> Result<()> {
        let Some(first) = frames.first() else {
            return Ok(());
        };
        let panels: Vec<String> = frames.iter().map(panel).collect();
        write!(
            self.out,
            "\r[{}] {:5.1}% {:<7}",
            panels.join("|"),
            first.position_fraction * 100.0,
            state.label()
        )?;
        self.out.flush()?;
        Ok(())
    }
}

fn panel(frame: &RenderFrame) -> String {
    match frame.kind {
        RenderKind::Spectrum => bars(&frame.values),
        RenderKind::Waveform => bars(&envelope(&frame.values, WAVEFORM_COLUMNS)),
    }
}

fn bars(values: &[f32]) -> String {
    values
        .iter()
        .map(|value| {
            let level = (value.clamp(0.0, 1.0) * (LEVELS.len() - 1) as f32).round() as usize;
            LEVELS[level]
        })
        .collect()
}

/// Peak absolute amplitude per column.
fn envelope(samples: &[f32], columns: usize) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let chunk = samples.len().div_ceil(columns).max(1);
    samples
        .chunks(chunk)
        .map(|chunk| chunk.iter().fold(0.0_f32, |peak, s| peak.max(s.abs())))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn frame(kind: RenderKind, values: Vec<f32>) -> RenderFrame {
        RenderFrame {
            kind,
            values,
            position_fraction: 0.5,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn draws_bars_with_progress_and_state() {
        let mut display = TerminalDisplay::new(Vec::new());
        let frame = frame(RenderKind::Spectrum, vec![0.0, 0.5, 1.0]);

        display.present(&[frame], PlaybackState::Paused).unwrap();
        let text = String::from_utf8(display.out).unwrap();
        assert!(text.starts_with("\r[ ▄█]"));
        assert!(text.contains("50.0%"));
        assert!(text.contains("Paused"));
    }

    #[test]
    fn stacked_panels_share_one_line() {
        let mut display = TerminalDisplay::new(Vec::new());
        let frames = [
            frame(RenderKind::Waveform, vec![1.0, -1.0]),
            frame(RenderKind::Spectrum, vec![0.0, 1.0]),
        ];

        display.present(&frames, PlaybackState::Playing).unwrap();
        let text = String::from_utf8(display.out).unwrap();
        assert!(text.starts_with("\r[██| █]"), "{text:?}");
    }

    #[test]
    fn nothing_to_show_writes_nothing() {
        let mut display = TerminalDisplay::new(Vec::new());
        display.present(&[], PlaybackState::Stopped).unwrap();
        assert!(display.out.is_empty());
    }

    #[test]
    fn waveform_envelope_takes_column_peaks() {
        let peaks = envelope(&[0.1, -0.8, 0.3, 0.2], 2);
        assert_eq!(peaks, vec![0.8, 0.3]);
    }
}
