//! Software rasteriser used to turn frames into pixels for video export.

use super::{RenderFrame, RenderKind};

const BACKGROUND: [u8; 3] = [12, 12, 18];
const WAVEFORM: [u8; 3] = [0, 255, 255];
const SPECTRUM: [u8; 3] = [255, 0, 255];
const PROGRESS: [u8; 3] = [200, 200, 200];
/// Share of the image height used by the progress strip.
const PROGRESS_STRIP: u32 = 24;
/// Gap between neighbouring spectrum bars, in pixels.
const BAR_GAP: u32 = 1;

/// Tightly packed RGB8 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, BACKGROUND)
    }

    pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        let data = color
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let offset = self.offset(x, y);
        [self.data[offset], self.data[offset + 1], self.data[offset + 2]]
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 3
    }

    fn put(&mut self, x: u32, y: u32, color: [u8; 3]) {
        if x < self.width && y < self.height {
            let offset = self.offset(x, y);
            self.data[offset..offset + 3].copy_from_slice(&color);
        }
    }

    /// Fills the column `x` between rows `top` and `bottom`, both inclusive.
    fn vline(&mut self, x: u32, top: u32, bottom: u32, color: [u8; 3]) {
        for y in top.min(bottom)..=bottom.max(top) {
            self.put(x, y, color);
        }
    }
}

/// Draws `frame` into a `width` x `height` image: the waveform as a per-column
/// min/max trace or the spectrum as bars, with a progress strip underneath.
pub fn rasterize(frame: &RenderFrame, width: u32, height: u32) -> PixelBuffer {
    rasterize_panels(std::slice::from_ref(frame), width, height)
}

/// Stacks one equal-height panel per frame, first frame on top, above a single
/// progress strip taken from the first frame.
pub fn rasterize_panels(frames: &[RenderFrame], width: u32, height: u32) -> PixelBuffer {
    let mut pixels = PixelBuffer::new(width, height);
    let Some(first) = frames.first() else {
        return pixels;
    };
    if width == 0 || height == 0 {
        return pixels;
    }

    let strip = (height / PROGRESS_STRIP).max(1).min(height);
    let plot_height = height - strip;
    let panel_height = plot_height / frames.len() as u32;
    if panel_height > 0 {
        for (index, frame) in frames.iter().enumerate() {
            if frame.values.is_empty() {
                continue;
            }
            let panel = Panel {
                top: index as u32 * panel_height,
                height: panel_height,
            };
            match frame.kind {
                RenderKind::Waveform => draw_waveform(&mut pixels, &frame.values, panel),
                RenderKind::Spectrum => draw_bars(&mut pixels, &frame.values, panel),
            }
        }
    }

    let filled = (first.position_fraction.clamp(0.0, 1.0) * width as f32).round() as u32;
    for x in 0..filled.min(width) {
        pixels.vline(x, plot_height, height - 1, PROGRESS);
    }

    pixels
}

/// Horizontal band of the image one frame is drawn into.
#[derive(Debug, Clone, Copy)]
struct Panel {
    top: u32,
    height: u32,
}

fn draw_waveform(pixels: &mut PixelBuffer, values: &[f32], panel: Panel) {
    let width = pixels.width();
    let to_row = |sample: f32| -> u32 {
        let unit = (1.0 - sample.clamp(-1.0, 1.0)) * 0.5;
        let row = ((unit * (panel.height - 1) as f32).round() as u32).min(panel.height - 1);
        panel.top + row
    };

    for x in 0..width {
        let start = x as usize * values.len() / width as usize;
        let end = ((x as usize + 1) * values.len() / width as usize).max(start + 1);
        let column = &values[start.min(values.len() - 1)..end.min(values.len())];

        let (low, high) = column
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), s| (lo.min(*s), hi.max(*s)));
        pixels.vline(x, to_row(high), to_row(low), WAVEFORM);
    }
}

fn draw_bars(pixels: &mut PixelBuffer, values: &[f32], panel: Panel) {
    let width = pixels.width();
    let count = values.len() as u32;
    let bottom = panel.top + panel.height - 1;

    for (index, value) in values.iter().enumerate() {
        let left = index as u32 * width / count;
        let right = ((index as u32 + 1) * width / count).max(left + 1);
        let right = if right - left > BAR_GAP { right - BAR_GAP } else { right };

        let bar = (value.clamp(0.0, 1.0) * panel.height as f32).round() as u32;
        if bar == 0 {
            continue;
        }
        for x in left..right {
            pixels.vline(x, bottom + 1 - bar, bottom, SPECTRUM);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn frame(kind: RenderKind, values: Vec<f32>, position_fraction: f32) -> RenderFrame {
        RenderFrame {
            kind,
            values,
            position_fraction,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn buffer_has_three_bytes_per_pixel() {
        let pixels = rasterize(&frame(RenderKind::Spectrum, vec![], 0.0), 16, 8);
        assert_eq!(pixels.as_bytes().len(), 16 * 8 * 3);
        assert_eq!(pixels.pixel(3, 3), BACKGROUND);
    }

    #[test]
    fn full_bar_reaches_the_top() {
        let pixels = rasterize(&frame(RenderKind::Spectrum, vec![1.0, 0.0], 0.0), 20, 48);
        assert_eq!(pixels.pixel(2, 0), SPECTRUM);
        assert_eq!(pixels.pixel(15, 0), BACKGROUND);
        assert_eq!(pixels.pixel(15, 45), BACKGROUND);
    }

    #[test]
    fn progress_strip_tracks_position() {
        let pixels = rasterize(&frame(RenderKind::Waveform, vec![0.0; 64], 0.5), 32, 48);
        assert_eq!(pixels.pixel(0, 47), PROGRESS);
        assert_eq!(pixels.pixel(15, 47), PROGRESS);
        assert_eq!(pixels.pixel(16, 47), BACKGROUND);
    }

    #[test]
    fn flat_waveform_draws_the_centre_line() {
        let pixels = rasterize(&frame(RenderKind::Waveform, vec![0.0; 10], 0.0), 20, 25);
        let plot_height = 25 - 1;
        let centre = ((plot_height - 1) as f32 * 0.5).round() as u32;
        for x in 0..20 {
            assert_eq!(pixels.pixel(x, centre), WAVEFORM);
        }
        assert_eq!(pixels.pixel(5, 0), BACKGROUND);
    }

    #[test]
    fn stacked_panels_share_the_plot_area() {
        let frames = [
            frame(RenderKind::Waveform, vec![0.0; 10], 0.25),
            frame(RenderKind::Spectrum, vec![1.0, 0.0], 0.25),
        ];
        // 49 rows: a 2 row strip and two 23 row panels, one row left over.
        let pixels = rasterize_panels(&frames, 20, 49);

        assert_eq!(pixels.pixel(5, 11), WAVEFORM);
        assert_eq!(pixels.pixel(5, 22), BACKGROUND);
        assert_eq!(pixels.pixel(2, 22), BACKGROUND);
        assert_eq!(pixels.pixel(2, 23), SPECTRUM);
        assert_eq!(pixels.pixel(2, 45), SPECTRUM);
        assert_eq!(pixels.pixel(15, 45), BACKGROUND);
        assert_eq!(pixels.pixel(4, 48), PROGRESS);
        assert_eq!(pixels.pixel(5, 48), BACKGROUND);
    }

    #[test]
    fn no_frames_draw_nothing() {
        let pixels = rasterize_panels(&[], 8, 8);
        assert_eq!(pixels, PixelBuffer::new(8, 8));
    }
}
