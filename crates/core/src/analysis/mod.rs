use std::{fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{Result, VisualiserError};

/// Gaussian kernels reach this many standard deviations either side.
const GAUSSIAN_TRUNCATE: f32 = 4.0;

/// Magnitude spectrum of real input with FFT plans cached per window length.
///
/// The windows handed over by the frame clock are usually the same length
/// from tick to tick, so the plan and its buffers are rebuilt only when the
/// length changes.
pub struct SpectrumAnalyzer {
    planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    /// Returns `|X[k]|` for the non-negative frequency half, `len / 2 + 1`
    /// bins. No window function is applied.
    pub fn magnitude_spectrum(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        if samples.is_empty() {
            return Ok(Vec::new());
        }

        let fft = self.prepare_fft(samples.len())?;
        fft.input.copy_from_slice(samples);
        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        Ok(fft.spectrum.iter().map(|bin| bin.norm()).collect())
    }

    fn prepare_fft(&mut self, size: usize) -> Result<&mut FftResources> {
        let rebuild = self.fft.as_ref().map_or(true, |fft| fft.size != size);
        if rebuild {
            let plan = self.planner.plan_fft_forward(size);
            let scratch = plan.make_scratch_vec();
            let spectrum = plan.make_output_vec();
            let input = plan.make_input_vec();
            self.fft = Some(FftResources {
                size,
                plan,
                scratch,
                spectrum,
                input,
            });
        }

        self.fft
            .as_mut()
            .ok_or_else(|| VisualiserError::msg("fft resources missing after rebuild"))
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("size", &self.fft.as_ref().map(|fft| fft.size))
            .finish()
    }
}

/// One-dimensional Gaussian filter with standard deviation `sigma`, in
/// samples. Edges are mirrored (`d c b a | a b c d | d c b a`). A
/// non-positive sigma returns the input unchanged.
pub fn gaussian_smooth(values: &[f32], sigma: f32) -> Vec<f32> {
    if sigma <= 0.0 || values.len() < 2 {
        return values.to_vec();
    }

    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;
    let len = values.len() as isize;

    (0..len)
        .map(|center| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, weight)| {
                    let index = mirror_index(center + k as isize - radius, len);
                    weight * values[index]
                })
                .sum()
        })
        .collect()
}

fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (GAUSSIAN_TRUNCATE * sigma + 0.5) as isize;
    let denominator = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|x| (-((x * x) as f32) / denominator).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|weight| *weight /= sum);
    kernel
}

fn mirror_index(index: isize, len: isize) -> usize {
    let period = 2 * len;
    let wrapped = index.rem_euclid(period);
    let mirrored = if wrapped < len {
        wrapped
    } else {
        period - wrapped - 1
    };
    mirrored as usize
}

/// Indices of `count` points evenly spaced from `0` to `len - 1` inclusive.
///
/// Each index is `i * step` truncated towards zero, with the last one pinned
/// to `len - 1`, so ties always resolve downwards.
pub fn bar_indices(len: usize, count: usize) -> Vec<usize> {
    if len == 0 || count == 0 {
        return Vec::new();
    }
    if count == 1 {
        return vec![0];
    }

    let last = (len - 1) as f64;
    let step = last / (count - 1) as f64;
    (0..count)
        .map(|i| {
            if i == count - 1 {
                len - 1
            } else {
                (i as f64 * step) as usize
            }
        })
        .collect()
}

/// Picks `count` evenly spaced values and scales them by the largest one
/// picked. An all-zero selection is returned as zeros.
pub fn select_bars(spectrum: &[f32], count: usize) -> Vec<f32> {
    let bars: Vec<f32> = bar_indices(spectrum.len(), count)
        .into_iter()
        .map(|index| spectrum[index])
        .collect();

    let max = bars.iter().copied().fold(0.0_f32, f32::max);
    let scale = if max > 0.0 { max } else { 1.0 };
    bars.into_iter().map(|value| value / scale).collect()
}
