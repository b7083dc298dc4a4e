//! Frequency response of a convolution kernel for display

use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;
use tracing::debug;

/// One point of a spectrum curve
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SpectrumPoint {
    /// Frequency in Hz
    pub freq: f32,
    /// Normalized magnitude (0.0 - 1.0)
    pub magnitude: f32,
}

/// Kernel power spectrum on linear and logarithmic frequency axes
#[derive(Clone, Debug, Default)]
pub struct KernelSpectrum {
    pub linear_left: Vec<SpectrumPoint>,
    pub linear_right: Vec<SpectrumPoint>,
    pub log_left: Vec<SpectrumPoint>,
    pub log_right: Vec<SpectrumPoint>,
}

impl KernelSpectrum {
    /// Compute the spectrum of a stereo kernel
    ///
    /// Returns an empty spectrum when the channels are too short, differ in
    /// length, or `points` is below 2.
    pub fn compute(left: &[f32], right: &[f32], rate: u32, points: usize) -> Self {
        if left.len() < 2 || left.len() != right.len() || points < 2 || rate == 0 {
            debug!("Skipping kernel spectrum: invalid kernel or point count");
            return Self::default();
        }

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(left.len());

        let mut spectrum_l = power_spectrum(left, fft.as_ref());
        let mut spectrum_r = power_spectrum(right, fft.as_ref());

        let bins = spectrum_l.len();
        let mut freqs: Vec<f32> = (0..bins)
            .map(|n| 0.5 * rate as f32 * n as f32 / bins as f32)
            .collect();

        // Remove the DC component at 0 Hz
        freqs.remove(0);
        spectrum_l.remove(0);
        spectrum_r.remove(0);

        if freqs.is_empty() {
            return Self::default();
        }

        let min_freq = freqs[0];
        let max_freq = freqs[freqs.len() - 1];

        let linear_axis = linspace(min_freq, max_freq, points);
        let log_axis = logspace(min_freq, max_freq, points);

        Self {
            linear_left: curve(&freqs, &spectrum_l, &linear_axis),
            linear_right: curve(&freqs, &spectrum_r, &linear_axis),
            log_left: curve(&freqs, &spectrum_l, &log_axis),
            log_right: curve(&freqs, &spectrum_r, &log_axis),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.linear_left.is_empty()
    }
}

/// Hann-windowed power spectrum, one-sided (n/2 + 1 bins)
fn power_spectrum(kernel: &[f32], fft: &dyn rustfft::Fft<f32>) -> Vec<f32> {
    let n = kernel.len();
    let denom = (n - 1) as f32;

    let mut buffer: Vec<Complex<f32>> = kernel
        .iter()
        .enumerate()
        .map(|(i, &s)| {
            let w = 0.5 * (1.0 - (2.0 * PI * i as f32 / denom).cos());
            Complex::new(s * w, 0.0)
        })
        .collect();

    fft.process(&mut buffer);

    let bins = n / 2 + 1;
    let scale = (bins * bins) as f32;

    buffer[..bins].iter().map(|c| c.norm_sqr() / scale).collect()
}

/// Interpolate onto `axis` and min-max normalize
fn curve(freqs: &[f32], values: &[f32], axis: &[f32]) -> Vec<SpectrumPoint> {
    let mut magnitudes: Vec<f32> = axis.iter().map(|&f| interpolate(freqs, values, f)).collect();

    let min = magnitudes.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = magnitudes.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

    if max > min {
        for m in &mut magnitudes {
            *m = (*m - min) / (max - min);
        }
    }

    axis.iter()
        .zip(magnitudes)
        .map(|(&freq, magnitude)| SpectrumPoint { freq, magnitude })
        .collect()
}

/// Linear interpolation of (xs, ys) at x; xs must be ascending
fn interpolate(xs: &[f32], ys: &[f32], x: f32) -> f32 {
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[xs.len() - 1] {
        return ys[ys.len() - 1];
    }

    let upper = xs.partition_point(|&v| v < x);
    let lower = upper - 1;
    let t = (x - xs[lower]) / (xs[upper] - xs[lower]);

    ys[lower] + t * (ys[upper] - ys[lower])
}

fn linspace(start: f32, end: f32, points: usize) -> Vec<f32> {
    let step = (end - start) / (points - 1) as f32;
    (0..points).map(|i| start + step * i as f32).collect()
}

fn logspace(start: f32, end: f32, points: usize) -> Vec<f32> {
    let (log_start, log_end) = (start.log10(), end.log10());
    linspace(log_start, log_end, points)
        .into_iter()
        .map(|v| 10.0f32.powf(v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spectrum_is_normalized() {
        let kernel: Vec<f32> = (0..512)
            .map(|i| (2.0 * PI * 1000.0 * i as f32 / 48000.0).sin() * (-(i as f32) / 100.0).exp())
            .collect();

        let spectrum = KernelSpectrum::compute(&kernel, &kernel, 48000, 64);

        assert_eq!(spectrum.linear_left.len(), 64);
        assert_eq!(spectrum.log_right.len(), 64);

        let max = spectrum.linear_left.iter().map(|p| p.magnitude).fold(0.0f32, f32::max);
        let min = spectrum.linear_left.iter().map(|p| p.magnitude).fold(1.0f32, f32::min);
        assert!((max - 1.0).abs() < 1e-5);
        assert!(min.abs() < 1e-5);
    }

    #[test]
    fn test_log_axis_is_ascending() {
        let kernel: Vec<f32> = (0..256).map(|i| if i == 0 { 1.0 } else { 0.0 }).collect();
        let spectrum = KernelSpectrum::compute(&kernel, &kernel, 44100, 32);

        for pair in spectrum.log_left.windows(2) {
            assert!(pair[1].freq > pair[0].freq);
        }
        assert!(spectrum.log_left[31].freq <= 22050.0 + 1.0);
    }

    #[test]
    fn test_invalid_kernel_gives_empty_spectrum() {
        assert!(KernelSpectrum::compute(&[1.0], &[1.0], 48000, 32).is_empty());
        assert!(KernelSpectrum::compute(&[1.0, 0.0], &[1.0], 48000, 32).is_empty());
    }

    #[test]
    fn test_interpolate_midpoint() {
        let xs = [0.0, 1.0, 2.0];
        let ys = [0.0, 10.0, 20.0];
        assert!((interpolate(&xs, &ys, 1.5) - 15.0).abs() < 1e-6);
    }
}
