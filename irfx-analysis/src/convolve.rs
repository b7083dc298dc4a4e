//! Offline FFT convolution of two signals
//!
//! Used when combining impulse responses. Not real-time safe: plans and
//! buffers are allocated per call.

use rustfft::{num_complex::Complex, FftPlanner};
use thiserror::Error;

/// Errors from offline convolution
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConvolveError {
    #[error("Cannot convolve an empty signal")]
    Empty,
}

/// Full linear convolution of `a` and `b` (length `a.len() + b.len() - 1`)
pub fn fft_convolve(a: &[f32], b: &[f32]) -> Result<Vec<f32>, ConvolveError> {
    if a.is_empty() || b.is_empty() {
        return Err(ConvolveError::Empty);
    }

    let out_len = a.len() + b.len() - 1;
    let fft_size = out_len.next_power_of_two();

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(fft_size);
    let ifft = planner.plan_fft_inverse(fft_size);

    let mut spec_a = zero_padded(a, fft_size);
    let mut spec_b = zero_padded(b, fft_size);

    fft.process(&mut spec_a);
    fft.process(&mut spec_b);

    for (x, y) in spec_a.iter_mut().zip(&spec_b) {
        *x *= *y;
    }

    ifft.process(&mut spec_a);

    // rustfft does not normalize the inverse transform
    let norm = 1.0 / fft_size as f32;

    Ok(spec_a[..out_len].iter().map(|c| c.re * norm).collect())
}

fn zero_padded(signal: &[f32], size: usize) -> Vec<Complex<f32>> {
    let mut buffer = vec![Complex::new(0.0, 0.0); size];
    for (dst, &src) in buffer.iter_mut().zip(signal) {
        dst.re = src;
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct(a: &[f32], b: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0; a.len() + b.len() - 1];
        for (i, &x) in a.iter().enumerate() {
            for (j, &y) in b.iter().enumerate() {
                out[i + j] += x * y;
            }
        }
        out
    }

    #[test]
    fn test_matches_direct_convolution() {
        let a: Vec<f32> = (0..37).map(|i| ((i * 7 % 11) as f32 - 5.0) * 0.1).collect();
        let b: Vec<f32> = (0..13).map(|i| ((i * 3 % 5) as f32 - 2.0) * 0.2).collect();

        let fast = fft_convolve(&a, &b).unwrap();
        let slow = direct(&a, &b);

        assert_eq!(fast.len(), slow.len());
        for (i, (f, s)) in fast.iter().zip(&slow).enumerate() {
            assert!((f - s).abs() < 1e-4, "Sample {} differs: {} vs {}", i, f, s);
        }
    }

    #[test]
    fn test_identity_kernel() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let out = fft_convolve(&a, &[1.0]).unwrap();
        for (o, i) in out.iter().zip(&a) {
            assert!((o - i).abs() < 1e-5);
        }
    }

    #[test]
    fn test_empty_input_rejected() {
        assert_eq!(fft_convolve(&[], &[1.0]), Err(ConvolveError::Empty));
    }
}
