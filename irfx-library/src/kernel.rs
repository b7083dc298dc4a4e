//! Operational convolution kernel

use thiserror::Error;

/// Reasons a sample pair cannot become a kernel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("Kernel channels are empty")]
    Empty,
    #[error("Kernel channels have different lengths ({left} vs {right})")]
    LengthMismatch { left: usize, right: usize },
    #[error("Kernel contains NaN or infinite values")]
    NonFinite,
    #[error("Kernel sample rate must be greater than zero")]
    InvalidRate,
}

/// Stereo impulse response ready for convolution
///
/// Both channels always have the same non-zero length and contain only
/// finite samples. The length never changes after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    left: Vec<f32>,
    right: Vec<f32>,
    rate: u32,
    native_rate: u32,
    width_percent: u32,
}

/// Snapshot of kernel properties for display
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelInfo {
    /// Rate the kernel was prepared for
    pub rate: u32,
    /// Rate of the source file
    pub native_rate: u32,
    /// Samples per channel
    pub samples: usize,
    pub duration_secs: f64,
    pub width_percent: u32,
}

impl Kernel {
    /// Build a kernel at `rate` that was decoded at the same rate
    pub fn new(left: Vec<f32>, right: Vec<f32>, rate: u32) -> Result<Self, KernelError> {
        Self::with_details(left, right, rate, rate, 100)
    }

    /// Build a kernel recording its source rate and applied width
    pub fn with_details(
        left: Vec<f32>,
        right: Vec<f32>,
        rate: u32,
        native_rate: u32,
        width_percent: u32,
    ) -> Result<Self, KernelError> {
        if rate == 0 || native_rate == 0 {
            return Err(KernelError::InvalidRate);
        }
        if left.is_empty() || right.is_empty() {
            return Err(KernelError::Empty);
        }
        if left.len() != right.len() {
            return Err(KernelError::LengthMismatch {
                left: left.len(),
                right: right.len(),
            });
        }
        if left.iter().chain(right.iter()).any(|s| !s.is_finite()) {
            return Err(KernelError::NonFinite);
        }

        Ok(Self {
            left,
            right,
            rate,
            native_rate,
            width_percent,
        })
    }

    /// Samples per channel
    pub fn len(&self) -> usize {
        self.left.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    pub fn left(&self) -> &[f32] {
        &self.left
    }

    pub fn right(&self) -> &[f32] {
        &self.right
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn native_rate(&self) -> u32 {
        self.native_rate
    }

    pub fn width_percent(&self) -> u32 {
        self.width_percent
    }

    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.rate as f64
    }

    pub fn info(&self) -> KernelInfo {
        KernelInfo {
            rate: self.rate,
            native_rate: self.native_rate,
            samples: self.len(),
            duration_secs: self.duration_secs(),
            width_percent: self.width_percent,
        }
    }

    /// Consume the kernel, returning its channels
    pub fn into_channels(self) -> (Vec<f32>, Vec<f32>) {
        (self.left, self.right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_kernel() {
        let kernel = Kernel::new(vec![1.0, 0.5], vec![0.5, 1.0], 48000).unwrap();
        assert_eq!(kernel.len(), 2);
        assert_eq!(kernel.info().samples, 2);
        assert!((kernel.duration_secs() - 2.0 / 48000.0).abs() < 1e-12);
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let err = Kernel::new(vec![1.0, 0.0], vec![1.0], 48000).unwrap_err();
        assert_eq!(err, KernelError::LengthMismatch { left: 2, right: 1 });
    }

    #[test]
    fn test_empty_and_non_finite_rejected() {
        assert_eq!(Kernel::new(vec![], vec![], 48000), Err(KernelError::Empty));
        assert_eq!(
            Kernel::new(vec![f32::NAN], vec![0.0], 48000),
            Err(KernelError::NonFinite)
        );
        assert_eq!(Kernel::new(vec![1.0], vec![1.0], 0), Err(KernelError::InvalidRate));
    }
}
