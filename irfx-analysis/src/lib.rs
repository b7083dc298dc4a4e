//! Signal analysis for irfx
//!
//! Provides level conversions, FFT-based convolution of impulse
//! responses, and frequency response analysis of convolution kernels.

mod convolve;
mod level;
mod spectrum;

pub use convolve::{fft_convolve, ConvolveError};
pub use level::{db_to_linear, linear_to_db, peak_abs, MINIMUM_DB_LEVEL, MINIMUM_LINEAR_LEVEL};
pub use spectrum::{KernelSpectrum, SpectrumPoint};
