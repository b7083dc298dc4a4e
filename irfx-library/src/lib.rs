//! Impulse response library for irfx - loading, preprocessing, and settings
//!
//! Everything here runs off the real-time thread:
//! - Loader: decode IR files and fold their channel layout to stereo
//! - Resampler: streaming sample-rate conversion of mono signals
//! - Preprocess: auto-gain normalization and stereo width
//! - Directory / Combine: locating, merging, and saving kernels
//! - Config: persisted convolver settings

mod combine;
mod config;
mod directory;
mod kernel;
mod loader;
mod preprocess;
mod resampler;

pub use combine::{combine_kernels, save_kernel, CombineError, SaveError};
pub use config::{Config, ConvolverSettings};
pub use directory::{KernelDirectory, IRS_EXTENSION};
pub use kernel::{Kernel, KernelError, KernelInfo};
pub use loader::{build_kernel, DecodedKernel, IrLoader, LoadError};
pub use preprocess::{AutoGain, KernelPreprocessor};
pub use resampler::{ResampleError, ResamplerAdapter};
