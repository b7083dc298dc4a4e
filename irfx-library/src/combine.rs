//! Merging two impulse responses into one and saving kernels to disk

use crate::kernel::{Kernel, KernelError};
use crate::resampler::{ResampleError, ResamplerAdapter};
use irfx_analysis::{fft_convolve, ConvolveError};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Errors from combining kernels
#[derive(Error, Debug)]
pub enum CombineError {
    #[error("Resampling failed: {0}")]
    Resample(#[from] ResampleError),
    #[error("Convolution failed: {0}")]
    Convolve(#[from] ConvolveError),
    #[error("Invalid combined kernel: {0}")]
    Kernel(#[from] KernelError),
}

/// Errors from writing a kernel file
#[derive(Error, Debug)]
pub enum SaveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

/// Convolve two kernels channel by channel
///
/// Both are brought to the higher of the two rates first. The result has
/// `a.len() + b.len() - 1` samples at that rate.
pub fn combine_kernels(a: &Kernel, b: &Kernel) -> Result<Kernel, CombineError> {
    let rate = a.rate().max(b.rate());

    let a_left = ResamplerAdapter::resample(a.rate(), rate, a.left())?;
    let a_right = ResamplerAdapter::resample(a.rate(), rate, a.right())?;
    let b_left = ResamplerAdapter::resample(b.rate(), rate, b.left())?;
    let b_right = ResamplerAdapter::resample(b.rate(), rate, b.right())?;

    let left = fft_convolve(&a_left, &b_left)?;
    let right = fft_convolve(&a_right, &b_right)?;

    info!(
        "Combined kernels ({} + {} samples) into {} samples at {} Hz",
        a_left.len(),
        b_left.len(),
        left.len(),
        rate
    );

    Ok(Kernel::new(left, right, rate)?)
}

/// Write a kernel as a 32-bit float stereo WAV
pub fn save_kernel(kernel: &Kernel, path: &Path) -> Result<(), SaveError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: kernel.rate(),
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for (l, r) in kernel.left().iter().zip(kernel.right()) {
        writer.write_sample(*l)?;
        writer.write_sample(*r)?;
    }
    writer.finalize()?;

    info!("Saved kernel to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::IrLoader;

    #[test]
    fn test_combine_same_rate_length() {
        let a = Kernel::new(vec![1.0, 0.5, 0.0], vec![1.0, 0.0, 0.0], 48000).unwrap();
        let b = Kernel::new(vec![0.5, 0.5], vec![1.0, 0.0], 48000).unwrap();

        let combined = combine_kernels(&a, &b).unwrap();
        assert_eq!(combined.len(), 4);
        assert_eq!(combined.rate(), 48000);

        let expected_left = [0.5, 0.75, 0.25, 0.0];
        for (got, want) in combined.left().iter().zip(expected_left) {
            assert!((got - want).abs() < 1e-5, "{} vs {}", got, want);
        }
        assert!((combined.right()[0] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_combine_uses_higher_rate() {
        let a = Kernel::new(vec![1.0; 441], vec![1.0; 441], 44100).unwrap();
        let b = Kernel::new(vec![1.0; 10], vec![1.0; 10], 48000).unwrap();

        let combined = combine_kernels(&a, &b).unwrap();
        assert_eq!(combined.rate(), 48000);
        assert_eq!(combined.len(), 480 + 10 - 1);
    }

    #[test]
    fn test_save_then_decode() {
        let kernel = Kernel::new(vec![0.5, -0.25], vec![0.125, 1.0], 44100).unwrap();
        let path = std::env::temp_dir()
            .join(format!("irfx-save-{}", std::process::id()))
            .join("saved.irs");

        save_kernel(&kernel, &path).unwrap();
        let decoded = IrLoader::decode(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(decoded.rate, 44100);
        assert_eq!(decoded.channels[0], vec![0.5, -0.25]);
        assert_eq!(decoded.channels[1], vec![0.125, 1.0]);
    }
}
