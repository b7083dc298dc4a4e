//! Uniformly partitioned overlap-save convolution
//!
//! The kernel is split into partitions of `B` samples, each transformed once
//! with a `2B` FFT. Every block of input is transformed into a
//! frequency-domain delay line; the output spectrum is the sum of each
//! partition multiplied with the input spectrum from as many blocks ago.
//! The last `B` samples of the inverse transform are the linear convolution
//! result for the block.

use irfx_library::Kernel;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;
use thiserror::Error;

/// Failures of the per-block convolution
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvolutionError {
    #[error("Expected blocks of {expected} samples, got {got}")]
    BlockSize { expected: usize, got: usize },
    #[error("Convolution produced NaN or infinite samples")]
    NonFinite,
}

/// Per-channel convolution state
struct ChannelState {
    /// Kernel partition spectra, `2B` bins each
    partitions: Vec<Vec<Complex<f32>>>,
    /// Input spectra of the most recent blocks, indexed as a ring
    delay_line: Vec<Vec<Complex<f32>>>,
    /// Previous and current input block
    window: Vec<f32>,
    kernel_len: usize,
}

impl ChannelState {
    fn new(kernel: &[f32], block: usize, fft: &dyn Fft<f32>, scratch: &mut [Complex<f32>]) -> Self {
        let fft_size = block * 2;

        let partitions: Vec<Vec<Complex<f32>>> = kernel
            .chunks(block)
            .map(|chunk| {
                let mut spectrum = vec![Complex::new(0.0, 0.0); fft_size];
                for (bin, &s) in spectrum.iter_mut().zip(chunk) {
                    bin.re = s;
                }
                fft.process_with_scratch(&mut spectrum, scratch);
                spectrum
            })
            .collect();

        let delay_line = vec![vec![Complex::new(0.0, 0.0); fft_size]; partitions.len()];

        Self {
            partitions,
            delay_line,
            window: vec![0.0; fft_size],
            kernel_len: kernel.len(),
        }
    }

    fn reset(&mut self) {
        self.window.fill(0.0);
        for spectrum in &mut self.delay_line {
            spectrum.fill(Complex::new(0.0, 0.0));
        }
    }
}

/// Stereo partitioned convolver with a fixed block size
///
/// All buffers are allocated up front; [`process_block`](Self::process_block)
/// does not allocate.
pub struct PartitionedConvolver {
    block: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    /// Spectrum being transformed
    work: Vec<Complex<f32>>,
    /// Summed output spectrum
    accum: Vec<Complex<f32>>,
    channels: [ChannelState; 2],
    /// Delay line slot holding the newest input spectrum
    head: usize,
}

impl PartitionedConvolver {
    /// Plan the transforms and precompute the kernel partitions
    ///
    /// `block` is clamped to at least one sample.
    pub fn new(kernel: &Kernel, block: usize) -> Self {
        let block = block.max(1);
        let fft_size = block * 2;

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let ifft = planner.plan_fft_inverse(fft_size);

        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());
        let mut scratch = vec![Complex::new(0.0, 0.0); scratch_len];

        let left = ChannelState::new(kernel.left(), block, fft.as_ref(), &mut scratch);
        let right = ChannelState::new(kernel.right(), block, fft.as_ref(), &mut scratch);

        Self {
            block,
            fft,
            ifft,
            scratch,
            work: vec![Complex::new(0.0, 0.0); fft_size],
            accum: vec![Complex::new(0.0, 0.0); fft_size],
            channels: [left, right],
            head: 0,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block
    }

    pub fn partitions(&self) -> usize {
        self.channels[0].partitions.len()
    }

    /// Kernel samples held per channel (left, right)
    pub fn channel_lengths(&self) -> (usize, usize) {
        (self.channels[0].kernel_len, self.channels[1].kernel_len)
    }

    /// Clear the input history
    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.reset();
        }
        self.head = 0;
    }

    /// Convolve one block per channel in place
    pub fn process_block(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
    ) -> Result<(), ConvolutionError> {
        for got in [left.len(), right.len()] {
            if got != self.block {
                return Err(ConvolutionError::BlockSize {
                    expected: self.block,
                    got,
                });
            }
        }

        let partition_count = self.partitions();
        let head = self.head;

        self.convolve_channel(0, left, head, partition_count);
        self.convolve_channel(1, right, head, partition_count);

        self.head = (head + 1) % partition_count;

        if left.iter().chain(right.iter()).any(|s| !s.is_finite()) {
            return Err(ConvolutionError::NonFinite);
        }

        Ok(())
    }

    fn convolve_channel(&mut self, index: usize, samples: &mut [f32], head: usize, count: usize) {
        let block = self.block;
        let scale = 1.0 / (2 * block) as f32;
        let channel = &mut self.channels[index];

        // Slide the window: previous block, then the new one
        channel.window.copy_within(block.., 0);
        channel.window[block..].copy_from_slice(samples);

        for (bin, &s) in self.work.iter_mut().zip(&channel.window) {
            *bin = Complex::new(s, 0.0);
        }
        self.fft.process_with_scratch(&mut self.work, &mut self.scratch);
        channel.delay_line[head].copy_from_slice(&self.work);

        self.accum.fill(Complex::new(0.0, 0.0));
        for (p, partition) in channel.partitions.iter().enumerate() {
            let input = &channel.delay_line[(head + count - p) % count];
            for ((acc, x), h) in self.accum.iter_mut().zip(input).zip(partition) {
                *acc += x * h;
            }
        }

        self.ifft.process_with_scratch(&mut self.accum, &mut self.scratch);

        for (out, bin) in samples.iter_mut().zip(&self.accum[block..]) {
            *out = bin.re * scale;
        }
    }
}
