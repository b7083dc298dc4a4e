//! Block-size adaptation between host callbacks and the convolver
//!
//! The host hands over `host` samples per callback, the convolver wants
//! blocks of `op` samples (a power of two). Input FIFOs collect samples
//! until a whole block is ready, output FIFOs hold finished blocks until
//! the host asks for them. After a reset the first `op` output samples are
//! the dry input; from then on the wet signal follows with a constant delay
//! of `op` samples.

use super::partitioned::{ConvolutionError, PartitionedConvolver};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Most partitions a kernel is split into before the block size grows
pub const MAX_PARTITIONS: usize = 256;

/// Pick the convolver block size for a kernel and host callback size
///
/// The smallest power of two that covers the host block and keeps the
/// partition count within [`MAX_PARTITIONS`], capped at the largest power
/// of two not above `max_block`.
pub fn operational_block_size(kernel_len: usize, host_block: usize, max_block: usize) -> usize {
    let from_host = host_block.max(1).next_power_of_two();
    let from_kernel = kernel_len.div_ceil(MAX_PARTITIONS).max(1).next_power_of_two();

    let max_block = max_block.max(1);
    let cap = 1usize << (usize::BITS - 1 - max_block.leading_zeros());

    from_host.max(from_kernel).min(cap)
}

/// Single-channel sample queue
struct Fifo {
    prod: HeapProd<f32>,
    cons: HeapCons<f32>,
}

impl Fifo {
    fn new(capacity: usize) -> Self {
        let (prod, cons) = HeapRb::<f32>::new(capacity).split();
        Self { prod, cons }
    }

    fn len(&self) -> usize {
        self.cons.occupied_len()
    }

    fn clear(&mut self) {
        self.cons.clear();
    }
}

/// Stereo FIFOs that turn host callbacks into fixed convolver blocks
pub struct BlockAdapter {
    op: usize,
    host: usize,
    input: [Fifo; 2],
    output: [Fifo; 2],
    block_left: Vec<f32>,
    block_right: Vec<f32>,
    /// Output samples still owed before the wet signal starts
    prime_remaining: usize,
}

impl BlockAdapter {
    pub fn new(op: usize, host: usize) -> Self {
        let op = op.max(1);
        let host = host.max(1);
        let capacity = 2 * (op + host);

        Self {
            op,
            host,
            input: [Fifo::new(capacity), Fifo::new(capacity)],
            output: [Fifo::new(capacity), Fifo::new(capacity)],
            block_left: vec![0.0; op],
            block_right: vec![0.0; op],
            prime_remaining: op,
        }
    }

    pub fn operational_block_size(&self) -> usize {
        self.op
    }

    pub fn host_block_size(&self) -> usize {
        self.host
    }

    /// Delay of the wet signal in samples
    pub fn latency_samples(&self) -> usize {
        self.op
    }

    /// Empty the FIFOs and start over with the dry start-up phase
    pub fn reset(&mut self) {
        for fifo in self.input.iter_mut().chain(self.output.iter_mut()) {
            fifo.clear();
        }
        self.prime_remaining = self.op;
    }

    /// Convolve a host buffer in place
    ///
    /// Buffers longer than the configured host block are handled in
    /// host-sized chunks. On error the current chunk is left as it was.
    pub fn process(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
        convolver: &mut PartitionedConvolver,
    ) -> Result<(), ConvolutionError> {
        let n = left.len().min(right.len());
        let host = self.host;

        for (l, r) in left[..n].chunks_mut(host).zip(right[..n].chunks_mut(host)) {
            self.process_chunk(l, r, convolver)?;
        }

        Ok(())
    }

    fn process_chunk(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
        convolver: &mut PartitionedConvolver,
    ) -> Result<(), ConvolutionError> {
        let n = left.len();

        self.input[0].prod.push_slice(left);
        self.input[1].prod.push_slice(right);

        while self.input[0].len() >= self.op && self.input[1].len() >= self.op {
            self.input[0].cons.pop_slice(&mut self.block_left);
            self.input[1].cons.pop_slice(&mut self.block_right);

            convolver.process_block(&mut self.block_left, &mut self.block_right)?;

            self.output[0].prod.push_slice(&self.block_left);
            self.output[1].prod.push_slice(&self.block_right);
        }

        // Start-up positions keep the dry input
        let dry = self.prime_remaining.min(n);
        self.prime_remaining -= dry;

        let wet = (n - dry)
            .min(self.output[0].len())
            .min(self.output[1].len());

        self.output[0].cons.pop_slice(&mut left[dry..dry + wet]);
        self.output[1].cons.pop_slice(&mut right[dry..dry + wet]);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use irfx_library::Kernel;

    fn identity_convolver(block: usize) -> PartitionedConvolver {
        let kernel = Kernel::new(vec![1.0], vec![1.0], 48000).unwrap();
        PartitionedConvolver::new(&kernel, block)
    }

    #[test]
    fn test_operational_block_size() {
        // Host block dominates
        assert_eq!(operational_block_size(1024, 300, 8192), 512);
        // Long kernel forces larger blocks
        assert_eq!(operational_block_size(256 * 1024 + 1, 64, 8192), 2048);
        // Latency budget caps the block
        assert_eq!(operational_block_size(10_000_000, 64, 8192), 8192);
        assert_eq!(operational_block_size(10_000_000, 64, 5000), 4096);
        assert_eq!(operational_block_size(1, 1, 8192), 1);
    }

    #[test]
    fn test_first_call_is_dry_then_wet() {
        let mut convolver = identity_convolver(4);
        let mut adapter = BlockAdapter::new(4, 4);

        let mut left = vec![1.0, 2.0, 3.0, 4.0];
        let mut right = left.clone();
        adapter.process(&mut left, &mut right, &mut convolver).unwrap();
        assert_eq!(left, vec![1.0, 2.0, 3.0, 4.0]);

        let mut left = vec![5.0, 6.0, 7.0, 8.0];
        let mut right = left.clone();
        adapter.process(&mut left, &mut right, &mut convolver).unwrap();
        for (got, want) in left.iter().zip([1.0, 2.0, 3.0, 4.0]) {
            assert!((got - want).abs() < 1e-5, "{} vs {}", got, want);
        }
    }

    #[test]
    fn test_varying_host_blocks_conserve_samples() {
        let op = 8;
        let mut convolver = identity_convolver(op);
        let mut adapter = BlockAdapter::new(op, 7);

        let total: usize = 200;
        let signal: Vec<f32> = (0..total).map(|i| (i + 1) as f32).collect();
        let mut output = Vec::with_capacity(total);

        let sizes = [3, 7, 1, 5, 6, 2, 7];
        let mut pos = 0;
        let mut i = 0;
        while pos < total {
            let len = sizes[i % sizes.len()].min(total - pos);
            let mut left = signal[pos..pos + len].to_vec();
            let mut right = left.clone();
            adapter.process(&mut left, &mut right, &mut convolver).unwrap();
            output.extend_from_slice(&left);
            pos += len;
            i += 1;
        }

        assert_eq!(output.len(), total);

        // Dry start-up, then the input delayed by exactly `op`
        assert_eq!(&output[..op], &signal[..op]);
        for t in op..total {
            let want = signal[t - op];
            assert!(
                (output[t] - want).abs() < 1e-3,
                "Sample {}: {} vs {}",
                t,
                output[t],
                want
            );
        }
    }

    #[test]
    fn test_long_host_buffer_is_chunked() {
        let mut convolver = identity_convolver(4);
        let mut adapter = BlockAdapter::new(4, 4);

        let signal: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let mut left = signal.clone();
        let mut right = signal.clone();
        adapter.process(&mut left, &mut right, &mut convolver).unwrap();

        assert_eq!(&left[..4], &signal[..4]);
        for t in 4..16 {
            assert!((left[t] - signal[t - 4]).abs() < 1e-4);
        }
    }

    #[test]
    fn test_reset_restarts_priming() {
        let mut convolver = identity_convolver(4);
        let mut adapter = BlockAdapter::new(4, 4);

        let mut left = vec![1.0; 4];
        let mut right = vec![1.0; 4];
        adapter.process(&mut left, &mut right, &mut convolver).unwrap();

        adapter.reset();
        convolver.reset();

        let mut left = vec![9.0; 4];
        let mut right = vec![9.0; 4];
        adapter.process(&mut left, &mut right, &mut convolver).unwrap();
        assert_eq!(left, vec![9.0; 4]);
    }
}
