//! Partitioned FFT convolution with background kernel loading
//!
//! - [`PartitionedConvolver`]: overlap-save convolution in fixed blocks
//! - [`BlockAdapter`]: FIFOs between host callbacks and convolver blocks
//! - [`LoaderPool`]: worker threads that build and release kernels
//! - [`ConvolutionEngine`]: the [`AudioNode`](crate::AudioNode) tying it together

mod engine;
mod fifo;
mod loader;
mod partitioned;

pub use engine::{ConvolutionEngine, ConvolverHandle, EngineStatus};
pub use fifo::{operational_block_size, BlockAdapter, MAX_PARTITIONS};
pub use loader::{LoaderPool, PreparedConvolution};
pub use partitioned::{ConvolutionError, PartitionedConvolver};
