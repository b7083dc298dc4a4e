//! Real-time audio processing for irfx
//!
//! Provides the node contract every effect implements, a simple effect
//! chain acting as host, and the partitioned convolution engine.

mod chain;
pub mod convolver;
mod node;

pub use chain::EffectChain;
pub use convolver::{
    ConvolutionEngine, ConvolutionError, ConvolverHandle, EngineStatus, LoaderPool,
};
pub use node::{
    AudioNode, ConfigError, LevelSnapshot, NodeCore, NodeEvent, NodeHandle, METERING_INTERVAL,
};
