//! Ordered chain of nodes acting as a minimal host

use crate::node::{AudioNode, ConfigError};
use tracing::info;

/// Runs a list of nodes in series over the same stereo buffers
#[derive(Default)]
pub struct EffectChain {
    nodes: Vec<Box<dyn AudioNode>>,
    sample_rate: u32,
    block_size: usize,
}

impl EffectChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node, configuring it if the chain already runs
    pub fn push(&mut self, mut node: Box<dyn AudioNode>) -> Result<(), ConfigError> {
        if self.sample_rate > 0 {
            node.configure(self.sample_rate, self.block_size)?;
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.nodes.iter().map(|n| n.name()).collect()
    }

    /// Configure every node for a new operating point
    ///
    /// An invalid operating point is rejected before any node is touched.
    pub fn configure(&mut self, sample_rate: u32, block_size: usize) -> Result<(), ConfigError> {
        ConfigError::check(sample_rate, block_size)?;

        for node in &mut self.nodes {
            node.configure(sample_rate, block_size)?;
        }
        self.sample_rate = sample_rate;
        self.block_size = block_size;

        info!(
            "Effect chain configured: {} nodes, {} Hz, {} frames, {:.2} ms latency",
            self.nodes.len(),
            sample_rate,
            block_size,
            self.latency_seconds() * 1000.0
        );
        Ok(())
    }

    /// Process one callback through all nodes in order
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        for node in &mut self.nodes {
            node.process_in_place(left, right);
        }
    }

    /// Total latency of the chain
    pub fn latency_seconds(&self) -> f32 {
        self.nodes.iter().map(|n| n.latency_seconds()).sum()
    }

    /// Bypass or enable every node
    pub fn set_bypass(&self, bypass: bool) {
        for node in &self.nodes {
            node.set_bypass(bypass);
        }
    }
}
