//! Background workers that build convolution states
//!
//! Jobs arrive over a bounded channel. A load decodes and preprocesses the
//! kernel, plans the convolver, and posts the finished state to the engine's
//! [`Mailbox`]. Retired states come back here so their memory is freed off
//! the audio thread.

use super::engine::EngineShared;
use super::fifo::{operational_block_size, BlockAdapter};
use super::partitioned::PartitionedConvolver;
use super::EngineStatus;
use crate::node::NodeEvent;
use crossbeam_channel::{bounded, Receiver, Sender};
use irfx_library::{build_kernel, Kernel, KernelPreprocessor, LoadError};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Capacity of the pool job queue
const JOB_CAPACITY: usize = 64;

/// A fully built convolution state, ready to be swapped in
pub struct PreparedConvolution {
    pub(crate) generation: u64,
    pub(crate) kernel: Arc<Kernel>,
    pub(crate) convolver: PartitionedConvolver,
    pub(crate) adapter: BlockAdapter,
}

impl PreparedConvolution {
    pub fn new(kernel: Kernel, host_block: usize, max_block: usize, generation: u64) -> Self {
        let op = operational_block_size(kernel.len(), host_block, max_block);

        Self {
            generation,
            convolver: PartitionedConvolver::new(&kernel, op),
            adapter: BlockAdapter::new(op, host_block),
            kernel: Arc::new(kernel),
        }
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub fn operational_block_size(&self) -> usize {
        self.adapter.operational_block_size()
    }

    /// Wet signal delay at `sample_rate`
    pub fn latency_seconds(&self, sample_rate: u32) -> f32 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.adapter.latency_samples() as f32 / sample_rate as f32
    }

    /// Replace the FIFOs for a new host block size and clear all history
    pub fn rebuild_for_host(&mut self, host_block: usize) {
        self.adapter = BlockAdapter::new(self.adapter.operational_block_size(), host_block);
        self.convolver.reset();
    }

    pub fn reset(&mut self) {
        self.adapter.reset();
        self.convolver.reset();
    }

    /// Convolve a host buffer in place
    pub fn process(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
    ) -> Result<(), super::ConvolutionError> {
        self.adapter.process(left, right, &mut self.convolver)
    }
}

/// Everything a worker needs to build one kernel
pub(crate) struct LoadRequest {
    pub generation: u64,
    pub path: PathBuf,
    pub sample_rate: u32,
    pub host_block: usize,
    pub max_block: usize,
    pub preprocessor: KernelPreprocessor,
    pub shared: Arc<EngineShared>,
    pub events: Sender<NodeEvent>,
}

/// Results handed to the engine
pub(crate) enum LoadOutcome {
    Ready(Box<PreparedConvolution>),
    Failed { generation: u64 },
    Cleared { generation: u64 },
}

impl LoadOutcome {
    pub fn generation(&self) -> u64 {
        match self {
            LoadOutcome::Ready(state) => state.generation,
            LoadOutcome::Failed { generation } | LoadOutcome::Cleared { generation } => {
                *generation
            }
        }
    }
}

/// Latest-wins hand-off of load outcomes to the audio thread
///
/// Only the newest outcome is kept, so a stalled stream never loses a
/// finished kernel: whatever is waiting when callbacks resume is the most
/// recent request.
#[derive(Default)]
pub(crate) struct Mailbox {
    slot: Mutex<Option<LoadOutcome>>,
}

impl Mailbox {
    /// Store `outcome` unless a newer one is already waiting
    ///
    /// Never called from the audio thread. A replaced outcome is dropped here.
    pub fn post(&self, outcome: LoadOutcome) {
        let replaced = {
            let mut slot = self.slot.lock();
            match slot.as_ref() {
                Some(waiting) if waiting.generation() > outcome.generation() => Some(outcome),
                _ => slot.replace(outcome),
            }
        };

        if let Some(replaced) = replaced {
            debug!("Dropping superseded outcome (generation {})", replaced.generation());
        }
    }

    /// Take the waiting outcome without blocking
    pub fn try_take(&self) -> Option<LoadOutcome> {
        self.slot.try_lock().and_then(|mut slot| slot.take())
    }

    #[cfg(test)]
    pub fn waiting_generation(&self) -> Option<u64> {
        self.slot.lock().as_ref().map(LoadOutcome::generation)
    }
}

pub(crate) enum Job {
    Load(LoadRequest),
    Retire(Box<PreparedConvolution>),
    Shutdown,
}

/// Worker threads shared by any number of convolution engines
pub struct LoaderPool {
    jobs: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl Default for LoaderPool {
    fn default() -> Self {
        Self::new(2)
    }
}

impl LoaderPool {
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let (jobs, rx) = bounded::<Job>(JOB_CAPACITY);

        let workers = (0..threads)
            .map(|index| {
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("irfx-loader-{}", index))
                    .spawn(move || worker_loop(rx))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("Failed to spawn loader thread: {}", e);
                    None
                }
            })
            .collect::<Vec<_>>();

        info!("Loader pool started with {} threads", workers.len());

        Self { jobs, workers }
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn sender(&self) -> Sender<Job> {
        self.jobs.clone()
    }
}

impl Drop for LoaderPool {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.jobs.send(Job::Shutdown);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        debug!("Loader pool stopped");
    }
}

fn worker_loop(rx: Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        match job {
            Job::Load(request) => run_load(request),
            Job::Retire(state) => {
                debug!("Releasing retired convolution state (generation {})", state.generation);
                drop(state);
            }
            Job::Shutdown => break,
        }
    }
}

fn run_load(request: LoadRequest) {
    let shared = request.shared.as_ref();
    let generation = request.generation;
    let is_stale = || shared.generation.load(Ordering::Acquire) != generation;

    if is_stale() {
        debug!("Skipping superseded load of {}", request.path.display());
        return;
    }

    info!(
        "Loading impulse response {} at {} Hz",
        request.path.display(),
        request.sample_rate
    );

    let result = build_kernel(
        &request.path,
        request.sample_rate,
        &request.preprocessor,
        &is_stale,
    )
    .and_then(|kernel| {
        if is_stale() {
            return Err(LoadError::Cancelled);
        }
        Ok(PreparedConvolution::new(
            kernel,
            request.host_block,
            request.max_block,
            generation,
        ))
    });

    match result {
        Ok(prepared) => {
            if is_stale() {
                debug!("Discarding superseded kernel {}", request.path.display());
                return;
            }

            let info = prepared.kernel.info();
            info!(
                "Loaded {}: {} samples ({:.2} s), block size {}, {} partitions",
                request.path.display(),
                info.samples,
                info.duration_secs,
                prepared.operational_block_size(),
                prepared.convolver.partitions()
            );

            // Kernel and info become visible to handles once the engine swaps it in
            *shared.last_error.write() = None;
            shared.mailbox.post(LoadOutcome::Ready(Box::new(prepared)));
        }
        Err(LoadError::Cancelled) => {
            debug!("Load of {} was cancelled", request.path.display());
        }
        Err(e) => {
            if is_stale() {
                return;
            }

            warn!("Failed to load {}: {}", request.path.display(), e);

            // Keep reporting Ready while an older kernel stays active
            let fallback = if shared.kernel.read().is_some() {
                EngineStatus::Ready
            } else {
                EngineStatus::Uninitialized
            };
            shared.set_status(fallback);

            let message = e.to_string();
            *shared.last_error.write() = Some(message.clone());

            let _ = request.events.try_send(NodeEvent::LoadFailed(message));
            shared.mailbox.post(LoadOutcome::Failed { generation });
        }
    }
}
