//! Convolution engine node and its control handle

use super::loader::{Job, LoadOutcome, LoadRequest, LoaderPool, Mailbox, PreparedConvolution};
use crate::node::{AudioNode, ConfigError, NodeCore, NodeEvent, NodeHandle};
use crossbeam_channel::Sender;
use irfx_library::{AutoGain, ConvolverSettings, Kernel, KernelInfo, KernelPreprocessor};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of a convolution engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// No kernel; audio passes through
    Uninitialized,
    /// A kernel is being built in the background
    Loading,
    /// A kernel is active
    Ready,
}

impl EngineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineStatus::Uninitialized => "uninitialized",
            EngineStatus::Loading => "loading",
            EngineStatus::Ready => "ready",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineStatus::Loading,
            2 => EngineStatus::Ready,
            _ => EngineStatus::Uninitialized,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            EngineStatus::Uninitialized => 0,
            EngineStatus::Loading => 1,
            EngineStatus::Ready => 2,
        }
    }
}

/// State shared between the engine, its handles, and loader workers
pub(crate) struct EngineShared {
    /// Bumped by every load or clear request
    pub generation: AtomicU64,
    status: AtomicU8,
    pub settings: RwLock<ConvolverSettings>,
    /// Operating point of the last successful configure (0 before that)
    pub sample_rate: AtomicU32,
    pub block_size: AtomicUsize,
    pub last_error: RwLock<Option<String>>,
    /// Details of the active kernel, written only by the engine
    pub kernel_info: RwLock<Option<KernelInfo>>,
    pub kernel: RwLock<Option<Arc<Kernel>>>,
    /// Newest load outcome not yet seen by the engine
    pub mailbox: Mailbox,
}

impl EngineShared {
    pub fn status(&self) -> EngineStatus {
        EngineStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: EngineStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }
}

/// Issues load and clear requests; shared by the engine and its handles
#[derive(Clone)]
struct Controller {
    shared: Arc<EngineShared>,
    jobs: Sender<Job>,
    events: Sender<NodeEvent>,
}

impl Controller {
    /// Rebuild the kernel from the current settings
    ///
    /// Supersedes any load in flight. Without a kernel path the engine goes
    /// back to pass-through. Before the first configure the request is only
    /// recorded; configure starts it.
    fn request_reload(&self) {
        let settings = self.shared.settings.read().clone();
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;

        let Some(path) = settings.kernel_path.clone() else {
            debug!("Kernel path cleared, switching to pass-through");
            *self.shared.last_error.write() = None;
            self.shared.set_status(EngineStatus::Uninitialized);
            self.shared.mailbox.post(LoadOutcome::Cleared { generation });
            return;
        };

        let sample_rate = self.shared.sample_rate.load(Ordering::Acquire);
        let host_block = self.shared.block_size.load(Ordering::Acquire);
        if sample_rate == 0 || host_block == 0 {
            debug!("Deferring load of {} until configure", path.display());
            return;
        }

        self.shared.set_status(EngineStatus::Loading);

        let request = LoadRequest {
            generation,
            path,
            sample_rate,
            host_block,
            max_block: settings.max_block_size,
            preprocessor: settings.preprocessor(),
            shared: self.shared.clone(),
            events: self.events.clone(),
        };

        if self.jobs.send(Job::Load(request)).is_err() {
            warn!("Loader pool is gone, cannot load kernel");
            *self.shared.last_error.write() = Some("loader pool stopped".into());
            let fallback = if self.shared.kernel.read().is_some() {
                EngineStatus::Ready
            } else {
                EngineStatus::Uninitialized
            };
            self.shared.set_status(fallback);
        }
    }
}

/// Partitioned convolution as an [`AudioNode`]
///
/// Kernels are built on a [`LoaderPool`] and swapped in at the start of a
/// callback, so the audio thread never waits on a load. Until a kernel is
/// active, or after a DSP fault, audio passes through unchanged.
pub struct ConvolutionEngine {
    core: NodeCore,
    controller: Controller,
    active: Option<Box<PreparedConvolution>>,
    /// State that could not be handed back to the pool yet
    pending_retire: Option<Box<PreparedConvolution>>,
    /// The active kernel changed but handles have not been told yet
    publish_pending: bool,
    /// False after a DSP fault until the next configure
    engine_ready: bool,
    was_bypassed: bool,
}

impl ConvolutionEngine {
    pub fn new(pool: &LoaderPool, settings: ConvolverSettings) -> Self {
        let core = NodeCore::new();

        let node = core.handle();
        node.set_input_gain_db(settings.input_gain_db);
        node.set_output_gain_db(settings.output_gain_db);
        node.set_bypass(settings.bypass);

        let shared = Arc::new(EngineShared {
            generation: AtomicU64::new(0),
            status: AtomicU8::new(EngineStatus::Uninitialized.as_u8()),
            settings: RwLock::new(settings),
            sample_rate: AtomicU32::new(0),
            block_size: AtomicUsize::new(0),
            last_error: RwLock::new(None),
            kernel_info: RwLock::new(None),
            kernel: RwLock::new(None),
            mailbox: Mailbox::default(),
        });

        let controller = Controller {
            shared,
            jobs: pool.sender(),
            events: core.events_sender(),
        };

        Self {
            core,
            controller,
            active: None,
            pending_retire: None,
            publish_pending: false,
            engine_ready: true,
            was_bypassed: false,
        }
    }

    /// Control surface usable from any thread
    pub fn handle(&self) -> ConvolverHandle {
        ConvolverHandle {
            controller: self.controller.clone(),
            node: self.core.handle(),
        }
    }

    pub fn status(&self) -> EngineStatus {
        self.controller.shared.status()
    }

    /// Whether convolution is currently applied
    pub fn is_convolving(&self) -> bool {
        self.engine_ready && self.active.is_some()
    }

    /// Kernel lengths (left, right) of the active convolver
    pub fn active_channel_lengths(&self) -> Option<(usize, usize)> {
        self.active.as_ref().map(|state| state.convolver.channel_lengths())
    }

    fn shared(&self) -> &EngineShared {
        &self.controller.shared
    }

    /// Apply the newest finished load; runs on the audio thread
    ///
    /// Nothing new is taken while an earlier swap is still being published
    /// or its old state is still waiting for the pool, so at most one state
    /// is ever held back.
    fn poll_inbox(&mut self) {
        if !self.publish_active() || !self.flush_retired() {
            return;
        }

        let Some(outcome) = self.controller.shared.mailbox.try_take() else {
            return;
        };
        let current = self.shared().generation.load(Ordering::Acquire);

        match outcome {
            LoadOutcome::Ready(state) if state.generation != current => {
                self.pending_retire = Some(state);
            }
            LoadOutcome::Ready(state) => {
                let info = state.kernel.info();
                let latency = state.latency_seconds(self.core.sample_rate());

                self.pending_retire = self.active.replace(state);
                self.publish_pending = true;

                self.shared().set_status(EngineStatus::Ready);
                self.core.set_latency(latency);
                self.core.emit(NodeEvent::KernelLoaded(info));
            }
            LoadOutcome::Failed { generation } => {
                if generation == current {
                    let status = if self.active.is_some() {
                        EngineStatus::Ready
                    } else {
                        EngineStatus::Uninitialized
                    };
                    self.shared().set_status(status);
                }
            }
            LoadOutcome::Cleared { generation } => {
                if generation == current {
                    self.pending_retire = self.active.take();
                    self.publish_pending = self.pending_retire.is_some();
                    self.shared().set_status(EngineStatus::Uninitialized);
                    self.core.set_latency(0.0);
                }
            }
        }

        // The old state outlives the published kernel it backs
        if self.publish_active() {
            self.flush_retired();
        }
    }

    /// Show the active kernel to handles; false while a reader holds the locks
    fn publish_active(&mut self) -> bool {
        if !self.publish_pending {
            return true;
        }

        let shared = &self.controller.shared;
        let (Some(mut kernel), Some(mut info)) =
            (shared.kernel.try_write(), shared.kernel_info.try_write())
        else {
            return false;
        };

        *kernel = self.active.as_ref().map(|state| state.kernel.clone());
        *info = self.active.as_ref().map(|state| state.kernel.info());
        drop((kernel, info));

        self.publish_pending = false;
        true
    }

    /// Hand the held-back state to the pool; false if it is still waiting
    fn flush_retired(&mut self) -> bool {
        let Some(state) = self.pending_retire.take() else {
            return true;
        };

        match self.controller.jobs.try_send(Job::Retire(state)) {
            Ok(()) => true,
            Err(err) => {
                if let Job::Retire(state) = err.into_inner() {
                    // Retried on the next callback
                    self.pending_retire = Some(state);
                }
                false
            }
        }
    }
}

impl AudioNode for ConvolutionEngine {
    fn name(&self) -> &'static str {
        "convolver"
    }

    fn process_in_place(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.poll_inbox();

        let Self {
            core,
            active,
            engine_ready,
            was_bypassed,
            ..
        } = self;

        let mut fault = false;
        let resume = *was_bypassed;

        let bypassed = core.run(left, right, |l, r| {
            if !*engine_ready {
                return;
            }
            if let Some(state) = active.as_deref_mut() {
                if resume {
                    state.reset();
                }
                if state.process(l, r).is_err() {
                    fault = true;
                }
            }
        });

        *was_bypassed = bypassed;

        if fault {
            *engine_ready = false;
            core.emit(NodeEvent::ProcessingFault);
        }
    }

    fn configure(&mut self, sample_rate: u32, block_size: usize) -> Result<(), ConfigError> {
        let previous = (self.core.sample_rate(), self.core.block_size());
        self.core.configure(sample_rate, block_size)?;

        self.poll_inbox();

        let shared = self.shared();
        shared.sample_rate.store(sample_rate, Ordering::Release);
        shared.block_size.store(block_size, Ordering::Release);

        if let Some(state) = self.active.as_mut() {
            state.rebuild_for_host(block_size);
        }

        self.engine_ready = true;

        let latency = self
            .active
            .as_ref()
            .map_or(0.0, |state| state.latency_seconds(sample_rate));
        self.core.set_latency(latency);

        info!("Convolver configured: {} Hz, {} frames", sample_rate, block_size);

        let has_path = self.shared().settings.read().kernel_path.is_some();
        let waiting = self.active.is_none() && self.status() != EngineStatus::Loading;
        if has_path && (previous != (sample_rate, block_size) || waiting) {
            self.controller.request_reload();
        }

        Ok(())
    }

    fn latency_seconds(&self) -> f32 {
        self.core.latency_seconds()
    }

    fn set_bypass(&self, bypass: bool) {
        self.core.set_bypass(bypass);
    }
}

/// Cloneable control surface of a [`ConvolutionEngine`]
#[derive(Clone)]
pub struct ConvolverHandle {
    controller: Controller,
    node: NodeHandle,
}

impl ConvolverHandle {
    /// Gain, bypass, latency, and events of the engine node
    pub fn node(&self) -> &NodeHandle {
        &self.node
    }

    pub fn status(&self) -> EngineStatus {
        self.controller.shared.status()
    }

    pub fn last_error(&self) -> Option<String> {
        self.controller.shared.last_error.read().clone()
    }

    pub fn kernel_info(&self) -> Option<KernelInfo> {
        *self.controller.shared.kernel_info.read()
    }

    /// The kernel currently swapped in
    pub fn kernel(&self) -> Option<Arc<Kernel>> {
        self.controller.shared.kernel.read().clone()
    }

    pub fn settings(&self) -> ConvolverSettings {
        self.controller.shared.settings.read().clone()
    }

    /// Select a kernel file, or `None` for pass-through
    pub fn set_kernel_path(&self, path: Option<PathBuf>) {
        self.controller.shared.settings.write().kernel_path = path;
        self.controller.request_reload();
    }

    pub fn set_ir_width(&self, width_percent: u32) {
        let width = width_percent.min(KernelPreprocessor::MAX_WIDTH);
        let changed = {
            let mut settings = self.controller.shared.settings.write();
            let changed = settings.ir_width != width;
            settings.ir_width = width;
            changed
        };
        if changed {
            self.controller.request_reload();
        }
    }

    pub fn set_autogain(&self, autogain: AutoGain) {
        let changed = {
            let mut settings = self.controller.shared.settings.write();
            let changed = settings.autogain != autogain;
            settings.autogain = autogain;
            changed
        };
        if changed {
            self.controller.request_reload();
        }
    }

    /// Apply a full settings snapshot, reloading only if the kernel changes
    pub fn apply_settings(&self, settings: &ConvolverSettings) {
        self.node.set_input_gain_db(settings.input_gain_db);
        self.node.set_output_gain_db(settings.output_gain_db);
        self.node.set_bypass(settings.bypass);

        let reload = {
            let mut current = self.controller.shared.settings.write();
            let reload = settings.needs_reload(&current);
            *current = settings.clone();
            reload
        };
        if reload {
            self.controller.request_reload();
        }
    }

    /// Rebuild the kernel from the current file and settings
    pub fn reload(&self) {
        self.controller.request_reload();
    }
}
