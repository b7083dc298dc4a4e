//! The real-time node contract shared by every effect
//!
//! A node exchanges fixed-size planar stereo buffers with the host once per
//! callback. [`NodeCore`] carries the parts every node has in common:
//!
//! ```text
//! input → input gain → [meter in] → DSP → output gain → [meter out] → output
//! ```
//!
//! Controls are atomics so they can be changed from any thread through a
//! [`NodeHandle`] while the audio thread keeps running. Levels and latency
//! are reported as [`NodeEvent`]s over a bounded channel; when the consumer
//! falls behind, events are dropped rather than blocking the audio thread.

use crossbeam_channel::{bounded, Receiver, Sender};
use irfx_analysis::{db_to_linear, linear_to_db, peak_abs};
use irfx_library::KernelInfo;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Time between level reports, in seconds of processed audio
pub const METERING_INTERVAL: f32 = 1.0 / 20.0;

/// Capacity of the node event queue
const EVENT_CAPACITY: usize = 64;

/// Invalid operating point passed to `configure`
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error("Block size must be greater than zero")]
    InvalidBlockSize,
}

impl ConfigError {
    /// Reject a zero sample rate or block size
    pub fn check(sample_rate: u32, block_size: usize) -> Result<(), ConfigError> {
        if sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate);
        }
        if block_size == 0 {
            return Err(ConfigError::InvalidBlockSize);
        }
        Ok(())
    }
}

/// Peak levels over one metering interval (linear)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LevelSnapshot {
    pub input_peak_left: f32,
    pub input_peak_right: f32,
    pub output_peak_left: f32,
    pub output_peak_right: f32,
}

impl LevelSnapshot {
    /// Input peaks in dBFS (left, right)
    pub fn input_db(&self) -> (f32, f32) {
        (
            linear_to_db(self.input_peak_left),
            linear_to_db(self.input_peak_right),
        )
    }

    /// Output peaks in dBFS (left, right)
    pub fn output_db(&self) -> (f32, f32) {
        (
            linear_to_db(self.output_peak_left),
            linear_to_db(self.output_peak_right),
        )
    }
}

/// Notifications sent from a node to UI code
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// Throttled level report
    Levels(LevelSnapshot),
    /// Latency changed (seconds)
    Latency(f32),
    /// A new kernel became active
    KernelLoaded(KernelInfo),
    /// Loading a kernel failed
    LoadFailed(String),
    /// The DSP failed; the node passes audio through until reconfigured
    ProcessingFault,
}

/// Real-time processing contract implemented by every effect
pub trait AudioNode: Send {
    fn name(&self) -> &'static str;

    /// Process one host callback from separate input and output buffers
    ///
    /// Input is copied to the output, which is then processed in place.
    fn process(
        &mut self,
        left_in: &[f32],
        right_in: &[f32],
        left_out: &mut [f32],
        right_out: &mut [f32],
    ) {
        let n = left_in
            .len()
            .min(right_in.len())
            .min(left_out.len())
            .min(right_out.len());

        left_out[..n].copy_from_slice(&left_in[..n]);
        right_out[..n].copy_from_slice(&right_in[..n]);
        self.process_in_place(&mut left_out[..n], &mut right_out[..n]);
    }

    /// Process one host callback in place
    ///
    /// Runs on the audio thread: no allocation, no blocking, no panics.
    fn process_in_place(&mut self, left: &mut [f32], right: &mut [f32]);

    /// Adapt to a new sample rate or callback size
    ///
    /// Called while the host is not processing. On error the node keeps
    /// its previous operating point.
    fn configure(&mut self, sample_rate: u32, block_size: usize) -> Result<(), ConfigError>;

    /// Processing delay introduced by the node
    fn latency_seconds(&self) -> f32;

    fn set_bypass(&self, bypass: bool);
}

/// `f32` stored as bits in an `AtomicU32`
#[derive(Debug)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Store `value`, returning true if it differs from the previous one
    fn swap(&self, value: f32) -> bool {
        self.0.swap(value.to_bits(), Ordering::Relaxed) != value.to_bits()
    }
}

/// Controls shared between a node and its handles
#[derive(Debug)]
struct NodeShared {
    bypass: AtomicBool,
    input_gain: AtomicF32,
    output_gain: AtomicF32,
    latency: AtomicF32,
}

/// Gain staging, bypass, metering, and latency bookkeeping for a node
pub struct NodeCore {
    shared: Arc<NodeShared>,
    events_tx: Sender<NodeEvent>,
    events_rx: Receiver<NodeEvent>,
    sample_rate: u32,
    block_size: usize,
    /// Running peaks since the last report
    peaks: LevelSnapshot,
    /// Samples processed since the last report
    notification_dt: usize,
    notification_interval: usize,
}

impl Default for NodeCore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeCore {
    pub fn new() -> Self {
        let (events_tx, events_rx) = bounded(EVENT_CAPACITY);

        Self {
            shared: Arc::new(NodeShared {
                bypass: AtomicBool::new(false),
                input_gain: AtomicF32::new(1.0),
                output_gain: AtomicF32::new(1.0),
                latency: AtomicF32::new(0.0),
            }),
            events_tx,
            events_rx,
            sample_rate: 0,
            block_size: 0,
            peaks: LevelSnapshot::default(),
            notification_dt: 0,
            notification_interval: usize::MAX,
        }
    }

    /// Thread-safe control surface for this node
    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            shared: self.shared.clone(),
            events: self.events_rx.clone(),
        }
    }

    /// Sender for events produced off the audio thread
    pub fn events_sender(&self) -> Sender<NodeEvent> {
        self.events_tx.clone()
    }

    /// Validate and store a new operating point
    pub fn configure(&mut self, sample_rate: u32, block_size: usize) -> Result<(), ConfigError> {
        ConfigError::check(sample_rate, block_size)?;

        self.sample_rate = sample_rate;
        self.block_size = block_size;
        self.notification_interval =
            ((sample_rate as f32 * METERING_INTERVAL).round() as usize).max(1);
        self.notification_dt = 0;
        self.peaks = LevelSnapshot::default();

        Ok(())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn is_bypassed(&self) -> bool {
        self.shared.bypass.load(Ordering::Acquire)
    }

    pub fn set_bypass(&self, bypass: bool) {
        self.shared.bypass.store(bypass, Ordering::Release);
    }

    pub fn latency_seconds(&self) -> f32 {
        self.shared.latency.load()
    }

    /// Publish a new latency, notifying listeners when it changed
    pub fn set_latency(&self, seconds: f32) {
        if self.shared.latency.swap(seconds) {
            self.emit(NodeEvent::Latency(seconds));
        }
    }

    /// Queue an event, dropping it if the queue is full
    pub fn emit(&self, event: NodeEvent) {
        let _ = self.events_tx.try_send(event);
    }

    /// Run one callback through gain staging and metering
    ///
    /// Bypass is read once. When bypassed, neither gain nor `dsp` is
    /// applied. Returns the bypass state used for this callback.
    pub fn run(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
        dsp: impl FnOnce(&mut [f32], &mut [f32]),
    ) -> bool {
        let n = left.len().min(right.len());
        let (left, right) = (&mut left[..n], &mut right[..n]);

        let bypass = self.is_bypassed();

        if bypass {
            self.meter_input(left, right);
            self.meter_output(left, right);
        } else {
            let input_gain = self.shared.input_gain.load();
            apply_gain(left, input_gain);
            apply_gain(right, input_gain);
            self.meter_input(left, right);

            dsp(left, right);

            let output_gain = self.shared.output_gain.load();
            apply_gain(left, output_gain);
            apply_gain(right, output_gain);
            self.meter_output(left, right);
        }

        self.notification_dt += n;
        if self.notification_dt >= self.notification_interval {
            self.emit(NodeEvent::Levels(self.peaks));
            self.peaks = LevelSnapshot::default();
            self.notification_dt = 0;
        }

        bypass
    }

    fn meter_input(&mut self, left: &[f32], right: &[f32]) {
        self.peaks.input_peak_left = self.peaks.input_peak_left.max(peak_abs(left));
        self.peaks.input_peak_right = self.peaks.input_peak_right.max(peak_abs(right));
    }

    fn meter_output(&mut self, left: &[f32], right: &[f32]) {
        self.peaks.output_peak_left = self.peaks.output_peak_left.max(peak_abs(left));
        self.peaks.output_peak_right = self.peaks.output_peak_right.max(peak_abs(right));
    }
}

#[inline]
fn apply_gain(samples: &mut [f32], gain: f32) {
    if gain != 1.0 {
        for s in samples {
            *s *= gain;
        }
    }
}

/// Cloneable, thread-safe view of a node
///
/// All handles share one event queue, so each event reaches one receiver.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    shared: Arc<NodeShared>,
    events: Receiver<NodeEvent>,
}

impl NodeHandle {
    pub fn set_bypass(&self, bypass: bool) {
        self.shared.bypass.store(bypass, Ordering::Release);
    }

    pub fn is_bypassed(&self) -> bool {
        self.shared.bypass.load(Ordering::Acquire)
    }

    /// Set the input gain (linear); non-finite values are ignored
    pub fn set_input_gain(&self, gain: f32) {
        if let Some(gain) = sanitize_gain(gain) {
            self.shared.input_gain.swap(gain);
        }
    }

    /// Set the output gain (linear); non-finite values are ignored
    pub fn set_output_gain(&self, gain: f32) {
        if let Some(gain) = sanitize_gain(gain) {
            self.shared.output_gain.swap(gain);
        }
    }

    pub fn set_input_gain_db(&self, db: f32) {
        self.set_input_gain(db_to_linear(db));
    }

    pub fn set_output_gain_db(&self, db: f32) {
        self.set_output_gain(db_to_linear(db));
    }

    pub fn input_gain(&self) -> f32 {
        self.shared.input_gain.load()
    }

    pub fn output_gain(&self) -> f32 {
        self.shared.output_gain.load()
    }

    pub fn latency_seconds(&self) -> f32 {
        self.shared.latency.load()
    }

    pub fn events(&self) -> &Receiver<NodeEvent> {
        &self.events
    }
}

fn sanitize_gain(gain: f32) -> Option<f32> {
    gain.is_finite().then(|| gain.max(0.0))
}
