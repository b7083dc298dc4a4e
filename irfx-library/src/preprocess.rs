//! Kernel preprocessing: auto-gain normalization and stereo width
//!
//! Signal flow:
//! ```text
//! decoded L/R → auto-gain (peak | rms) → mid/side width → operational kernel
//! ```
//! Width runs after auto-gain so the normalized level is the reference
//! for any width change.

use irfx_analysis::peak_abs;
use tracing::debug;

/// Peaks at or below this are treated as silence and left untouched
const SILENCE_THRESHOLD: f32 = 1e-6;

/// Auto-gain normalization policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoGain {
    /// Leave the kernel level as recorded
    Off,
    /// Scale so the combined peak of both channels lands on the target
    #[default]
    Peak,
    /// Peak normalization followed by an energy cap so dense kernels
    /// cannot raise the output power above the input power
    Rms,
}

impl AutoGain {
    /// Config file representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoGain::Off => "off",
            AutoGain::Peak => "peak",
            AutoGain::Rms => "rms",
        }
    }

    /// Parse the config file representation (case-insensitive)
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "false" => Some(AutoGain::Off),
            "peak" | "true" => Some(AutoGain::Peak),
            "rms" => Some(AutoGain::Rms),
            _ => None,
        }
    }
}

/// Turns a decoded stereo pair into the operational kernel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelPreprocessor {
    autogain: AutoGain,
    /// Peak level targeted by auto-gain (linear)
    target: f32,
    /// Stereo width in percent (0 - 200, 100 = unchanged)
    width_percent: u32,
}

impl Default for KernelPreprocessor {
    fn default() -> Self {
        Self::new(AutoGain::default(), 100)
    }
}

impl KernelPreprocessor {
    pub const MAX_WIDTH: u32 = 200;

    pub fn new(autogain: AutoGain, width_percent: u32) -> Self {
        Self {
            autogain,
            target: 1.0,
            width_percent: width_percent.min(Self::MAX_WIDTH),
        }
    }

    /// Set the auto-gain peak target (linear, clamped to 0.0 - 1.0)
    pub fn with_target(mut self, target: f32) -> Self {
        self.target = target.clamp(0.0, 1.0);
        self
    }

    pub fn autogain(&self) -> AutoGain {
        self.autogain
    }

    pub fn width_percent(&self) -> u32 {
        self.width_percent
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// Apply auto-gain then width in place; returns the auto-gain factor
    pub fn process(&self, left: &mut [f32], right: &mut [f32]) -> f32 {
        let gain = self.apply_autogain(left, right);
        self.apply_width(left, right);
        gain
    }

    /// Normalize according to the auto-gain policy; returns the factor used
    pub fn apply_autogain(&self, left: &mut [f32], right: &mut [f32]) -> f32 {
        if self.autogain == AutoGain::Off {
            return 1.0;
        }

        let peak = peak_abs(left).max(peak_abs(right));
        if peak <= SILENCE_THRESHOLD {
            debug!("Kernel is silent, skipping auto-gain");
            return 1.0;
        }

        let mut gain = self.target / peak;

        if self.autogain == AutoGain::Rms {
            // Energy of the peak-normalized channels
            let energy = |ch: &[f32]| ch.iter().map(|s| (s * gain) * (s * gain)).sum::<f32>();
            let power = energy(left).max(energy(right));
            if power > 0.0 {
                gain *= (1.0 / power.sqrt()).min(1.0);
            }
        }

        debug!("Kernel auto-gain factor: {}", gain);

        scale(left, gain);
        scale(right, gain);

        gain
    }

    /// Mid/side width: side is scaled by `width_percent / 100`
    pub fn apply_width(&self, left: &mut [f32], right: &mut [f32]) {
        if self.width_percent == 100 {
            return;
        }

        let w = self.width_percent as f32 * 0.01;

        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let mid = (*l + *r) * 0.5;
            let side = (*l - *r) * 0.5 * w;
            *l = mid + side;
            *r = mid - side;
        }
    }
}

#[inline]
fn scale(samples: &mut [f32], gain: f32) {
    for s in samples {
        *s *= gain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pair() -> (Vec<f32>, Vec<f32>) {
        (
            vec![0.25, -0.1, 0.05, 0.0, 0.02],
            vec![0.1, 0.2, -0.15, 0.05, 0.0],
        )
    }

    #[test]
    fn test_peak_autogain_reaches_unity() {
        let (mut l, mut r) = sample_pair();
        let gain = KernelPreprocessor::new(AutoGain::Peak, 100).process(&mut l, &mut r);

        assert!((gain - 4.0).abs() < 1e-5);
        let peak = peak_abs(&l).max(peak_abs(&r));
        assert!((peak - 1.0).abs() < 1e-6, "Peak after auto-gain: {}", peak);
    }

    #[test]
    fn test_peak_autogain_custom_target() {
        let (mut l, mut r) = sample_pair();
        KernelPreprocessor::new(AutoGain::Peak, 100)
            .with_target(0.5)
            .process(&mut l, &mut r);
        assert!((peak_abs(&l).max(peak_abs(&r)) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rms_autogain_caps_energy() {
        let mut l = vec![0.5; 64];
        let mut r = vec![0.5; 64];
        KernelPreprocessor::new(AutoGain::Rms, 100).process(&mut l, &mut r);

        let energy: f32 = l.iter().map(|s| s * s).sum();
        assert!((energy - 1.0).abs() < 1e-4, "Energy after rms auto-gain: {}", energy);
    }

    #[test]
    fn test_rms_autogain_keeps_sparse_kernel_at_unity_peak() {
        let mut l = vec![0.25, 0.0, 0.0, 0.0];
        let mut r = vec![0.25, 0.0, 0.0, 0.0];
        KernelPreprocessor::new(AutoGain::Rms, 100).process(&mut l, &mut r);
        assert!((l[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_autogain_off_and_silence() {
        let (mut l, mut r) = sample_pair();
        let original = l.clone();
        assert_eq!(KernelPreprocessor::new(AutoGain::Off, 100).process(&mut l, &mut r), 1.0);
        assert_eq!(l, original);

        let mut silent_l = vec![0.0; 8];
        let mut silent_r = vec![0.0; 8];
        let gain = KernelPreprocessor::default().process(&mut silent_l, &mut silent_r);
        assert_eq!(gain, 1.0);
    }

    #[test]
    fn test_width_100_is_noop() {
        let (mut l, mut r) = sample_pair();
        let (orig_l, orig_r) = (l.clone(), r.clone());
        KernelPreprocessor::new(AutoGain::Off, 100).apply_width(&mut l, &mut r);
        assert_eq!(l, orig_l);
        assert_eq!(r, orig_r);
    }

    #[test]
    fn test_width_0_collapses_to_mid() {
        let (mut l, mut r) = sample_pair();
        let mids: Vec<f32> = l.iter().zip(&r).map(|(a, b)| (a + b) * 0.5).collect();
        KernelPreprocessor::new(AutoGain::Off, 0).apply_width(&mut l, &mut r);

        for i in 0..l.len() {
            assert!((l[i] - mids[i]).abs() < 1e-7);
            assert!((r[i] - mids[i]).abs() < 1e-7);
        }
    }

    #[test]
    fn test_width_200_doubles_side() {
        let mut l = vec![1.0];
        let mut r = vec![0.0];
        KernelPreprocessor::new(AutoGain::Off, 200).apply_width(&mut l, &mut r);
        // mid 0.5, side 0.5 * 2 = 1.0
        assert!((l[0] - 1.5).abs() < 1e-7);
        assert!((r[0] + 0.5).abs() < 1e-7);
    }

    #[test]
    fn test_width_is_clamped() {
        assert_eq!(KernelPreprocessor::new(AutoGain::Peak, 500).width_percent(), 200);
    }

    #[test]
    fn test_autogain_parse() {
        assert_eq!(AutoGain::parse("RMS"), Some(AutoGain::Rms));
        assert_eq!(AutoGain::parse(" peak "), Some(AutoGain::Peak));
        assert_eq!(AutoGain::parse("loud"), None);
        assert_eq!(AutoGain::parse(AutoGain::Off.as_str()), Some(AutoGain::Off));
    }
}
