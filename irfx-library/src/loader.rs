//! Impulse response decoding and the kernel build pipeline

use crate::kernel::{Kernel, KernelError};
use crate::preprocess::KernelPreprocessor;
use crate::resampler::{ResampleError, ResamplerAdapter};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur while loading an impulse response
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No audio track found in file")]
    NoAudioTrack,
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Unsupported channel count {0} (expected 1, 2 or 4)")]
    UnsupportedChannels(usize),
    #[error("Impulse response has no frames")]
    Empty,
    #[error("Impulse response contains NaN or infinite values")]
    InvalidSamples,
    #[error("Resampling failed: {0}")]
    Resample(#[from] ResampleError),
    #[error("Invalid kernel: {0}")]
    Kernel(#[from] KernelError),
    #[error("Load was superseded by a newer request")]
    Cancelled,
}

/// A decoded impulse response at its native rate, planar
#[derive(Debug, Clone)]
pub struct DecodedKernel {
    /// One buffer per channel, all the same length
    pub channels: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub rate: u32,
}

impl DecodedKernel {
    /// Frames per channel
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Fold the channel layout into a stereo pair
    ///
    /// - 1 channel: duplicated to both sides
    /// - 2 channels: used as-is
    /// - 4 channels (true stereo, LL LR RL RR): each output side sums the
    ///   paths that reach it, `L = (LL + RL) / 2`, `R = (LR + RR) / 2`
    pub fn into_stereo(self) -> Result<(Vec<f32>, Vec<f32>), LoadError> {
        if self.frames() == 0 {
            return Err(LoadError::Empty);
        }

        let mut channels = self.channels;

        match channels.len() {
            1 => {
                let mono = channels.remove(0);
                Ok((mono.clone(), mono))
            }
            2 => {
                let right = channels.remove(1);
                let left = channels.remove(0);
                Ok((left, right))
            }
            4 => {
                let left = channels[0]
                    .iter()
                    .zip(&channels[2])
                    .map(|(ll, rl)| (ll + rl) * 0.5)
                    .collect();
                let right = channels[1]
                    .iter()
                    .zip(&channels[3])
                    .map(|(lr, rr)| (lr + rr) * 0.5)
                    .collect();
                Ok((left, right))
            }
            n => Err(LoadError::UnsupportedChannels(n)),
        }
    }
}

/// Impulse response file decoder using Symphonia
#[derive(Debug, Default, Clone, Copy)]
pub struct IrLoader;

impl IrLoader {
    /// Decode a sound file into planar samples at its native rate
    pub fn decode(path: &Path) -> Result<DecodedKernel, LoadError> {
        let file = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // .irs files are plain WAV; other extensions help the probe
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if ext.eq_ignore_ascii_case(crate::directory::IRS_EXTENSION) {
                hint.with_extension("wav");
            } else {
                hint.with_extension(ext);
            }
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| LoadError::Decode(e.to_string()))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(LoadError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let rate = codec_params
            .sample_rate
            .ok_or_else(|| LoadError::Decode("missing sample rate".into()))?;
        let mut channel_count = codec_params.channels.map(|c| c.count()).unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| LoadError::Decode(e.to_string()))?;

        let mut interleaved: Vec<f32> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(LoadError::Decode(e.to_string())),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = decoder
                .decode(&packet)
                .map_err(|e| LoadError::Decode(e.to_string()))?;

            let spec = *decoded.spec();
            channel_count = spec.channels.count();

            let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            interleaved.extend_from_slice(sample_buf.samples());
        }

        if channel_count == 0 || interleaved.is_empty() {
            return Err(LoadError::Empty);
        }

        let frames = interleaved.len() / channel_count;
        let channels: Vec<Vec<f32>> = (0..channel_count)
            .map(|ch| {
                (0..frames)
                    .map(|f| interleaved[f * channel_count + ch])
                    .collect()
            })
            .collect();

        debug!(
            "Decoded {}: {} channels, {} frames at {} Hz",
            path.display(),
            channel_count,
            frames,
            rate
        );

        Ok(DecodedKernel { channels, rate })
    }
}

/// Full load pipeline: decode, fold to stereo, resample, preprocess
///
/// `cancelled` is polled between stages; when it returns true the build
/// stops with [`LoadError::Cancelled`].
pub fn build_kernel(
    path: &Path,
    target_rate: u32,
    preprocessor: &KernelPreprocessor,
    cancelled: impl Fn() -> bool,
) -> Result<Kernel, LoadError> {
    let decoded = IrLoader::decode(path)?;
    let native_rate = decoded.rate;

    if cancelled() {
        return Err(LoadError::Cancelled);
    }

    let (mut left, mut right) = decoded.into_stereo()?;

    if left.iter().chain(right.iter()).any(|s| !s.is_finite()) {
        return Err(LoadError::InvalidSamples);
    }

    if native_rate != target_rate {
        info!(
            "Resampling impulse response from {} Hz to {} Hz",
            native_rate, target_rate
        );
        left = ResamplerAdapter::resample(native_rate, target_rate, &left)?;
        if cancelled() {
            return Err(LoadError::Cancelled);
        }
        right = ResamplerAdapter::resample(native_rate, target_rate, &right)?;
    }

    if cancelled() {
        return Err(LoadError::Cancelled);
    }

    preprocessor.process(&mut left, &mut right);

    let kernel = Kernel::with_details(
        left,
        right,
        target_rate,
        native_rate,
        preprocessor.width_percent(),
    )?;

    Ok(kernel)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::preprocess::AutoGain;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FILE_COUNTER: AtomicUsize = AtomicUsize::new(0);

    /// Write a float WAV with the given planar channels into the temp dir
    pub(crate) fn write_wav(channels: &[Vec<f32>], rate: u32) -> PathBuf {
        let id = FILE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "irfx-library-test-{}-{}.wav",
            std::process::id(),
            id
        ));

        let spec = hound::WavSpec {
            channels: channels.len() as u16,
            sample_rate: rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for f in 0..channels[0].len() {
            for ch in channels {
                writer.write_sample(ch[f]).unwrap();
            }
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn test_mono_duplicates_to_stereo() {
        let decoded = DecodedKernel {
            channels: vec![vec![1.0, 0.5]],
            rate: 48000,
        };
        let (l, r) = decoded.into_stereo().unwrap();
        assert_eq!(l, vec![1.0, 0.5]);
        assert_eq!(r, l);
    }

    #[test]
    fn test_true_stereo_folds() {
        let decoded = DecodedKernel {
            channels: vec![vec![1.0], vec![0.2], vec![0.4], vec![0.8]],
            rate: 48000,
        };
        let (l, r) = decoded.into_stereo().unwrap();
        assert!((l[0] - 0.7).abs() < 1e-6);
        assert!((r[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_unsupported_layout_rejected() {
        let decoded = DecodedKernel {
            channels: vec![vec![1.0]; 3],
            rate: 48000,
        };
        assert!(matches!(
            decoded.into_stereo(),
            Err(LoadError::UnsupportedChannels(3))
        ));

        let empty = DecodedKernel {
            channels: vec![vec![], vec![]],
            rate: 48000,
        };
        assert!(matches!(empty.into_stereo(), Err(LoadError::Empty)));
    }

    #[test]
    fn test_decode_stereo_wav() {
        let path = write_wav(&[vec![0.5, 0.25, 0.0], vec![0.1, 0.2, 0.3]], 44100);
        let decoded = IrLoader::decode(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(decoded.rate, 44100);
        assert_eq!(decoded.channels.len(), 2);
        assert_eq!(decoded.frames(), 3);
        assert!((decoded.channels[1][2] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = IrLoader::decode(Path::new("/nonexistent/irfx/kernel.irs"));
        assert!(matches!(result, Err(LoadError::Io(_))));
    }

    #[test]
    fn test_build_kernel_normalizes() {
        let path = write_wav(&[vec![0.25, 0.0, 0.0, 0.0], vec![0.25, 0.0, 0.0, 0.0]], 48000);
        let preprocessor = KernelPreprocessor::new(AutoGain::Peak, 100);
        let kernel = build_kernel(&path, 48000, &preprocessor, || false).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(kernel.len(), 4);
        assert!((kernel.left()[0] - 1.0).abs() < 1e-6);
        assert_eq!(kernel.native_rate(), 48000);
    }

    #[test]
    fn test_build_kernel_resamples() {
        let impulse: Vec<f32> = (0..4410).map(|i| if i == 0 { 1.0 } else { 0.0 }).collect();
        let path = write_wav(&[impulse.clone(), impulse], 44100);
        let kernel = build_kernel(&path, 48000, &KernelPreprocessor::default(), || false).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(kernel.len(), 4800);
        assert_eq!(kernel.rate(), 48000);
        assert_eq!(kernel.native_rate(), 44100);
    }

    #[test]
    fn test_build_kernel_cancelled() {
        let path = write_wav(&[vec![1.0, 0.0]], 48000);
        let result = build_kernel(&path, 48000, &KernelPreprocessor::default(), || true);
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(LoadError::Cancelled)));
    }
}
