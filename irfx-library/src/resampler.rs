//! Mono sample-rate conversion for impulse responses
//!
//! Wraps rubato's FFT resampler in a streaming interface that accepts
//! input of any length and compensates the resampler's group delay.

use rubato::{FftFixedInOut, Resampler};
use thiserror::Error;
use tracing::debug;

/// Input frames per resampler chunk
const CHUNK_SIZE: usize = 1024;

/// Errors from sample-rate conversion
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResampleError {
    #[error("Invalid sample rates: {input} Hz -> {output} Hz")]
    InvalidRate { input: u32, output: u32 },
    #[error("Resampler setup failed: {0}")]
    Construction(String),
    #[error("Resampling failed: {0}")]
    Process(String),
}

/// Streaming mono resampler between two fixed rates
pub struct ResamplerAdapter {
    resampler: FftFixedInOut<f32>,
    input_rate: u32,
    output_rate: u32,
    /// Input that does not yet fill a whole chunk
    pending: Vec<f32>,
    /// Leading output frames still to drop (resampler delay)
    skip: usize,
}

impl ResamplerAdapter {
    /// Create a resampler from `input_rate` to `output_rate`
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self, ResampleError> {
        if input_rate == 0 || output_rate == 0 {
            return Err(ResampleError::InvalidRate {
                input: input_rate,
                output: output_rate,
            });
        }

        let resampler =
            FftFixedInOut::<f32>::new(input_rate as usize, output_rate as usize, CHUNK_SIZE, 1)
                .map_err(|e| ResampleError::Construction(e.to_string()))?;

        let skip = resampler.output_delay();

        Ok(Self {
            resampler,
            input_rate,
            output_rate,
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
            skip,
        })
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Push input samples and return whatever output is available
    ///
    /// Samples that do not fill a whole chunk are kept for the next call.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, ResampleError> {
        self.pending.extend_from_slice(input);

        let mut output = Vec::new();

        loop {
            let chunk = self.resampler.input_frames_next();
            if self.pending.len() < chunk {
                break;
            }

            let input = [&self.pending[..chunk]];
            let resampled = self
                .resampler
                .process(&input[..], None)
                .map_err(|e| ResampleError::Process(e.to_string()))?;

            self.pending.drain(..chunk);

            if let Some(channel) = resampled.into_iter().next() {
                let drop = self.skip.min(channel.len());
                self.skip -= drop;
                output.extend_from_slice(&channel[drop..]);
            }
        }

        Ok(output)
    }

    /// Resample a whole signal, returning `round(len * out / in)` samples
    pub fn resample(
        input_rate: u32,
        output_rate: u32,
        samples: &[f32],
    ) -> Result<Vec<f32>, ResampleError> {
        if input_rate == output_rate {
            return Ok(samples.to_vec());
        }

        let mut adapter = Self::new(input_rate, output_rate)?;

        let expected = ((samples.len() as u64 * output_rate as u64 + input_rate as u64 / 2)
            / input_rate as u64) as usize;

        let mut output = adapter.process(samples)?;

        // Flush the tail and the resampler delay with silence
        let silence = vec![0.0f32; CHUNK_SIZE];
        while output.len() < expected {
            let more = adapter.process(&silence)?;
            output.extend_from_slice(&more);
        }

        output.truncate(expected);

        debug!(
            "Resampled {} samples at {} Hz to {} samples at {} Hz",
            samples.len(),
            input_rate,
            output.len(),
            output_rate
        );

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_invalid_rate_rejected() {
        assert!(matches!(
            ResamplerAdapter::new(0, 48000),
            Err(ResampleError::InvalidRate { .. })
        ));
    }

    #[test]
    fn test_same_rate_is_copy() {
        let input = vec![0.1, 0.2, 0.3];
        let out = ResamplerAdapter::resample(48000, 48000, &input).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_upsample_doubles_length() {
        let input: Vec<f32> = (0..4800)
            .map(|i| (2.0 * PI * 100.0 * i as f32 / 48000.0).sin())
            .collect();

        let out = ResamplerAdapter::resample(48000, 96000, &input).unwrap();
        assert_eq!(out.len(), 9600);

        // A 100 Hz sine survives with its phase aligned after delay compensation
        for i in (2000..7000).step_by(250) {
            let expected = (2.0 * PI * 100.0 * i as f32 / 96000.0).sin();
            assert!(
                (out[i] - expected).abs() < 0.1,
                "Sample {} differs: {} vs {}",
                i,
                out[i],
                expected
            );
        }
    }

    #[test]
    fn test_downsample_length() {
        let input = vec![0.0f32; 44100];
        let out = ResamplerAdapter::resample(44100, 48000, &input).unwrap();
        assert_eq!(out.len(), 48000);
    }

    #[test]
    fn test_streaming_keeps_partial_chunks() {
        let mut adapter = ResamplerAdapter::new(48000, 96000).unwrap();
        let out = adapter.process(&[0.0; 10]).unwrap();
        assert!(out.is_empty());
        assert_eq!(adapter.pending.len(), 10);
    }
}
