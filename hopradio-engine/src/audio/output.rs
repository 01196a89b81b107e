//! Audio device output via cpal.
//!
//! The engine renders internally as interleaved stereo f32; this module
//! maps that onto whatever the device actually offers (rate, channel
//! count, f32 or i16 samples).

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
}

impl AudioOutput {
    /// Open an output device, preferring `preferred_rate` stereo f32.
    ///
    /// A named device that cannot be found falls back to the system
    /// default rather than failing playback outright.
    pub fn open(device_name: Option<&str>, preferred_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => {
                let mut devices = host.output_devices().map_err(|e| {
                    Error::AudioOutput(format!("failed to enumerate devices: {e}"))
                })?;
                match devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                    Some(dev) => dev,
                    None => {
                        warn!(name, "requested audio device not found, using default");
                        host.default_output_device().ok_or_else(|| {
                            Error::AudioOutput("no default output device".to_string())
                        })?
                    }
                }
            }
            None => host
                .default_output_device()
                .ok_or_else(|| Error::AudioOutput("no default output device".to_string()))?,
        };
        info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            "audio device opened"
        );

        let (config, sample_format) = Self::pick_config(&device, preferred_rate)?;
        debug!(
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            format = ?sample_format,
            "audio output configured"
        );

        Ok(Self {
            device,
            config,
            sample_format,
            stream: None,
        })
    }

    /// Prefer a stereo f32 config that can run at `preferred_rate`
    /// (avoiding resampling); otherwise take the device default.
    fn pick_config(device: &Device, preferred_rate: u32) -> Result<(StreamConfig, SampleFormat)> {
        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("failed to get device configs: {e}")))?
            .find(|c| {
                c.channels() == 2
                    && c.sample_format() == SampleFormat::F32
                    && c.min_sample_rate().0 <= preferred_rate
                    && c.max_sample_rate().0 >= preferred_rate
            });

        if let Some(supported) = supported {
            let format = supported.sample_format();
            let config = supported
                .with_sample_rate(cpal::SampleRate(preferred_rate))
                .config();
            return Ok((config, format));
        }

        let default = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("failed to get default config: {e}")))?;
        Ok((default.config(), default.sample_format()))
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    /// Start the stream. `fill` is called on the audio thread with an
    /// interleaved stereo f32 buffer it must fully overwrite; channel
    /// mapping to the device layout happens here.
    pub fn start<F>(&mut self, mut fill: F) -> Result<()>
    where
        F: FnMut(&mut [f32]) + Send + 'static,
    {
        let channels = self.config.channels as usize;
        let err_fn = |e| warn!(error = %e, "audio stream error");

        let stream = match self.sample_format {
            SampleFormat::F32 => {
                let mut scratch: Vec<f32> = Vec::new();
                self.device
                    .build_output_stream(
                        &self.config,
                        move |data: &mut [f32], _| {
                            render_stereo(&mut fill, &mut scratch, data.len() / channels);
                            map_channels(&scratch, data, channels);
                        },
                        err_fn,
                        None,
                    )
                    .map_err(|e| Error::AudioOutput(format!("failed to build stream: {e}")))?
            }
            SampleFormat::I16 => {
                let mut scratch: Vec<f32> = Vec::new();
                self.device
                    .build_output_stream(
                        &self.config,
                        move |data: &mut [i16], _| {
                            let frames = data.len() / channels;
                            render_stereo(&mut fill, &mut scratch, frames);
                            let mut float = vec![0.0f32; data.len()];
                            map_channels(&scratch, &mut float, channels);
                            for (out, s) in data.iter_mut().zip(&float) {
                                *out = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                            }
                        },
                        err_fn,
                        None,
                    )
                    .map_err(|e| Error::AudioOutput(format!("failed to build stream: {e}")))?
            }
            format => {
                return Err(Error::AudioOutput(format!(
                    "unsupported sample format: {format:?}"
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("failed to start stream: {e}")))?;
        self.stream = Some(stream);
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            debug!("audio stream stopped");
        }
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn render_stereo<F: FnMut(&mut [f32])>(fill: &mut F, scratch: &mut Vec<f32>, frames: usize) {
    scratch.resize(frames * 2, 0.0);
    fill(&mut scratch[..frames * 2]);
}

/// Map an interleaved stereo buffer onto the device channel layout.
fn map_channels(stereo: &[f32], out: &mut [f32], channels: usize) {
    match channels {
        0 => {}
        1 => {
            for (i, sample) in out.iter_mut().enumerate() {
                *sample = 0.5 * (stereo[i * 2] + stereo[i * 2 + 1]);
            }
        }
        _ => {
            for (i, frame) in out.chunks_exact_mut(channels).enumerate() {
                frame[0] = stereo[i * 2];
                frame[1] = stereo[i * 2 + 1];
                for extra in &mut frame[2..] {
                    *extra = 0.0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_channels_downmixes_to_mono() {
        let stereo = vec![0.2f32, 0.4, -0.2, -0.4];
        let mut out = vec![0.0f32; 2];
        map_channels(&stereo, &mut out, 1);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!((out[1] + 0.3).abs() < 1e-6);
    }

    #[test]
    fn map_channels_zeroes_surround_channels() {
        let stereo = vec![0.5f32, -0.5];
        let mut out = vec![9.0f32; 6];
        map_channels(&stereo, &mut out, 6);
        assert_eq!(out[0], 0.5);
        assert_eq!(out[1], -0.5);
        assert!(out[2..].iter().all(|&s| s == 0.0));
    }
}
