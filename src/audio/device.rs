//! Audio output device, backed by `cpal`.
//!
//! The player owns one `AudioOutput` for the lifetime of the output thread.
//! `start` takes a pull closure that fills a caller-owned i16 PCM byte
//! buffer (the format produced by the effect chain's adapter); this module
//! converts to whatever sample format the device actually wants.

use crate::audio::format::AudioFormat;
use crate::config::{CandidateFormat, DEFAULT_CANDIDATE_FORMATS};
use crate::error::{OutputError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices: Vec<String> = host
        .output_devices()
        .map_err(|_| OutputError::NoDevice)?
        .filter_map(|d| d.name().ok())
        .collect();
    Ok(devices)
}

/// Owns the cpal device + stream. Volume is an atomic so the realtime
/// callback never takes a lock.
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
    volume_bits: Arc<AtomicU32>,
}

impl AudioOutput {
    /// Opens a device, falling back through the candidate format cascade
    /// before giving up.
    pub fn open(device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => {
                let mut devices = host.output_devices().map_err(|_| OutputError::NoDevice)?;
                devices
                    .find(|d| d.name().ok().as_deref() == Some(name))
                    .ok_or_else(|| OutputError::DeviceNotFound(name.to_string()))?
            }
            None => host
                .default_output_device()
                .ok_or(OutputError::NoDevice)?,
        };

        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        info!(device = %name, "opening audio output device");

        let (config, sample_format) =
            Self::resolve_config(&device, DEFAULT_CANDIDATE_FORMATS).map_err(|_| {
                OutputError::UnsupportedConfig {
                    device: name.clone(),
                }
            })?;

        debug!(
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            format = ?sample_format,
            "resolved output config"
        );

        Ok(AudioOutput {
            device,
            config,
            sample_format,
            stream: None,
            volume_bits: Arc::new(AtomicU32::new(1.0f32.to_bits())),
        })
    }

    fn resolve_config(
        device: &Device,
        candidates: &[CandidateFormat],
    ) -> std::result::Result<(StreamConfig, SampleFormat), ()> {
        for candidate in candidates {
            if let Ok(mut configs) = device.supported_output_configs() {
                if let Some(supported) = configs.find(|c| {
                    c.channels() == candidate.channels
                        && c.min_sample_rate().0 <= candidate.sample_rate
                        && c.max_sample_rate().0 >= candidate.sample_rate
                }) {
                    let sample_format = supported.sample_format();
                    let config = supported
                        .with_sample_rate(cpal::SampleRate(candidate.sample_rate))
                        .config();
                    return Ok((config, sample_format));
                }
            }
        }
        let default = device.default_output_config().map_err(|_| ())?;
        let sample_format = default.sample_format();
        Ok((default.config(), sample_format))
    }

    /// The pipeline's internal representation is always 2-byte i16 PCM
    /// regardless of the device's native sample format; the per-format
    /// conversion to what the device actually wants happens in `start`'s
    /// stream builders.
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.config.sample_rate.0, self.config.channels, 2)
    }

    pub fn set_volume(&self, volume: f32) {
        let clamped = volume.clamp(0.0, 1.0);
        self.volume_bits.store(clamped.to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    pub fn device_name(&self) -> String {
        self.device.name().unwrap_or_else(|_| "unknown".to_string())
    }

    /// Starts the stream. `pull` is called on the audio thread to fill
    /// `channels`-interleaved i16 samples; it must never block.
    pub fn start<F>(&mut self, mut pull: F) -> Result<()>
    where
        F: FnMut(&mut [i16]) + Send + 'static,
    {
        let channels = self.config.channels as usize;
        let volume_bits = Arc::clone(&self.volume_bits);

        let stream = match self.sample_format {
            SampleFormat::I16 => self
                .device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [i16], _| {
                        pull(data);
                        apply_volume_i16(data, &volume_bits);
                    },
                    stream_error_handler,
                    None,
                )
                .map_err(|e| OutputError::StreamBuild(e.to_string()))?,
            SampleFormat::F32 => {
                let mut scratch = vec![0i16; 4096 * channels];
                self.device
                    .build_output_stream(
                        &self.config,
                        move |data: &mut [f32], _| {
                            if scratch.len() < data.len() {
                                scratch.resize(data.len(), 0);
                            }
                            let buf = &mut scratch[..data.len()];
                            pull(buf);
                            apply_volume_i16(buf, &volume_bits);
                            for (dst, src) in data.iter_mut().zip(buf.iter()) {
                                *dst = *src as f32 / i16::MAX as f32;
                            }
                        },
                        stream_error_handler,
                        None,
                    )
                    .map_err(|e| OutputError::StreamBuild(e.to_string()))?
            }
            SampleFormat::U16 => {
                let mut scratch = vec![0i16; 4096 * channels];
                self.device
                    .build_output_stream(
                        &self.config,
                        move |data: &mut [u16], _| {
                            if scratch.len() < data.len() {
                                scratch.resize(data.len(), 0);
                            }
                            let buf = &mut scratch[..data.len()];
                            pull(buf);
                            apply_volume_i16(buf, &volume_bits);
                            for (dst, src) in data.iter_mut().zip(buf.iter()) {
                                *dst = (*src as i32 + 32768) as u16;
                            }
                        },
                        stream_error_handler,
                        None,
                    )
                    .map_err(|e| OutputError::StreamBuild(e.to_string()))?
            }
            _ => {
                return Err(OutputError::UnsupportedConfig {
                    device: self.device_name(),
                }
                .into());
            }
        };

        stream
            .play()
            .map_err(|e| OutputError::StreamPlay(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!(error = %e, "failed to pause output stream");
            }
        }
    }
}

fn apply_volume_i16(buf: &mut [i16], volume_bits: &AtomicU32) {
    let volume = f32::from_bits(volume_bits.load(Ordering::Relaxed));
    if volume >= 0.999 {
        return;
    }
    for s in buf.iter_mut() {
        *s = (*s as f32 * volume) as i16;
    }
}

fn stream_error_handler(err: cpal::StreamError) {
    warn!(error = %err, "audio output stream error");
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
