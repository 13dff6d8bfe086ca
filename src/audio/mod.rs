//! Audio recording functionality.
//!
//! This module records from the configured (or default) input device into a
//! buffer shared with the voice loop. Frames are only kept between
//! [`AudioRecorder::start`] and [`AudioRecorder::stop`]; the recognizer gets
//! them as 16 kHz mono `f32`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SupportedStreamConfig};
use log::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

mod resample;
use resample::Resample;

type SampleBuffer = Arc<Mutex<Vec<f32>>>;

/// Handles audio recording.
///
/// The cpal callback is the only producer of the buffer; `stop` drains it.
pub struct AudioRecorder {
    stream: cpal::Stream,
    buffer: SampleBuffer,
    capturing: Arc<AtomicBool>,
}

impl AudioRecorder {
    /// Opens the input device and prepares a paused stream.
    pub fn new(config: &Config) -> Result<Self> {
        let host = cpal::default_host();
        debug!("Available hosts: {:?}", cpal::available_hosts());
        debug!("Default host: {:?}", host.id());

        let names: HashSet<_> = host
            .input_devices()
            .map_err(|e| Error::AudioDevice(e.to_string()))?
            .flat_map(|d| d.name())
            .collect();
        debug!("Available input devices: {names:?}");

        let device = if let Some(device_name) = &config.audio.device {
            host.input_devices()
                .map_err(|e| Error::AudioDevice(e.to_string()))?
                .find(|d| d.name().map(|name| name == *device_name).unwrap_or(false))
                .ok_or_else(|| {
                    Error::AudioDevice(format!(
                        "Requested audio device '{device_name}' not found, available: {names:?}"
                    ))
                })?
        } else {
            host.default_input_device()
                .ok_or_else(|| Error::AudioDevice("No default input device found".to_string()))?
        };
        info!(
            "Using input device: {}",
            device.name().unwrap_or_else(|_| "<unnamed>".to_string())
        );

        let target_rate = config.audio.sample_rate;
        let stream_config = Self::pick_stream_config(&device, target_rate)?;
        debug!("Using stream config: {:?}", stream_config);

        let resampler = if stream_config.sample_rate().0 != target_rate
            || stream_config.channels() != 1
        {
            Some(Resample {
                samplerate_in: stream_config.sample_rate().0,
                samplerate_out: target_rate,
                in_channels: stream_config.channels(),
            })
        } else {
            None
        };

        let buffer: SampleBuffer = Arc::new(Mutex::new(Vec::new()));
        let capturing = Arc::new(AtomicBool::new(false));
        let err_fn = move |err| {
            error!("Audio stream error: {}", err);
        };

        let sample_format = stream_config.sample_format();
        let stream = match sample_format {
            SampleFormat::F32 => {
                let (buffer, capturing) = (buffer.clone(), capturing.clone());
                device.build_input_stream(
                    &stream_config.into(),
                    move |data: &[f32], _: &_| {
                        Self::write_input_data(data, &buffer, &capturing, resampler)
                    },
                    err_fn,
                    None,
                )
            }
            SampleFormat::I16 => {
                let (buffer, capturing) = (buffer.clone(), capturing.clone());
                device.build_input_stream(
                    &stream_config.into(),
                    move |data: &[i16], _: &_| {
                        Self::write_input_data(data, &buffer, &capturing, resampler)
                    },
                    err_fn,
                    None,
                )
            }
            other => {
                return Err(Error::AudioDevice(format!(
                    "Unsupported sample format '{other}'"
                )));
            }
        }
        .map_err(|e| Error::AudioStream(format!("Failed to create audio stream: {e}")))?;

        stream
            .pause()
            .map_err(|e| Error::AudioStream(format!("Cannot pause: {e}")))?;

        Ok(Self {
            stream,
            buffer,
            capturing,
        })
    }

    /// Prefers F32 at the target rate, then the device default.
    fn pick_stream_config(device: &cpal::Device, target_rate: u32) -> Result<SupportedStreamConfig> {
        let sample_rate = cpal::SampleRate(target_rate);
        if let Ok(supported_configs) = device.supported_input_configs() {
            let mut ranges: Vec<_> = supported_configs
                .filter(|range| {
                    range.min_sample_rate() <= sample_rate
                        && range.max_sample_rate() >= sample_rate
                        && range.sample_format() == SampleFormat::F32
                })
                .collect();
            // Fewer channels means less to downmix
            ranges.sort_by_key(|range| range.channels());
            if let Some(range) = ranges.into_iter().next() {
                return Ok(range.with_sample_rate(sample_rate));
            }
        }
        debug!("Could not find a supported F32 config at {target_rate} Hz");
        let default_config = device
            .default_input_config()
            .map_err(|e| Error::AudioDevice(format!("No usable input config: {e}")))?;
        warn!("Falling back to device default config {default_config:?}, resampling");
        Ok(default_config)
    }

    /// Starts capturing into a fresh buffer.
    pub fn start(&self) -> Result<()> {
        self.buffer
            .lock()
            .map_err(|e| Error::AudioStream(format!("Failed to lock buffer: {e}")))?
            .clear();
        self.capturing.store(true, Ordering::Release);
        self.stream
            .play()
            .map_err(|e| Error::AudioStream(e.to_string()))?;
        Ok(())
    }

    /// Stops capturing and hands back everything recorded since `start`.
    pub fn stop(&self) -> Result<Vec<f32>> {
        self.stream
            .pause()
            .map_err(|e| Error::AudioStream(e.to_string()))?;
        self.capturing.store(false, Ordering::Release);
        let samples = std::mem::take(
            &mut *self
                .buffer
                .lock()
                .map_err(|e| Error::AudioStream(format!("Failed to lock buffer: {e}")))?,
        );
        debug!("Captured {} samples", samples.len());
        Ok(samples)
    }

    fn write_input_data<T>(
        input: &[T],
        buffer: &SampleBuffer,
        capturing: &AtomicBool,
        resampler: Option<Resample>,
    ) where
        T: Sample,
        f32: FromSample<T>,
    {
        if !capturing.load(Ordering::Acquire) {
            return;
        }
        let samples: Vec<f32> = input.iter().map(|&s| f32::from_sample(s)).collect();
        let samples = match resampler {
            Some(resampler) => resampler.apply(&samples),
            None => samples,
        };
        if let Ok(mut guard) = buffer.lock() {
            guard.extend_from_slice(&samples);
        }
    }
}
