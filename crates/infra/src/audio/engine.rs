//! Real-time audio engine
//!
//! Owns the CPAL output stream and drives the core mix bus from the audio
//! callback. The callback only renders: every control write reaches the
//! render graph through the core's lock-free parameter cells, so nothing
//! here blocks the audio thread.

use cpal::traits::{DeviceTrait, StreamTrait};
use tandem_core::domain::audio::{AudioError, Result, CHANNELS};
use tandem_core::domain::config::EngineConfig;
use tandem_core::domain::mixer::MixBus;
use tracing::{error, info};

use super::cpal_backend::CpalDevice;

/// Audio engine binding a mix bus to an output device
pub struct AudioEngine {
    stream: cpal::Stream,
    sample_rate: u32,
}

impl AudioEngine {
    /// Build the output stream and start playback
    ///
    /// The mix bus moves into the audio callback; all further interaction
    /// goes through the control-side mixer handle.
    pub fn start(device: &CpalDevice, config: &EngineConfig, mut bus: MixBus) -> Result<Self> {
        let stream_config = cpal::StreamConfig {
            channels: CHANNELS as u16,
            sample_rate: config.sample_rate,
            buffer_size: cpal::BufferSize::Fixed(config.buffer_size),
        };

        info!(
            device = %device.info().name,
            sample_rate = config.sample_rate,
            buffer_size = config.buffer_size,
            "Starting output stream"
        );

        let stream = device
            .inner()
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _| {
                    bus.render(data);
                },
                move |err| {
                    error!("Output stream error: {err}");
                },
                None,
            )
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        Ok(Self {
            stream,
            sample_rate: config.sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Suspend the output stream without tearing it down
    pub fn pause(&self) -> Result<()> {
        self.stream
            .pause()
            .map_err(|e| AudioError::StreamError(e.to_string()))
    }

    /// Resume a paused stream
    pub fn resume(&self) -> Result<()> {
        self.stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        info!("Shutting down audio engine");
    }
}
