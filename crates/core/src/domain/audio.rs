//! Audio domain models and collaborator interfaces
//!
//! This module defines the platform-agnostic types the mixing engine is
//! built on: error taxonomy, track identity, the decoded-sample contract a
//! track library collaborator must fulfil, and stream configuration.
//! Device enumeration and the output stream live in the `infra` crate.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Interleaved stereo everywhere in the signal path.
pub const CHANNELS: usize = 2;

/// Errors that can occur in the audio subsystem
#[derive(Debug, Error)]
pub enum AudioError {
    /// An operation that needs an attached source was called on an empty deck
    #[error("No track loaded")]
    NoTrackLoaded,

    /// The underlying byte stream could not be decoded; the deck keeps its
    /// pre-load state
    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    /// Requested audio device was not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Error in audio stream creation or processing
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Invalid configuration for the engine or a device
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Input/Output error at the OS level
    #[error("OS error: {0}")]
    OsError(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Unique identifier for a track in the library collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable track reference
///
/// Owned by the library collaborator; a deck only references it once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub duration_secs: f64,
}

/// Fully decoded track audio: interleaved stereo f32 samples
///
/// The sample storage is shared (`Arc`) so handing a copy to the render
/// domain never clones the PCM data.
#[derive(Debug, Clone)]
pub struct DecodedTrack {
    pub track: Track,
    pub sample_rate: u32,
    pub samples: Arc<Vec<f32>>,
}

impl DecodedTrack {
    pub fn new(track: Track, sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            track,
            sample_rate,
            samples: Arc::new(samples),
        }
    }

    /// Number of stereo frames
    pub fn frames(&self) -> usize {
        self.samples.len() / CHANNELS
    }

    /// Duration derived from the actual sample data
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Track library collaborator
///
/// The library owns storage, metadata and any network download/transcode
/// machinery. The core only needs decoded, randomly-seekable samples.
pub trait TrackLibrary: Send + Sync {
    /// Fetch and decode a track by id
    fn fetch(&self, id: &TrackId) -> Result<DecodedTrack>;
}

/// Unique identifier for an audio device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Audio sample rate in Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    Hz44100,
    Hz48000,
    Hz96000,
    Custom(u32),
}

impl SampleRate {
    pub fn hz(&self) -> u32 {
        match self {
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
            SampleRate::Hz96000 => 96000,
            SampleRate::Custom(hz) => *hz,
        }
    }

    pub fn from_hz(hz: u32) -> Self {
        match hz {
            44100 => SampleRate::Hz44100,
            48000 => SampleRate::Hz48000,
            96000 => SampleRate::Hz96000,
            hz => SampleRate::Custom(hz),
        }
    }
}

/// Configuration for the output stream (stereo f32 is fixed)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub sample_rate: SampleRate,
    pub buffer_size: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz48000,
            buffer_size: 512,
        }
    }
}

/// Information about an output device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub sample_rates: Vec<SampleRate>,
    pub default_sample_rate: Option<SampleRate>,
}

/// Trait for enumerating available output devices
pub trait AudioEnumerator: Send + Sync {
    /// List all available output devices
    fn output_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Get the default output device
    fn default_output_device(&self) -> Result<DeviceInfo>;

    /// Find a device by its ID
    fn device_by_id(&self, id: &DeviceId) -> Result<DeviceInfo>;
}
