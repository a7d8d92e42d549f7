//! Platform-specific audio backend implementations using CPAL
//!
//! This module provides cross-platform audio support through CPAL, which abstracts
//! platform-specific APIs:
//! - Windows: WASAPI
//! - Linux: ALSA/PulseAudio
//! - macOS: CoreAudio

pub mod analyser;
pub mod cpal_backend;
pub mod engine;
pub mod tap;

pub use analyser::SpectrumAnalyser;
pub use cpal_backend::CpalEnumerator;
pub use engine::AudioEngine;
pub use tap::{tap_pair, TapReader, TapWriter};
