//! Configuration management for Tandem
//!
//! This module provides:
//! - Configuration structs for the engine and audio output
//! - TOML (de)serialization with async file IO
//! - Command bus pattern for driving the mixer from control surfaces

use crate::domain::audio::{AudioError, StreamConfig, TrackId, TrackLibrary};
use crate::domain::deck::{DeckId, EqBand};
use crate::domain::dsp::fx::EffectName;
use crate::domain::loops::BeatLength;
use crate::domain::mixer::Mixer;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Command execution failed: {0}")]
    CommandFailed(String),
}

/// Engine-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine sample rate in Hz
    pub sample_rate: u32,

    /// Audio buffer size in frames
    pub buffer_size: u32,

    /// Analysis window size in samples (bins = window / 2)
    pub analyser_window: usize,

    /// Smoothing time constant for gain changes in milliseconds
    pub gain_smoothing_ms: f32,

    /// Fixed tempo used for beat-length loops
    pub default_bpm: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            buffer_size: 512,
            analyser_window: 256,
            gain_smoothing_ms: 20.0,
            default_bpm: 120.0,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be non-zero".into()));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be non-zero".into()));
        }
        if !self.analyser_window.is_power_of_two() {
            return Err(ConfigError::Invalid(
                "analyser_window must be a power of two".into(),
            ));
        }
        if self.default_bpm <= 0.0 {
            return Err(ConfigError::Invalid("default_bpm must be positive".into()));
        }
        Ok(())
    }
}

/// Audio output configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AudioDeviceConfig {
    /// Output device ID (empty = use default)
    #[serde(default)]
    pub output_device: String,

    /// Stream configuration
    #[serde(default)]
    pub stream_config: StreamConfig,
}

/// Complete Tandem configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TandemConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub audio: AudioDeviceConfig,
}

impl TandemConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.engine.validate()?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Load from the default location, falling back to defaults if missing
    pub async fn load_or_default() -> Self {
        match Self::default_config_path() {
            Some(path) if path.exists() => match Self::load_from_file(&path).await {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to load config, using defaults");
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }

    /// Platform config file location (`<config dir>/tandem/config.toml`)
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tandem").join("config.toml"))
    }
}

/// Command types for driving the mixer from a control surface
#[derive(Debug, Clone)]
pub enum Command {
    LoadTrack {
        deck: DeckId,
        track_id: TrackId,
    },
    TogglePlay {
        deck: DeckId,
    },
    Cue {
        deck: DeckId,
    },
    SetVolume {
        deck: DeckId,
        volume: f32,
    },
    SetSpeed {
        deck: DeckId,
        speed: f32,
    },
    SetEq {
        deck: DeckId,
        band: EqBand,
        gain_db: f32,
    },
    SetLoop {
        deck: DeckId,
        beat: BeatLength,
    },
    ClearLoop {
        deck: DeckId,
    },
    SetEffectActive {
        deck: DeckId,
        effect: EffectName,
        active: bool,
    },
    SetEffectMix {
        deck: DeckId,
        effect: EffectName,
        mix: f32,
    },
    SetFilterFrequency {
        deck: DeckId,
        hz: f32,
    },
    SetCrossfader {
        position: f32,
    },
    ResetCrossfader,
}

/// Result of command execution
#[derive(Debug, Clone)]
pub enum CommandResult {
    Ok,
    TrackLoaded {
        deck: DeckId,
        track_id: TrackId,
    },
    PlaybackToggled {
        deck: DeckId,
        playing: bool,
    },
    LoopSet {
        deck: DeckId,
        beat: BeatLength,
    },
    LoopCleared {
        deck: DeckId,
    },
    CrossfaderMoved {
        position: f32,
    },
    Error(String),
}

/// Trait for command execution
#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: Command) -> CommandResult;
}

/// Control-domain entry point binding the mixer to a track library
///
/// Parameter commands apply synchronously; track loads fetch decoded
/// samples from the library collaborator before handing them to the deck.
/// A decode failure leaves the target deck in its pre-load state and
/// never touches the other deck.
pub struct ControlBus {
    mixer: Mutex<Mixer>,
    library: Arc<dyn TrackLibrary>,
}

impl ControlBus {
    pub fn new(mixer: Mixer, library: Arc<dyn TrackLibrary>) -> Self {
        Self {
            mixer: Mutex::new(mixer),
            library,
        }
    }

    pub fn mixer(&self) -> &Mutex<Mixer> {
        &self.mixer
    }

    async fn load_track(&self, deck: DeckId, track_id: TrackId) -> CommandResult {
        let decoded = match self.library.fetch(&track_id) {
            Ok(decoded) => decoded,
            Err(e @ AudioError::DecodeFailure(_)) => {
                // Deck state is untouched on decode failure
                return CommandResult::Error(e.to_string());
            }
            Err(e) => return CommandResult::Error(e.to_string()),
        };

        let mut mixer = self.mixer.lock().await;
        match mixer.deck_mut(deck).load_track(decoded) {
            Ok(()) => CommandResult::TrackLoaded { deck, track_id },
            Err(e) => CommandResult::Error(e.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl CommandExecutor for ControlBus {
    async fn execute(&self, command: Command) -> CommandResult {
        debug!(?command, "executing command");
        match command {
            Command::LoadTrack { deck, track_id } => self.load_track(deck, track_id).await,
            Command::TogglePlay { deck } => {
                let mut mixer = self.mixer.lock().await;
                mixer.deck_mut(deck).toggle_play();
                CommandResult::PlaybackToggled {
                    deck,
                    playing: mixer.deck(deck).is_playing(),
                }
            }
            Command::Cue { deck } => {
                self.mixer.lock().await.deck_mut(deck).cue();
                CommandResult::Ok
            }
            Command::SetVolume { deck, volume } => {
                self.mixer.lock().await.deck(deck).set_volume(volume);
                CommandResult::Ok
            }
            Command::SetSpeed { deck, speed } => {
                self.mixer.lock().await.deck(deck).set_speed(speed);
                CommandResult::Ok
            }
            Command::SetEq {
                deck,
                band,
                gain_db,
            } => {
                self.mixer.lock().await.deck(deck).set_eq(band, gain_db);
                CommandResult::Ok
            }
            Command::SetLoop { deck, beat } => {
                let mut mixer = self.mixer.lock().await;
                mixer.deck_mut(deck).set_loop(beat);
                if mixer.deck(deck).loop_region().is_some() {
                    CommandResult::LoopSet { deck, beat }
                } else {
                    // No track loaded: silently a no-op
                    CommandResult::Ok
                }
            }
            Command::ClearLoop { deck } => {
                self.mixer.lock().await.deck_mut(deck).clear_loop();
                CommandResult::LoopCleared { deck }
            }
            Command::SetEffectActive {
                deck,
                effect,
                active,
            } => {
                self.mixer
                    .lock()
                    .await
                    .deck(deck)
                    .set_effect_active(effect, active);
                CommandResult::Ok
            }
            Command::SetEffectMix { deck, effect, mix } => {
                self.mixer
                    .lock()
                    .await
                    .deck(deck)
                    .set_effect_mix(effect, mix);
                CommandResult::Ok
            }
            Command::SetFilterFrequency { deck, hz } => {
                self.mixer
                    .lock()
                    .await
                    .deck(deck)
                    .set_filter_frequency(hz);
                CommandResult::Ok
            }
            Command::SetCrossfader { position } => {
                let mut mixer = self.mixer.lock().await;
                mixer.set_crossfader(position);
                CommandResult::CrossfaderMoved {
                    position: mixer.crossfader(),
                }
            }
            Command::ResetCrossfader => {
                let mut mixer = self.mixer.lock().await;
                mixer.reset_crossfader();
                CommandResult::CrossfaderMoved {
                    position: mixer.crossfader(),
                }
            }
        }
    }
}
