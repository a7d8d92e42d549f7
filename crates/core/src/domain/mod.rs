//! Domain entities and business rules

pub mod audio;
pub mod config;
pub mod deck;
pub mod dsp;
pub mod loops;
pub mod mixer;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{
    AudioEnumerator, AudioError, DecodedTrack, DeviceId, DeviceInfo, SampleRate, StreamConfig,
    Track, TrackId, TrackLibrary, CHANNELS,
};
pub use deck::{ChannelStrip, Deck, DeckControls, DeckId, EqBand};
pub use dsp::fx::{EffectName, FxChain};
pub use dsp::{hz_to_knob, knob_to_hz, BiquadCoeffs, BiquadFilter, SmoothedGain};
pub use loops::{BeatLength, LoopRegion, LoopScheduler, BPM_DEFAULT};
pub use mixer::{crossfader_factor, AnalysisTap, MixBus, Mixer};
