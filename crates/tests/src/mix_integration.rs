//! Integration tests for the mixing engine
//!
//! These tests drive the full pipeline from the control surface through
//! deck rendering, looping, effects, crossfading, and the analysis feed.

use std::sync::Arc;

use tandem_core::domain::audio::{
    AudioError, DecodedTrack, Track, TrackId, TrackLibrary, CHANNELS,
};
use tandem_core::domain::config::{Command, CommandExecutor, CommandResult, ControlBus};
use tandem_core::domain::deck::{Deck, DeckId, EqBand};
use tandem_core::domain::dsp::fx::EffectName;
use tandem_core::domain::dsp::{hz_to_knob, knob_to_hz};
use tandem_core::domain::loops::BeatLength;
use tandem_core::domain::mixer::{crossfader_factor, AnalysisTap, Mixer};
use tandem_infra::audio::{tap_pair, SpectrumAnalyser};

/// Low engine rate keeps long-track tests small
const SAMPLE_RATE: f32 = 1000.0;

fn silent_track(id: &str, duration_secs: f64) -> DecodedTrack {
    let frames = (duration_secs * SAMPLE_RATE as f64) as usize;
    DecodedTrack::new(
        Track {
            id: TrackId::new(id),
            title: id.to_string(),
            duration_secs,
        },
        SAMPLE_RATE as u32,
        vec![0.0; frames * CHANNELS],
    )
}

fn constant_track(id: &str, value: f32, duration_secs: f64) -> DecodedTrack {
    let frames = (duration_secs * SAMPLE_RATE as f64) as usize;
    DecodedTrack::new(
        Track {
            id: TrackId::new(id),
            title: id.to_string(),
            duration_secs,
        },
        SAMPLE_RATE as u32,
        vec![value; frames * CHANNELS],
    )
}

/// Render in visualization-frame-sized blocks, polling the loop between
/// blocks the way the frame-paced scheduler would
fn render_with_polls(
    deck: &mut Deck,
    strip: &mut tandem_core::domain::deck::ChannelStrip,
    total_secs: f64,
    block_frames: usize,
) {
    let total_frames = (total_secs * SAMPLE_RATE as f64) as usize;
    let mut out = vec![0.0; block_frames * CHANNELS];
    let mut rendered = 0;
    while rendered < total_frames {
        strip.render(&mut out);
        deck.poll_loop_once();
        rendered += block_frames;
    }
}

// ============================================================================
// GAIN LAW
// ============================================================================

#[test]
fn test_effective_gain_law_exact() {
    let (mut mixer, _bus) = Mixer::new(SAMPLE_RATE);
    mixer.deck(DeckId::A).set_volume(0.8);
    mixer.deck(DeckId::B).set_volume(0.8);

    // Exact numeric checks across the fader travel
    for (c, factor_a, factor_b) in [
        (0.0, 1.0, 0.0),
        (0.25, 1.0, 0.5),
        (0.5, 1.0, 1.0),
        (0.75, 0.5, 1.0),
        (1.0, 0.0, 1.0),
    ] {
        mixer.set_crossfader(c);
        assert_eq!(mixer.effective_gain(DeckId::A), 0.8 * factor_a);
        assert_eq!(mixer.effective_gain(DeckId::B), 0.8 * factor_b);
    }
}

#[test]
fn test_crossfader_transition_swaps_decks() {
    let (mut mixer, mut bus) = Mixer::new(SAMPLE_RATE);
    mixer
        .deck_mut(DeckId::A)
        .load_track(constant_track("a", 0.2, 60.0))
        .unwrap();
    mixer
        .deck_mut(DeckId::B)
        .load_track(constant_track("b", 0.2, 60.0))
        .unwrap();
    mixer.deck(DeckId::A).set_volume(1.0);
    mixer.deck(DeckId::B).set_volume(1.0);
    mixer.deck_mut(DeckId::A).toggle_play();
    mixer.deck_mut(DeckId::B).toggle_play();

    // Hard left: only deck A in the mix
    mixer.set_crossfader(0.0);
    let mut out = vec![0.0; 2000 * CHANNELS];
    bus.render(&mut out);
    let settled = out[out.len() - 1];
    assert!((settled - 0.2).abs() < 1e-3, "got {settled}");

    // Hard right: only deck B
    mixer.set_crossfader(1.0);
    bus.render(&mut out);
    let settled = out[out.len() - 1];
    assert!((settled - 0.2).abs() < 1e-3, "got {settled}");

    // Center: both at full relative volume
    mixer.reset_crossfader();
    bus.render(&mut out);
    let settled = out[out.len() - 1];
    assert!((settled - 0.4).abs() < 1e-3, "got {settled}");
}

// ============================================================================
// LOOPING
// ============================================================================

#[test]
fn test_loop_scenario_one_beat_at_ten_seconds() {
    // 180 s track, volume 0.8, loop of one beat armed at 10.0 s
    let (mut deck, mut strip) = Deck::new(DeckId::A, SAMPLE_RATE);
    deck.load_track(silent_track("long", 180.0)).unwrap();
    deck.set_volume(0.8);
    deck.toggle_play();

    deck.seek(10.0);
    let mut out = vec![0.0; 10 * CHANNELS];
    strip.render(&mut out);
    assert!((deck.position_secs() - 10.0).abs() < 0.05);

    deck.set_loop(BeatLength::One);
    let region = deck.loop_region().unwrap();
    // One beat at 120 BPM is 0.5 s
    assert!((region.start_secs - 10.0).abs() < 0.05);
    assert!((region.end_secs - region.start_secs - 0.5).abs() < 1e-6);

    // Play for two seconds; the loop keeps position inside the region
    // (boundary precision bounded by the polling block size)
    let block = 16;
    let mut max_pos = 0.0_f64;
    let total_frames = (2.0 * SAMPLE_RATE) as usize;
    let mut buffer = vec![0.0; block * CHANNELS];
    let mut rendered = 0;
    while rendered < total_frames {
        strip.render(&mut buffer);
        deck.poll_loop_once();
        max_pos = max_pos.max(deck.position_secs());
        rendered += block;
    }

    assert!(max_pos >= 10.4, "loop never approached its end: {max_pos}");
    assert!(
        max_pos < 10.6,
        "position escaped the loop region: {max_pos}"
    );
    assert!(deck.position_secs() < 10.6);
}

#[test]
fn test_set_loop_twice_uses_second_call_only() {
    let (mut deck, mut strip) = Deck::new(DeckId::A, SAMPLE_RATE);
    deck.load_track(silent_track("long", 180.0)).unwrap();
    deck.toggle_play();
    deck.seek(10.0);
    let mut out = vec![0.0; 10 * CHANNELS];
    strip.render(&mut out);

    deck.set_loop(BeatLength::One);
    deck.set_loop(BeatLength::Four);

    let region = deck.loop_region().unwrap();
    assert_eq!(region.beat, BeatLength::Four);
    assert!((region.end_secs - region.start_secs - 2.0).abs() < 1e-6);
}

#[test]
fn test_clear_loop_stops_position_resets() {
    let (mut deck, mut strip) = Deck::new(DeckId::A, SAMPLE_RATE);
    deck.load_track(silent_track("long", 180.0)).unwrap();
    deck.toggle_play();
    deck.seek(10.0);
    let mut out = vec![0.0; 10 * CHANNELS];
    strip.render(&mut out);

    deck.set_loop(BeatLength::One);
    deck.clear_loop();
    assert!(deck.loop_region().is_none());

    // Crossing what was the loop end no longer wraps
    render_with_polls(&mut deck, &mut strip, 1.0, 20);
    assert!(deck.position_secs() > 10.9);
}

#[test]
fn test_cue_clears_loop_and_returns_to_start() {
    let (mut deck, mut strip) = Deck::new(DeckId::A, SAMPLE_RATE);
    deck.load_track(silent_track("long", 180.0)).unwrap();
    deck.toggle_play();
    deck.seek(10.0);
    let mut out = vec![0.0; 10 * CHANNELS];
    strip.render(&mut out);
    deck.set_loop(BeatLength::Two);

    deck.cue();
    strip.render(&mut out);

    assert!(deck.loop_region().is_none());
    assert!(!deck.is_playing());
    assert!(deck.position_secs() < 0.1);
}

#[test]
fn test_load_clears_loop() {
    let (mut deck, mut strip) = Deck::new(DeckId::A, SAMPLE_RATE);
    deck.load_track(silent_track("first", 180.0)).unwrap();
    deck.toggle_play();
    deck.seek(10.0);
    let mut out = vec![0.0; 10 * CHANNELS];
    strip.render(&mut out);
    deck.set_loop(BeatLength::One);

    deck.load_track(silent_track("second", 60.0)).unwrap();
    strip.render(&mut out);

    // Playback stays engaged across the load, so a few frames elapse
    assert!(deck.loop_region().is_none());
    assert!(deck.position_secs() < 0.05);
}

// ============================================================================
// KNOB MAPPING
// ============================================================================

#[test]
fn test_knob_round_trip_boundaries() {
    assert!((knob_to_hz(0.0) - 20.0).abs() < 1e-3);
    assert!((knob_to_hz(1.0) - 20000.0).abs() < 1.0);

    for i in 0..=20 {
        let position = i as f32 / 20.0;
        let recovered = hz_to_knob(knob_to_hz(position));
        assert!((recovered - position).abs() < 1e-4);
    }
}

// ============================================================================
// EFFECTS
// ============================================================================

#[test]
fn test_inactive_effects_full_chain_passthrough() {
    let (mut deck, mut strip) = Deck::new(DeckId::A, SAMPLE_RATE);
    deck.load_track(constant_track("tone", 0.25, 60.0)).unwrap();
    deck.set_volume(1.0);
    // High mix values on bypassed effects must not leak into the output
    for effect in EffectName::ALL {
        deck.set_effect_mix(effect, 1.0);
    }
    deck.toggle_play();

    let mut out = vec![0.0; 3000 * CHANNELS];
    strip.render(&mut out);

    // After the volume ramp settles the mix is the raw source
    let tail = &out[out.len() - 64..];
    for &sample in tail {
        assert!((sample - 0.25).abs() < 1e-3, "got {sample}");
    }
}

#[test]
fn test_filter_sweep_keeps_full_wet_mix() {
    let (deck, _strip) = Deck::new(DeckId::A, SAMPLE_RATE);
    deck.set_effect_active(EffectName::Filter, true);
    assert_eq!(deck.effect_mix(EffectName::Filter), 1.0);

    deck.set_filter_frequency(1000.0);
    assert_eq!(deck.effect_mix(EffectName::Filter), 1.0);
    deck.set_filter_frequency(20000.0);
    assert_eq!(deck.effect_mix(EffectName::Filter), 1.0);
    assert_eq!(deck.filter_frequency(), 20000.0);
}

#[test]
fn test_eq_and_effects_persist_across_loads() {
    let (mut deck, mut strip) = Deck::new(DeckId::A, SAMPLE_RATE);
    deck.load_track(silent_track("first", 60.0)).unwrap();
    deck.set_eq(EqBand::Low, 6.0);
    deck.set_effect_active(EffectName::Echo, true);
    deck.set_effect_mix(EffectName::Echo, 0.7);
    deck.set_volume(0.4);

    deck.load_track(silent_track("second", 60.0)).unwrap();
    let mut out = vec![0.0; 32 * CHANNELS];
    strip.render(&mut out);

    assert_eq!(deck.eq_gain(EqBand::Low), 6.0);
    assert!(deck.effect_active(EffectName::Echo));
    assert_eq!(deck.effect_mix(EffectName::Echo), 0.7);
    assert_eq!(deck.volume(), 0.4);
}

// ============================================================================
// ANALYSIS FEED
// ============================================================================

#[test]
fn test_analysis_feed_end_to_end() {
    // Engine rate high enough for a clean in-band sine
    let rate = 48000.0;
    let (mut mixer, mut bus) = Mixer::new(rate);
    let (writer, reader) = tap_pair(256 * CHANNELS * 8);
    bus.set_tap(DeckId::A, Box::new(writer));
    let mut analyser = SpectrumAnalyser::new(reader, 256);

    let frames = 48000;
    let samples: Vec<f32> = (0..frames)
        .flat_map(|i| {
            let s = (2.0 * std::f32::consts::PI * 3000.0 * i as f32 / rate).sin() * 0.8;
            [s, s]
        })
        .collect();
    let track = DecodedTrack::new(
        Track {
            id: TrackId::new("sine"),
            title: "Sine".to_string(),
            duration_secs: 1.0,
        },
        rate as u32,
        samples,
    );

    mixer.deck_mut(DeckId::A).load_track(track).unwrap();
    mixer.deck(DeckId::A).set_volume(1.0);
    mixer.deck_mut(DeckId::A).toggle_play();
    mixer.set_crossfader(0.0);

    let mut out = vec![0.0; 4096 * CHANNELS];
    bus.render(&mut out);
    bus.render(&mut out);

    let bins = analyser.update().to_vec();
    assert_eq!(bins.len(), 128);

    // 3 kHz in a 256-sample window at 48 kHz lands in bin 16
    let peak_bin = bins
        .iter()
        .enumerate()
        .max_by_key(|(_, &v)| v)
        .map(|(i, _)| i)
        .unwrap();
    assert!((15..=17).contains(&peak_bin), "peak at bin {peak_bin}");
}

// ============================================================================
// COMMAND BUS
// ============================================================================

struct FixtureLibrary;

impl TrackLibrary for FixtureLibrary {
    fn fetch(&self, id: &TrackId) -> Result<DecodedTrack, AudioError> {
        match id.as_str() {
            "long" => Ok(silent_track("long", 180.0)),
            other => Err(AudioError::DecodeFailure(format!("no such track: {other}"))),
        }
    }
}

#[tokio::test]
async fn test_full_session_over_command_bus() {
    let (mixer, mut bus) = Mixer::new(SAMPLE_RATE);
    let control = ControlBus::new(mixer, Arc::new(FixtureLibrary));

    let result = control
        .execute(Command::LoadTrack {
            deck: DeckId::A,
            track_id: TrackId::new("long"),
        })
        .await;
    assert!(matches!(result, CommandResult::TrackLoaded { .. }));

    control
        .execute(Command::SetVolume {
            deck: DeckId::A,
            volume: 0.8,
        })
        .await;
    control.execute(Command::TogglePlay { deck: DeckId::A }).await;
    control
        .execute(Command::SetEq {
            deck: DeckId::A,
            band: EqBand::Mid,
            gain_db: -4.0,
        })
        .await;

    // Render a second of audio, then arm a loop at the current position
    let mut out = vec![0.0; 1000 * CHANNELS];
    bus.render(&mut out);

    let result = control
        .execute(Command::SetLoop {
            deck: DeckId::A,
            beat: BeatLength::Half,
        })
        .await;
    assert!(matches!(
        result,
        CommandResult::LoopSet {
            beat: BeatLength::Half,
            ..
        }
    ));

    {
        let mixer = control.mixer().lock().await;
        let region = mixer.deck(DeckId::A).loop_region().unwrap();
        assert!((region.end_secs - region.start_secs - 0.25).abs() < 1e-6);
        assert_eq!(mixer.deck(DeckId::A).volume(), 0.8);
        assert_eq!(mixer.deck(DeckId::A).eq_gain(EqBand::Mid), -4.0);
    }

    let result = control.execute(Command::ClearLoop { deck: DeckId::A }).await;
    assert!(matches!(result, CommandResult::LoopCleared { .. }));

    // Loading a missing track errors without touching the session
    let result = control
        .execute(Command::LoadTrack {
            deck: DeckId::B,
            track_id: TrackId::new("missing"),
        })
        .await;
    assert!(matches!(result, CommandResult::Error(_)));
    let mixer = control.mixer().lock().await;
    assert!(mixer.deck(DeckId::B).track().is_none());
    assert!(mixer.deck(DeckId::A).track().is_some());
}

// ============================================================================
// CONTROL SURFACE SANITY
// ============================================================================

#[test]
fn test_crossfader_factor_matches_published_gains() {
    let (mut mixer, _bus) = Mixer::new(SAMPLE_RATE);
    for c in [0.0, 0.1, 0.33, 0.5, 0.77, 1.0] {
        mixer.set_crossfader(c);
        assert_eq!(
            mixer.deck(DeckId::A).controls().xfade_factor.load(),
            crossfader_factor(DeckId::A, c)
        );
        assert_eq!(
            mixer.deck(DeckId::B).controls().xfade_factor.load(),
            crossfader_factor(DeckId::B, c)
        );
    }
}

/// Compile-time shape check: taps are boxed trait objects owned by the bus
#[test]
fn test_tap_trait_object() {
    struct NullTap;
    impl AnalysisTap for NullTap {
        fn push(&mut self, _interleaved: &[f32]) {}
    }

    let (_mixer, mut bus) = Mixer::new(SAMPLE_RATE);
    bus.set_tap(DeckId::A, Box::new(NullTap));
    bus.set_tap(DeckId::B, Box::new(NullTap));
}
