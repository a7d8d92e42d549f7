//! Deck control surface and per-deck render strip
//!
//! Each deck is split across the two concurrency domains: a [`Deck`] handle
//! lives in the control domain and a [`ChannelStrip`] lives in the render
//! domain. All parameter traffic between them goes through lock-free
//! atomics in [`DeckControls`]; track handoff goes through a bounded
//! channel drained keep-last, so rapid repeated loads settle on the most
//! recent call. The render path never locks, allocates, or performs I/O.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::audio::{AudioError, DecodedTrack, Track, CHANNELS};
use crate::domain::dsp::fx::{
    EffectName, FxChain, ECHO_DEFAULT_MIX, FILTER_DEFAULT_HZ, FILTER_DEFAULT_MIX,
    FLANGER_DEFAULT_MIX, REVERB_DEFAULT_MIX,
};
use crate::domain::dsp::{params, BiquadCoeffs, BiquadFilter, SmoothedGain};
use crate::domain::loops::{BeatLength, LoopRegion, LoopScheduler};

/// EQ stage centers and resonance
pub const EQ_LOW_HZ: f32 = 320.0;
pub const EQ_MID_HZ: f32 = 1000.0;
pub const EQ_HIGH_HZ: f32 = 3200.0;
pub const EQ_MID_Q: f32 = 0.5;
pub const EQ_SHELF_Q: f32 = 0.707;

/// Default deck volume at initialization
pub const DEFAULT_VOLUME: f32 = 0.8;

/// Capacity of the track handoff channel
const COMMAND_QUEUE_DEPTH: usize = 8;

/// Deck identity within the two-deck mixer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeckId {
    A,
    B,
}

impl DeckId {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeckId::A => "A",
            DeckId::B => "B",
        }
    }
}

impl std::fmt::Display for DeckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// EQ band selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EqBand {
    Low,
    Mid,
    High,
}

impl EqBand {
    pub const ALL: [EqBand; 3] = [EqBand::Low, EqBand::Mid, EqBand::High];

    fn index(&self) -> usize {
        match self {
            EqBand::Low => 0,
            EqBand::Mid => 1,
            EqBand::High => 2,
        }
    }
}

/// Lock-free f32 cell built on `AtomicU32` bit transmutation
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Pack a generation tag and a position into one atomic word
#[inline]
fn pack_seek(generation: u32, secs: f32) -> u64 {
    ((generation as u64) << 32) | secs.to_bits() as u64
}

#[inline]
fn unpack_seek(packed: u64) -> (u32, f32) {
    ((packed >> 32) as u32, f32::from_bits(packed as u32))
}

/// Shared atomic parameter block between control and render domains
///
/// Every field is an independent lock-free cell; the render domain reads
/// them once per block (or per frame for gains) and never blocks on the
/// control domain.
#[derive(Debug)]
pub struct DeckControls {
    pub playing: AtomicBool,
    pub track_loaded: AtomicBool,
    pub volume: AtomicF32,
    /// Crossfade factor for this deck, written by the mixer
    pub xfade_factor: AtomicF32,
    pub speed: AtomicF32,
    pub eq_gains_db: [AtomicF32; 3],
    pub fx_active: [AtomicBool; 4],
    pub fx_mix: [AtomicF32; 4],
    pub filter_hz: AtomicF32,
    /// Playback position in seconds, published by the render domain
    pub position_secs: AtomicF32,
    pub duration_secs: AtomicF32,
    /// User seek request: hi word = nonzero sequence, lo word = f32 bits
    pub user_seek: AtomicU64,
    /// Loop wrap request: hi word = loop generation, lo word = f32 bits
    pub loop_seek: AtomicU64,
    /// Live loop generation; wrap requests with a stale tag are discarded
    pub loop_generation: AtomicU32,
}

impl DeckControls {
    pub fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            track_loaded: AtomicBool::new(false),
            volume: AtomicF32::new(DEFAULT_VOLUME),
            xfade_factor: AtomicF32::new(1.0),
            speed: AtomicF32::new(1.0),
            eq_gains_db: [AtomicF32::new(0.0), AtomicF32::new(0.0), AtomicF32::new(0.0)],
            fx_active: [
                AtomicBool::new(false),
                AtomicBool::new(false),
                AtomicBool::new(false),
                AtomicBool::new(false),
            ],
            fx_mix: [
                AtomicF32::new(ECHO_DEFAULT_MIX),
                AtomicF32::new(REVERB_DEFAULT_MIX),
                AtomicF32::new(FILTER_DEFAULT_MIX),
                AtomicF32::new(FLANGER_DEFAULT_MIX),
            ],
            filter_hz: AtomicF32::new(FILTER_DEFAULT_HZ),
            position_secs: AtomicF32::new(0.0),
            duration_secs: AtomicF32::new(0.0),
            user_seek: AtomicU64::new(0),
            loop_seek: AtomicU64::new(0),
            loop_generation: AtomicU32::new(0),
        }
    }

    /// Request a position change from the control domain
    pub fn request_seek(&self, sequence: u32, secs: f32) {
        self.user_seek
            .store(pack_seek(sequence, secs), Ordering::Release);
    }

    /// Request a loop wrap, tagged with the issuing loop's generation
    pub fn request_loop_wrap(&self, generation: u32, secs: f32) {
        self.loop_seek
            .store(pack_seek(generation, secs), Ordering::Release);
    }
}

impl Default for DeckControls {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands carried over the track handoff channel
pub enum DeckCommand {
    Load(DecodedTrack),
}

// ============================================================================
// RENDER SIDE
// ============================================================================

/// The render-domain half of a deck
///
/// Owns the decoded samples, the variable-rate read cursor, the EQ stage,
/// and the effects chain. `render` fills an interleaved stereo buffer and
/// is safe to call from a real-time audio callback.
pub struct ChannelStrip {
    id: DeckId,
    controls: Arc<DeckControls>,
    commands: Receiver<DeckCommand>,
    sample_rate: f32,
    track: Option<DecodedTrack>,
    /// Read position in track frames (fractional for interpolation)
    cursor: f64,
    // 3 bands x 2 channels, band-major
    eq: [BiquadFilter; 3 * CHANNELS],
    cached_eq_db: [f32; 3],
    fx: FxChain,
    cached_fx_active: [bool; 4],
    cached_fx_mix: [f32; 4],
    cached_filter_hz: f32,
    gain: SmoothedGain,
}

impl ChannelStrip {
    fn new(
        id: DeckId,
        controls: Arc<DeckControls>,
        commands: Receiver<DeckCommand>,
        sample_rate: f32,
    ) -> Self {
        let flat = BiquadFilter::bypass();
        let mut strip = Self {
            id,
            controls,
            commands,
            sample_rate,
            track: None,
            cursor: 0.0,
            eq: [
                flat.clone(),
                flat.clone(),
                flat.clone(),
                flat.clone(),
                flat.clone(),
                flat,
            ],
            cached_eq_db: [0.0; 3],
            fx: FxChain::new(sample_rate),
            cached_fx_active: [false; 4],
            cached_fx_mix: [
                ECHO_DEFAULT_MIX,
                REVERB_DEFAULT_MIX,
                FILTER_DEFAULT_MIX,
                FLANGER_DEFAULT_MIX,
            ],
            cached_filter_hz: FILTER_DEFAULT_HZ,
            gain: SmoothedGain::new(
                DEFAULT_VOLUME,
                params::GAIN_SMOOTHING_SECS,
                sample_rate,
            ),
        };
        strip.refresh_eq(true);
        strip
    }

    pub fn id(&self) -> DeckId {
        self.id
    }

    /// Fill an interleaved stereo buffer with this deck's output
    pub fn render(&mut self, out: &mut [f32]) {
        self.drain_commands();
        self.apply_seeks();
        self.refresh_eq(false);
        self.refresh_fx();

        let mut playing = self.controls.playing.load(Ordering::Relaxed);
        let speed = self.controls.speed.load();
        let target = self.controls.volume.load() * self.controls.xfade_factor.load();
        self.gain.set_target(target.clamp(0.0, 1.0));

        let step = match &self.track {
            Some(track) => speed as f64 * track.sample_rate as f64 / self.sample_rate as f64,
            None => 0.0,
        };

        // Source read with linear interpolation
        for frame in out.chunks_exact_mut(CHANNELS) {
            let mut wrote = false;
            if playing {
                if let Some(track) = &self.track {
                    let frames = track.frames();
                    let idx = self.cursor as usize;
                    if idx + 1 < frames {
                        let frac = (self.cursor - idx as f64) as f32;
                        for (ch, sample) in frame.iter_mut().enumerate() {
                            let a = track.samples[idx * CHANNELS + ch];
                            let b = track.samples[(idx + 1) * CHANNELS + ch];
                            *sample = a + (b - a) * frac;
                        }
                        self.cursor += step;
                        wrote = true;
                    } else {
                        // End of track: park at the end and stop
                        self.cursor = frames.saturating_sub(1) as f64;
                        playing = false;
                        self.controls.playing.store(false, Ordering::Relaxed);
                    }
                }
            }
            if !wrote {
                frame.fill(0.0);
            }
        }

        // EQ: low shelf, peaking, high shelf in cascade
        for frame in out.chunks_exact_mut(CHANNELS) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let mut s = *sample;
                for band in 0..3 {
                    s = self.eq[band * CHANNELS + ch].process_sample(s);
                }
                *sample = s;
            }
        }

        // Effects always run so tails ring out across pauses
        self.fx.process(out);

        // Effective gain = volume x crossfade factor, smoothed per frame
        for frame in out.chunks_exact_mut(CHANNELS) {
            let g = self.gain.next();
            for sample in frame.iter_mut() {
                *sample *= g;
            }
        }

        self.publish_position();
    }

    fn drain_commands(&mut self) {
        // Keep only the newest load; a second load issued before the first
        // was consumed wins outright
        let mut last = None;
        while let Ok(command) = self.commands.try_recv() {
            last = Some(command);
        }
        if let Some(DeckCommand::Load(track)) = last {
            self.track = Some(track);
            self.cursor = 0.0;
            self.fx.reset();
            for filter in &mut self.eq {
                filter.reset();
            }
            self.controls.position_secs.store(0.0);
        }
    }

    fn apply_seeks(&mut self) {
        let user = self.controls.user_seek.swap(0, Ordering::AcqRel);
        if user != 0 {
            let (_, secs) = unpack_seek(user);
            self.seek_to(secs);
        }

        let wrap = self.controls.loop_seek.swap(0, Ordering::AcqRel);
        if wrap != 0 {
            let (generation, secs) = unpack_seek(wrap);
            // A wrap from a cancelled loop carries a stale generation
            if generation == self.controls.loop_generation.load(Ordering::Acquire) {
                self.seek_to(secs);
            }
        }
    }

    fn seek_to(&mut self, secs: f32) {
        if let Some(track) = &self.track {
            let max_frame = track.frames().saturating_sub(1) as f64;
            self.cursor = (secs.max(0.0) as f64 * track.sample_rate as f64).min(max_frame);
        }
    }

    fn refresh_eq(&mut self, force: bool) {
        for band in 0..3 {
            let db = self.controls.eq_gains_db[band].load();
            if !force && db == self.cached_eq_db[band] {
                continue;
            }
            self.cached_eq_db[band] = db;
            let coeffs = match band {
                0 => BiquadCoeffs::low_shelf(self.sample_rate, EQ_LOW_HZ, db, EQ_SHELF_Q),
                1 => BiquadCoeffs::peaking(self.sample_rate, EQ_MID_HZ, db, EQ_MID_Q),
                _ => BiquadCoeffs::high_shelf(self.sample_rate, EQ_HIGH_HZ, db, EQ_SHELF_Q),
            };
            for ch in 0..CHANNELS {
                self.eq[band * CHANNELS + ch].set_coeffs(coeffs);
            }
        }
    }

    fn refresh_fx(&mut self) {
        for (i, effect) in EffectName::ALL.into_iter().enumerate() {
            let active = self.controls.fx_active[i].load(Ordering::Relaxed);
            if active != self.cached_fx_active[i] {
                self.cached_fx_active[i] = active;
                self.fx.set_active(effect, active);
            }
            let mix = self.controls.fx_mix[i].load();
            if mix != self.cached_fx_mix[i] {
                self.cached_fx_mix[i] = mix;
                self.fx.set_mix(effect, mix);
            }
        }

        let hz = self.controls.filter_hz.load();
        if hz != self.cached_filter_hz {
            self.cached_filter_hz = hz;
            self.fx.set_filter_cutoff(hz);
        }
    }

    fn publish_position(&self) {
        if let Some(track) = &self.track {
            let secs = self.cursor / track.sample_rate as f64;
            self.controls.position_secs.store(secs as f32);
        }
    }
}

// ============================================================================
// CONTROL SIDE
// ============================================================================

/// The control-domain half of a deck
///
/// All setters clamp out-of-domain values to the documented ranges rather
/// than rejecting them; operations that need a loaded track no-op cleanly
/// when there is none.
pub struct Deck {
    id: DeckId,
    controls: Arc<DeckControls>,
    commands: Sender<DeckCommand>,
    loops: LoopScheduler,
    track: Option<Track>,
    seek_sequence: u32,
}

impl Deck {
    /// Create a deck, returning the control handle and its render strip
    pub fn new(id: DeckId, sample_rate: f32) -> (Deck, ChannelStrip) {
        let controls = Arc::new(DeckControls::new());
        let (tx, rx) = bounded(COMMAND_QUEUE_DEPTH);
        let strip = ChannelStrip::new(id, Arc::clone(&controls), rx, sample_rate);
        let deck = Deck {
            id,
            controls: Arc::clone(&controls),
            commands: tx,
            loops: LoopScheduler::new(id, controls),
            track: None,
            seek_sequence: 0,
        };
        (deck, strip)
    }

    pub fn id(&self) -> DeckId {
        self.id
    }

    pub fn controls(&self) -> &Arc<DeckControls> {
        &self.controls
    }

    /// Hand a decoded track to the render domain
    ///
    /// Resets position to 0 and clears any loop; volume, EQ, and effect
    /// state persist across loads.
    pub fn load_track(&mut self, decoded: DecodedTrack) -> Result<(), AudioError> {
        let track = decoded.track.clone();
        info!(deck = %self.id, track = %track.id, title = %track.title, "loading track");

        self.loops.clear_loop();
        self.controls.duration_secs.store(decoded.duration_secs() as f32);
        self.controls.position_secs.store(0.0);
        self.commands
            .try_send(DeckCommand::Load(decoded))
            .map_err(|e| AudioError::StreamError(format!("deck {} command queue: {e}", self.id)))?;
        self.controls.track_loaded.store(true, Ordering::Release);
        self.track = Some(track);
        Ok(())
    }

    pub fn track(&self) -> Option<&Track> {
        self.track.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.controls.playing.load(Ordering::Relaxed)
    }

    /// Toggle play/pause; no-op when no track is loaded
    pub fn toggle_play(&mut self) {
        if self.track.is_none() {
            debug!(deck = %self.id, "toggle_play without a track, ignoring");
            return;
        }
        let playing = !self.controls.playing.load(Ordering::Relaxed);
        self.controls.playing.store(playing, Ordering::Relaxed);
        debug!(deck = %self.id, playing, "playback toggled");
    }

    /// Pause playback, return to the start of the track, and clear any loop
    pub fn cue(&mut self) {
        if self.track.is_none() {
            debug!(deck = %self.id, "cue without a track, ignoring");
            return;
        }
        self.controls.playing.store(false, Ordering::Relaxed);
        self.loops.clear_loop();
        self.request_seek(0.0);
    }

    /// Seek to an absolute position in seconds, clamped to track bounds
    pub fn seek(&mut self, secs: f64) {
        let Some(track) = &self.track else {
            debug!(deck = %self.id, "seek without a track, ignoring");
            return;
        };
        let secs = secs.clamp(0.0, track.duration_secs) as f32;
        self.request_seek(secs);
    }

    fn request_seek(&mut self, secs: f32) {
        // Sequence 0 means empty, skip it on wrap
        self.seek_sequence = self.seek_sequence.wrapping_add(1);
        if self.seek_sequence == 0 {
            self.seek_sequence = 1;
        }
        self.controls.request_seek(self.seek_sequence, secs);
        self.controls.position_secs.store(secs);
    }

    pub fn set_volume(&self, volume: f32) {
        self.controls.volume.store(volume.clamp(0.0, 1.0));
    }

    pub fn volume(&self) -> f32 {
        self.controls.volume.load()
    }

    pub fn set_speed(&self, speed: f32) {
        self.controls
            .speed
            .store(speed.clamp(params::SPEED_MIN, params::SPEED_MAX));
    }

    pub fn speed(&self) -> f32 {
        self.controls.speed.load()
    }

    /// Set one EQ band's gain in dB, clamped to [-12, +12]
    pub fn set_eq(&self, band: EqBand, gain_db: f32) {
        let gain_db = gain_db.clamp(params::EQ_DB_MIN, params::EQ_DB_MAX);
        self.controls.eq_gains_db[band.index()].store(gain_db);
    }

    pub fn eq_gain(&self, band: EqBand) -> f32 {
        self.controls.eq_gains_db[band.index()].load()
    }

    pub fn set_effect_active(&self, effect: EffectName, active: bool) {
        self.controls.fx_active[effect.index()].store(active, Ordering::Relaxed);
    }

    pub fn effect_active(&self, effect: EffectName) -> bool {
        self.controls.fx_active[effect.index()].load(Ordering::Relaxed)
    }

    pub fn set_effect_mix(&self, effect: EffectName, mix: f32) {
        self.controls.fx_mix[effect.index()].store(mix.clamp(0.0, 1.0));
    }

    pub fn effect_mix(&self, effect: EffectName) -> f32 {
        self.controls.fx_mix[effect.index()].load()
    }

    /// Set the filter stage cutoff in Hz, clamped to [20, 20000]
    pub fn set_filter_frequency(&self, hz: f32) {
        self.controls
            .filter_hz
            .store(hz.clamp(params::FREQ_MIN, params::FREQ_MAX));
    }

    pub fn filter_frequency(&self) -> f32 {
        self.controls.filter_hz.load()
    }

    /// Arm a beat-length loop anchored at the current playback position
    pub fn set_loop(&mut self, beat: BeatLength) {
        self.loops.set_loop(beat);
    }

    pub fn clear_loop(&mut self) {
        self.loops.clear_loop();
    }

    pub fn loop_region(&self) -> Option<LoopRegion> {
        self.loops.region()
    }

    /// Drive one loop poll synchronously (render-free environments)
    pub fn poll_loop_once(&self) {
        self.loops.poll_once();
    }

    pub fn position_secs(&self) -> f64 {
        self.controls.position_secs.load() as f64
    }

    pub fn duration_secs(&self) -> f64 {
        self.track.as_ref().map_or(0.0, |t| t.duration_secs)
    }
}
