//! Two-deck mixer and final summing bus
//!
//! The mixer pairs two decks behind a single crossfader. Like the decks it
//! is split across the concurrency domains: [`Mixer`] is the control-side
//! handle, [`MixBus`] the render-side summing point. The crossfade law is
//! a linear taper with unity at center — both decks run at full relative
//! volume when the fader sits at 0.5, with no power-preserving dip.

use tracing::debug;

use crate::domain::audio::CHANNELS;
use crate::domain::deck::{ChannelStrip, Deck, DeckId};

/// Center position of the crossfader
pub const CROSSFADER_CENTER: f32 = 0.5;

/// Crossfade factor for one deck at a fader position in [0, 1]
///
/// Deck A: `min(1, (1 - c) * 2)`, deck B: `min(1, c * 2)`. At 0 only A
/// plays, at 1 only B, and at 0.5 both factors are exactly 1.0.
pub fn crossfader_factor(deck: DeckId, crossfader: f32) -> f32 {
    let crossfader = crossfader.clamp(0.0, 1.0);
    match deck {
        DeckId::A => ((1.0 - crossfader) * 2.0).min(1.0),
        DeckId::B => (crossfader * 2.0).min(1.0),
    }
}

/// Read-only sink for a deck's post-gain signal
///
/// Implementations receive every rendered buffer and must never block;
/// the render domain calls `push` from the audio callback.
pub trait AnalysisTap: Send {
    fn push(&mut self, interleaved: &[f32]);
}

/// Control-domain mixer handle
///
/// Owns both deck handles and the crossfader. Every crossfader write
/// recomputes and republishes both decks' crossfade factors synchronously.
pub struct Mixer {
    deck_a: Deck,
    deck_b: Deck,
    crossfader: f32,
}

impl Mixer {
    /// Create the mixer and its render-side bus
    pub fn new(sample_rate: f32) -> (Mixer, MixBus) {
        let (deck_a, strip_a) = Deck::new(DeckId::A, sample_rate);
        let (deck_b, strip_b) = Deck::new(DeckId::B, sample_rate);
        let mixer = Mixer {
            deck_a,
            deck_b,
            crossfader: CROSSFADER_CENTER,
        };
        mixer.publish_crossfade();
        let bus = MixBus::new(strip_a, strip_b);
        (mixer, bus)
    }

    pub fn deck(&self, id: DeckId) -> &Deck {
        match id {
            DeckId::A => &self.deck_a,
            DeckId::B => &self.deck_b,
        }
    }

    pub fn deck_mut(&mut self, id: DeckId) -> &mut Deck {
        match id {
            DeckId::A => &mut self.deck_a,
            DeckId::B => &mut self.deck_b,
        }
    }

    /// Move the crossfader, clamped to [0, 1]
    pub fn set_crossfader(&mut self, position: f32) {
        self.crossfader = position.clamp(0.0, 1.0);
        self.publish_crossfade();
        debug!(crossfader = self.crossfader, "crossfader moved");
    }

    /// Snap the crossfader back to exact center (double-center gesture)
    pub fn reset_crossfader(&mut self) {
        self.set_crossfader(CROSSFADER_CENTER);
    }

    pub fn crossfader(&self) -> f32 {
        self.crossfader
    }

    /// Effective output gain of one deck: volume x crossfade factor
    pub fn effective_gain(&self, id: DeckId) -> f32 {
        self.deck(id).volume() * crossfader_factor(id, self.crossfader)
    }

    fn publish_crossfade(&self) {
        self.deck_a
            .controls()
            .xfade_factor
            .store(crossfader_factor(DeckId::A, self.crossfader));
        self.deck_b
            .controls()
            .xfade_factor
            .store(crossfader_factor(DeckId::B, self.crossfader));
    }
}

/// Render-domain summing bus
///
/// Renders both channel strips into preallocated scratch buffers, feeds
/// the per-deck analysis taps, and sums the result into the output. The
/// summation point only reads each strip's own gain; the decks never wait
/// on each other.
pub struct MixBus {
    strip_a: ChannelStrip,
    strip_b: ChannelStrip,
    tap_a: Option<Box<dyn AnalysisTap>>,
    tap_b: Option<Box<dyn AnalysisTap>>,
    scratch_a: Vec<f32>,
    scratch_b: Vec<f32>,
}

impl MixBus {
    /// Frames of scratch per deck; longer output buffers render in chunks
    const SCRATCH_FRAMES: usize = 4096;

    fn new(strip_a: ChannelStrip, strip_b: ChannelStrip) -> Self {
        Self {
            strip_a,
            strip_b,
            tap_a: None,
            tap_b: None,
            scratch_a: vec![0.0; Self::SCRATCH_FRAMES * CHANNELS],
            scratch_b: vec![0.0; Self::SCRATCH_FRAMES * CHANNELS],
        }
    }

    /// Attach an analysis tap to one deck's post-gain signal
    pub fn set_tap(&mut self, deck: DeckId, tap: Box<dyn AnalysisTap>) {
        match deck {
            DeckId::A => self.tap_a = Some(tap),
            DeckId::B => self.tap_b = Some(tap),
        }
    }

    /// Render the mixed output into an interleaved stereo buffer
    pub fn render(&mut self, out: &mut [f32]) {
        for chunk in out.chunks_mut(Self::SCRATCH_FRAMES * CHANNELS) {
            let a = &mut self.scratch_a[..chunk.len()];
            let b = &mut self.scratch_b[..chunk.len()];
            self.strip_a.render(a);
            self.strip_b.render(b);

            if let Some(tap) = &mut self.tap_a {
                tap.push(a);
            }
            if let Some(tap) = &mut self.tap_b {
                tap.push(b);
            }

            for ((sample, &sa), &sb) in chunk.iter_mut().zip(a.iter()).zip(b.iter()) {
                *sample = sa + sb;
            }
        }
    }
}
