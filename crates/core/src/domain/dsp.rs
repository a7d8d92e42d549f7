//! Digital signal processing primitives
//!
//! This module provides the low-level building blocks of the per-deck
//! signal path:
//! - Biquad IIR filters (shelf/peaking for the EQ, lowpass for the filter
//!   effect)
//! - A one-pole gain smoother so parameter writes are glitch-free
//! - The logarithmic knob-position mapping for the filter frequency control
//!
//! All processing happens in-place on f32 buffers normalized to
//! [-1.0, 1.0], with zero allocations in the hot path.

pub mod fx;

use serde::{Deserialize, Serialize};

/// Parameter domains for the mixing engine
///
/// Out-of-domain values are always clamped to these ranges, matching the
/// control semantics of continuous physical controls.
pub mod params {
    /// EQ band gain range in dB
    pub const EQ_DB_MIN: f32 = -12.0;
    pub const EQ_DB_MAX: f32 = 12.0;

    /// Filter cutoff frequency range in Hz
    pub const FREQ_MIN: f32 = 20.0;
    pub const FREQ_MAX: f32 = 20000.0;

    /// Playback rate range
    pub const SPEED_MIN: f32 = 0.5;
    pub const SPEED_MAX: f32 = 1.5;

    /// Default smoothing time constant for audible gain changes, seconds
    pub const GAIN_SMOOTHING_SECS: f32 = 0.02;
}

// ============================================================================
// BIQUAD FILTER
// ============================================================================

/// Biquad filter coefficients
///
/// Direct Form I implementation for numerical stability.
/// Coefficients are pre-computed to avoid per-sample calculations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiquadCoeffs {
    /// Numerator coefficients
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    /// Denominator coefficients (a0 is normalized to 1.0)
    pub a1: f32,
    pub a2: f32,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        // Unity gain (no filtering)
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }
}

impl BiquadCoeffs {
    /// Calculate coefficients for a low shelf filter
    ///
    /// Boosts or cuts frequencies below the corner frequency.
    /// Gain is clamped to +/- 12 dB.
    #[must_use]
    pub fn low_shelf(sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> Self {
        let gain_db = gain_db.clamp(params::EQ_DB_MIN, params::EQ_DB_MAX);
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);

        let b0 = a * ((a + 1.0) - (a - 1.0) * cos_w0 + 2.0 * a.sqrt() * alpha);
        let b1 = 2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0);
        let b2 = a * ((a + 1.0) - (a - 1.0) * cos_w0 - 2.0 * a.sqrt() * alpha);

        let a0 = (a + 1.0) + (a - 1.0) * cos_w0 + 2.0 * a.sqrt() * alpha;
        let a1 = -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0);
        let a2 = (a + 1.0) + (a - 1.0) * cos_w0 - 2.0 * a.sqrt() * alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Calculate coefficients for a high shelf filter
    ///
    /// Boosts or cuts frequencies above the corner frequency.
    #[must_use]
    pub fn high_shelf(sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> Self {
        let gain_db = gain_db.clamp(params::EQ_DB_MIN, params::EQ_DB_MAX);
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);

        let b0 = a * ((a + 1.0) + (a - 1.0) * cos_w0 + 2.0 * a.sqrt() * alpha);
        let b1 = -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0);
        let b2 = a * ((a + 1.0) + (a - 1.0) * cos_w0 - 2.0 * a.sqrt() * alpha);

        let a0 = (a + 1.0) - (a - 1.0) * cos_w0 + 2.0 * a.sqrt() * alpha;
        let a1 = 2.0 * ((a - 1.0) - (a + 1.0) * cos_w0);
        let a2 = (a + 1.0) - (a - 1.0) * cos_w0 - 2.0 * a.sqrt() * alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Calculate coefficients for a peaking EQ filter
    ///
    /// Boosts or cuts frequencies around a center frequency.
    #[must_use]
    pub fn peaking(sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> Self {
        let gain_db = gain_db.clamp(params::EQ_DB_MIN, params::EQ_DB_MAX);
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);

        let b0 = 1.0 + alpha * a;
        let b1 = -2.0 * cos_w0;
        let b2 = 1.0 - alpha * a;

        let a0 = 1.0 + alpha / a;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha / a;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Calculate coefficients for a resonant lowpass filter
    ///
    /// Used by the filter effect stage; cutoff is clamped to [20, 20000] Hz
    /// and additionally kept below Nyquist.
    #[must_use]
    pub fn lowpass(sample_rate: f32, freq: f32, q: f32) -> Self {
        let freq = freq
            .clamp(params::FREQ_MIN, params::FREQ_MAX)
            .min(sample_rate * 0.49);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);

        let b0 = (1.0 - cos_w0) / 2.0;
        let b1 = 1.0 - cos_w0;
        let b2 = (1.0 - cos_w0) / 2.0;

        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Stateful biquad filter using Direct Form I
///
/// Direct Form I is chosen over Transposed Direct Form II for:
/// - Better numerical stability with low-frequency filters
/// - Easier coefficient updates without artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiquadFilter {
    coeffs: BiquadCoeffs,
    // Previous input samples (x[n-1], x[n-2])
    x1: f32,
    x2: f32,
    // Previous output samples (y[n-1], y[n-2])
    y1: f32,
    y2: f32,
}

impl BiquadFilter {
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Create a bypass filter (unity gain)
    pub fn bypass() -> Self {
        Self::new(BiquadCoeffs::default())
    }

    /// Update filter coefficients
    ///
    /// Can be called in real-time for parameter changes.
    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = coeffs;
    }

    /// Process a single sample
    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f32 {
        // Direct Form I: y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2]
        //                        - a1*y[n-1] - a2*y[n-2]
        let y = self.coeffs.b0 * x
            + self.coeffs.b1 * self.x1
            + self.coeffs.b2 * self.x2
            - self.coeffs.a1 * self.y1
            - self.coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;

        y
    }

    /// Process a buffer of samples
    pub fn process(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

// ============================================================================
// GAIN SMOOTHING
// ============================================================================

/// One-pole parameter smoother for glitch-free gain changes
///
/// Control-domain writes set a target; the render domain advances the
/// smoother once per frame. The smoothed value converges exponentially with
/// the configured time constant and snaps to the target once within 1e-4,
/// so bypass states settle at exactly 0.0 / 1.0.
#[derive(Debug, Clone)]
pub struct SmoothedGain {
    current: f32,
    target: f32,
    coeff: f32,
}

impl SmoothedGain {
    const SNAP_EPSILON: f32 = 1e-4;

    /// Create a smoother starting (and resting) at `initial`
    pub fn new(initial: f32, time_constant_secs: f32, sample_rate: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            coeff: (-1.0 / (time_constant_secs * sample_rate)).exp(),
        }
    }

    /// Set a new target; the value ramps there over the time constant
    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    /// Jump straight to a value with no ramp (initialization only)
    pub fn snap_to(&mut self, value: f32) {
        self.current = value;
        self.target = value;
    }

    /// Advance one sample and return the smoothed value
    #[inline]
    pub fn next(&mut self) -> f32 {
        if self.current != self.target {
            self.current = self.coeff * self.current + (1.0 - self.coeff) * self.target;
            if (self.current - self.target).abs() < Self::SNAP_EPSILON {
                self.current = self.target;
            }
        }
        self.current
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// True once the ramp has fully settled
    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }
}

// ============================================================================
// KNOB-POSITION MAPPING
// ============================================================================

/// Convert a normalized knob position in [0,1] to a frequency in Hz
///
/// `hz = 20 * 1000^position`, so linear knob motion yields perceptually
/// linear frequency change: position 0 -> 20 Hz, position 1 -> 20 kHz.
pub fn knob_to_hz(position: f32) -> f32 {
    let position = position.clamp(0.0, 1.0);
    params::FREQ_MIN * (params::FREQ_MAX / params::FREQ_MIN).powf(position)
}

/// Convert a frequency in Hz to a normalized knob position in [0,1]
///
/// Inverse of [`knob_to_hz`]: `position = ln(hz/20) / ln(1000)`.
pub fn hz_to_knob(hz: f32) -> f32 {
    let hz = hz.clamp(params::FREQ_MIN, params::FREQ_MAX);
    (hz / params::FREQ_MIN).ln() / (params::FREQ_MAX / params::FREQ_MIN).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAMPLE_RATE: f32 = 48000.0;

    fn generate_sine(samples: usize, frequency: f32) -> Vec<f32> {
        (0..samples)
            .map(|i| (2.0 * std::f32::consts::PI * frequency * i as f32 / SAMPLE_RATE).sin())
            .collect()
    }

    fn peak(buffer: &[f32]) -> f32 {
        buffer.iter().map(|s| s.abs()).fold(0.0_f32, f32::max)
    }

    // -------------------------------------------------------------------------
    // Biquad tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_biquad_unity() {
        let mut filter = BiquadFilter::bypass();

        let input = vec![0.5, 0.3, 0.7];
        let mut output = input.clone();
        filter.process(&mut output);

        for (in_sample, out_sample) in input.iter().zip(output.iter()) {
            assert!((in_sample - out_sample).abs() < 0.01);
        }
    }

    #[test]
    fn test_biquad_reset() {
        let coeffs = BiquadCoeffs::low_shelf(SAMPLE_RATE, 320.0, 6.0, 0.707);
        let mut filter = BiquadFilter::new(coeffs);

        let mut buffer = vec![0.5; 100];
        filter.process(&mut buffer);

        filter.reset();
        let mut silence = vec![0.0; 10];
        filter.process(&mut silence);

        assert!(silence.iter().all(|&s| s.abs() < 0.01));
    }

    #[test]
    fn test_low_shelf_boosts_low_frequencies() {
        let coeffs = BiquadCoeffs::low_shelf(SAMPLE_RATE, 320.0, 12.0, 0.707);
        let mut filter = BiquadFilter::new(coeffs);

        let mut signal = generate_sine(4096, 100.0);
        let original_peak = peak(&signal);
        filter.process(&mut signal);

        // +12 dB below the shelf corner
        assert!(peak(&signal[2048..]) > original_peak * 1.5);
    }

    #[test]
    fn test_lowpass_attenuates_above_cutoff() {
        let coeffs = BiquadCoeffs::lowpass(SAMPLE_RATE, 1000.0, 1.0);
        let mut filter = BiquadFilter::new(coeffs);

        let mut high = generate_sine(4096, 10000.0);
        filter.process(&mut high);
        assert!(peak(&high[2048..]) < 0.1);

        filter.reset();
        filter.set_coeffs(BiquadCoeffs::lowpass(SAMPLE_RATE, 1000.0, 1.0));
        let mut low = generate_sine(4096, 100.0);
        filter.process(&mut low);
        assert!(peak(&low[2048..]) > 0.8);
    }

    #[test]
    fn test_lowpass_cutoff_clamping() {
        // Out-of-domain cutoff must clamp, never produce unstable
        // coefficients
        let coeffs = BiquadCoeffs::lowpass(SAMPLE_RATE, 1e9, 1.0);
        let reference = BiquadCoeffs::lowpass(SAMPLE_RATE, params::FREQ_MAX, 1.0);
        assert_eq!(coeffs, reference);
    }

    // -------------------------------------------------------------------------
    // Gain smoothing tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_smoothed_gain_converges_and_snaps() {
        let mut gain = SmoothedGain::new(0.0, params::GAIN_SMOOTHING_SECS, SAMPLE_RATE);
        gain.set_target(1.0);

        // 0.5 s is far beyond the 20 ms time constant
        for _ in 0..24000 {
            gain.next();
        }
        assert_eq!(gain.value(), 1.0);
        assert!(gain.is_settled());
    }

    #[test]
    fn test_smoothed_gain_no_step() {
        let mut gain = SmoothedGain::new(0.0, params::GAIN_SMOOTHING_SECS, SAMPLE_RATE);
        gain.set_target(1.0);

        // First sample after the write must move only a small fraction
        let first = gain.next();
        assert!(first > 0.0);
        assert!(first < 0.01);
    }

    #[test]
    fn test_smoothed_gain_snap_to() {
        let mut gain = SmoothedGain::new(0.3, params::GAIN_SMOOTHING_SECS, SAMPLE_RATE);
        gain.snap_to(0.0);
        assert_eq!(gain.next(), 0.0);
    }

    // -------------------------------------------------------------------------
    // Knob mapping tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_knob_boundaries() {
        assert!((knob_to_hz(0.0) - 20.0).abs() < 1e-3);
        assert!((knob_to_hz(1.0) - 20000.0).abs() < 1.0);
        assert!((hz_to_knob(20.0) - 0.0).abs() < 1e-6);
        assert!((hz_to_knob(20000.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_knob_midpoint() {
        // Geometric midpoint of [20, 20000] is 20 * sqrt(1000)
        let hz = knob_to_hz(0.5);
        assert!((hz - 20.0 * 1000.0_f32.sqrt()).abs() < 1.0);
    }

    proptest! {
        #[test]
        fn prop_knob_round_trip(position in 0.0_f32..=1.0) {
            let hz = knob_to_hz(position);
            prop_assert!((20.0..=20000.5).contains(&hz));
            let recovered = hz_to_knob(hz);
            prop_assert!((recovered - position).abs() < 1e-4);
        }
    }
}
