//! Insert effects for the per-deck processing chain
//!
//! Four effect nodes (echo, reverb, filter, flanger), each wrapped in a
//! [`DryWetEffect`] that mixes the processed signal against the untouched
//! input with complementary smoothed gains. Bypass is gain-zeroing of the
//! wet branch, never graph rewiring, so the chain topology is fixed for
//! the lifetime of a deck.
//!
//! All buffers are interleaved stereo f32.

use std::str::FromStr;
use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use super::{params, BiquadCoeffs, BiquadFilter, SmoothedGain};
use crate::domain::audio::CHANNELS;

/// Echo delay time in seconds
pub const ECHO_DELAY_SECS: f32 = 0.375;
/// Echo feedback gain
pub const ECHO_FEEDBACK: f32 = 0.4;
/// Reverb impulse response length in seconds
pub const REVERB_IR_SECS: f32 = 2.0;
/// Reverb impulse response decay exponent
pub const REVERB_DECAY: f32 = 2.0;
/// Filter effect resonance
pub const FILTER_Q: f32 = 1.0;
/// Filter effect default cutoff in Hz
pub const FILTER_DEFAULT_HZ: f32 = 1000.0;
/// Flanger base delay in seconds
pub const FLANGER_BASE_DELAY_SECS: f32 = 0.005;
/// Flanger LFO rate in Hz
pub const FLANGER_LFO_HZ: f32 = 0.5;
/// Flanger modulation depth in seconds
pub const FLANGER_DEPTH_SECS: f32 = 0.003;

/// Default wet mix per effect at initialization
pub const ECHO_DEFAULT_MIX: f32 = 0.3;
pub const REVERB_DEFAULT_MIX: f32 = 0.3;
pub const FILTER_DEFAULT_MIX: f32 = 1.0;
pub const FLANGER_DEFAULT_MIX: f32 = 0.3;

/// The four insert effects, in chain order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectName {
    Echo,
    Reverb,
    Filter,
    Flanger,
}

impl EffectName {
    pub const ALL: [EffectName; 4] = [
        EffectName::Echo,
        EffectName::Reverb,
        EffectName::Filter,
        EffectName::Flanger,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EffectName::Echo => "echo",
            EffectName::Reverb => "reverb",
            EffectName::Filter => "filter",
            EffectName::Flanger => "flanger",
        }
    }

    /// Position of the effect in the fixed chain order
    pub fn index(&self) -> usize {
        match self {
            EffectName::Echo => 0,
            EffectName::Reverb => 1,
            EffectName::Filter => 2,
            EffectName::Flanger => 3,
        }
    }
}

impl FromStr for EffectName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "echo" => Ok(EffectName::Echo),
            "reverb" => Ok(EffectName::Reverb),
            "filter" => Ok(EffectName::Filter),
            "flanger" => Ok(EffectName::Flanger),
            other => Err(format!("unknown effect: {other}")),
        }
    }
}

impl std::fmt::Display for EffectName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A wet-path DSP node
///
/// Implementations process interleaved stereo buffers in place, producing
/// 100% wet output; dry/wet blending lives in [`DryWetEffect`].
pub trait FxNode {
    /// Process an interleaved stereo buffer in place
    fn process(&mut self, buffer: &mut [f32]);

    /// Clear all internal state (delay lines, filter history)
    fn reset(&mut self);

    fn name(&self) -> &'static str;
}

// ============================================================================
// ECHO
// ============================================================================

/// Feedback delay line
///
/// The wet output is the delayed signal; feedback re-injects it into the
/// delay line so repeats decay by the feedback gain each pass.
pub struct Echo {
    buffers: [Vec<f32>; CHANNELS],
    pos: usize,
    feedback: f32,
}

impl Echo {
    pub fn new(sample_rate: f32) -> Self {
        let delay_samples = (ECHO_DELAY_SECS * sample_rate).round().max(1.0) as usize;
        Self {
            buffers: [vec![0.0; delay_samples], vec![0.0; delay_samples]],
            pos: 0,
            feedback: ECHO_FEEDBACK,
        }
    }
}

impl FxNode for Echo {
    fn process(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(CHANNELS) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let delayed = self.buffers[ch][self.pos];
                self.buffers[ch][self.pos] = *sample + delayed * self.feedback;
                *sample = delayed;
            }
            self.pos += 1;
            if self.pos == self.buffers[0].len() {
                self.pos = 0;
            }
        }
    }

    fn reset(&mut self) {
        for buffer in &mut self.buffers {
            buffer.fill(0.0);
        }
        self.pos = 0;
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

// ============================================================================
// REVERB
// ============================================================================

/// Generate a synthetic stereo impulse response
///
/// Each sample is uniform random noise in [-1, 1] shaped by the envelope
/// `(1 - i/length)^decay`, giving an exponential-style energy decay over
/// `duration_secs`.
pub fn generate_impulse_response(
    sample_rate: u32,
    duration_secs: f32,
    decay: f32,
) -> [Vec<f32>; CHANNELS] {
    let length = (sample_rate as f32 * duration_secs) as usize;
    let mut channels: [Vec<f32>; CHANNELS] = [Vec::with_capacity(length), Vec::with_capacity(length)];
    for channel in &mut channels {
        for i in 0..length {
            let envelope = (1.0 - i as f32 / length as f32).powf(decay);
            channel.push((fastrand::f32() * 2.0 - 1.0) * envelope);
        }
    }
    channels
}

/// Uniform partitioned FFT convolver (overlap-add)
///
/// The impulse response is split into fixed-size partitions whose spectra
/// are multiplied against a frequency-domain delay line of recent input
/// blocks. Output is delayed by one partition of staging latency. All
/// buffers are allocated up front; `process_sample` never allocates.
struct Convolver {
    block: usize,
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    ir_spectra: Vec<Vec<Complex<f32>>>,
    input_spectra: Vec<Vec<Complex<f32>>>,
    ring_pos: usize,
    stage_in: Vec<f32>,
    stage_out: Vec<f32>,
    stage_pos: usize,
    overlap: Vec<f32>,
    time_buf: Vec<Complex<f32>>,
    freq_accum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl Convolver {
    fn new(impulse_response: &[f32], block: usize) -> Self {
        let fft_size = block * 2;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let ifft = planner.plan_fft_inverse(fft_size);

        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());
        let mut scratch = vec![Complex::new(0.0, 0.0); scratch_len];

        let partitions = impulse_response.len().div_ceil(block).max(1);
        let mut ir_spectra = Vec::with_capacity(partitions);
        for chunk in 0..partitions {
            let start = chunk * block;
            let end = (start + block).min(impulse_response.len());
            let mut spectrum = vec![Complex::new(0.0, 0.0); fft_size];
            for (i, &tap) in impulse_response[start..end].iter().enumerate() {
                spectrum[i] = Complex::new(tap, 0.0);
            }
            fft.process_with_scratch(&mut spectrum, &mut scratch);
            ir_spectra.push(spectrum);
        }

        Self {
            block,
            fft_size,
            fft,
            ifft,
            input_spectra: vec![vec![Complex::new(0.0, 0.0); fft_size]; partitions],
            ir_spectra,
            ring_pos: 0,
            stage_in: vec![0.0; block],
            stage_out: vec![0.0; block],
            stage_pos: 0,
            overlap: vec![0.0; block],
            time_buf: vec![Complex::new(0.0, 0.0); fft_size],
            freq_accum: vec![Complex::new(0.0, 0.0); fft_size],
            scratch,
        }
    }

    #[inline]
    fn process_sample(&mut self, input: f32) -> f32 {
        let output = self.stage_out[self.stage_pos];
        self.stage_in[self.stage_pos] = input;
        self.stage_pos += 1;
        if self.stage_pos == self.block {
            self.process_block();
            self.stage_pos = 0;
        }
        output
    }

    fn process_block(&mut self) {
        // Transform the staged input block (zero-padded to fft_size)
        for (slot, &sample) in self.time_buf.iter_mut().zip(self.stage_in.iter()) {
            *slot = Complex::new(sample, 0.0);
        }
        for slot in self.time_buf[self.block..].iter_mut() {
            *slot = Complex::new(0.0, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.time_buf, &mut self.scratch);

        // Most recent spectrum goes to ring_pos; partition p pairs with the
        // spectrum from p blocks ago
        let partitions = self.ir_spectra.len();
        self.ring_pos = (self.ring_pos + partitions - 1) % partitions;
        self.input_spectra[self.ring_pos].copy_from_slice(&self.time_buf);

        self.freq_accum.fill(Complex::new(0.0, 0.0));
        for (p, ir_spectrum) in self.ir_spectra.iter().enumerate() {
            let input_spectrum = &self.input_spectra[(self.ring_pos + p) % partitions];
            for ((accum, &input), &ir) in self
                .freq_accum
                .iter_mut()
                .zip(input_spectrum.iter())
                .zip(ir_spectrum.iter())
            {
                *accum += input * ir;
            }
        }

        self.time_buf.copy_from_slice(&self.freq_accum);
        self.ifft
            .process_with_scratch(&mut self.time_buf, &mut self.scratch);

        let scale = 1.0 / self.fft_size as f32;
        for i in 0..self.block {
            self.stage_out[i] = self.time_buf[i].re * scale + self.overlap[i];
            self.overlap[i] = self.time_buf[self.block + i].re * scale;
        }
    }

    fn reset(&mut self) {
        for spectrum in &mut self.input_spectra {
            spectrum.fill(Complex::new(0.0, 0.0));
        }
        self.stage_in.fill(0.0);
        self.stage_out.fill(0.0);
        self.overlap.fill(0.0);
        self.stage_pos = 0;
        self.ring_pos = 0;
    }
}

/// Convolution reverb over a synthetic noise impulse response
pub struct Reverb {
    convolvers: [Convolver; CHANNELS],
}

impl Reverb {
    /// Partition size for the convolver; one partition of output latency
    const PARTITION_SIZE: usize = 512;

    pub fn new(sample_rate: u32) -> Self {
        let ir = generate_impulse_response(sample_rate, REVERB_IR_SECS, REVERB_DECAY);
        Self::with_impulse_response(&ir)
    }

    /// Build a reverb around a caller-provided impulse response
    pub fn with_impulse_response(ir: &[Vec<f32>; CHANNELS]) -> Self {
        Self {
            convolvers: [
                Convolver::new(&ir[0], Self::PARTITION_SIZE),
                Convolver::new(&ir[1], Self::PARTITION_SIZE),
            ],
        }
    }
}

impl FxNode for Reverb {
    fn process(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(CHANNELS) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = self.convolvers[ch].process_sample(*sample);
            }
        }
    }

    fn reset(&mut self) {
        for convolver in &mut self.convolvers {
            convolver.reset();
        }
    }

    fn name(&self) -> &'static str {
        "reverb"
    }
}

// ============================================================================
// FILTER
// ============================================================================

/// Resonant lowpass filter stage
///
/// Runs at full wet mix by default so the cutoff sweep acts directly on
/// the signal when engaged.
pub struct Filter {
    sample_rate: f32,
    cutoff_hz: f32,
    filters: [BiquadFilter; CHANNELS],
}

impl Filter {
    pub fn new(sample_rate: f32) -> Self {
        let coeffs = BiquadCoeffs::lowpass(sample_rate, FILTER_DEFAULT_HZ, FILTER_Q);
        Self {
            sample_rate,
            cutoff_hz: FILTER_DEFAULT_HZ,
            filters: [BiquadFilter::new(coeffs), BiquadFilter::new(coeffs)],
        }
    }

    /// Update the cutoff frequency, clamped to [20, 20000] Hz
    pub fn set_cutoff(&mut self, hz: f32) {
        self.cutoff_hz = hz.clamp(params::FREQ_MIN, params::FREQ_MAX);
        let coeffs = BiquadCoeffs::lowpass(self.sample_rate, self.cutoff_hz, FILTER_Q);
        for filter in &mut self.filters {
            filter.set_coeffs(coeffs);
        }
    }

    pub fn cutoff(&self) -> f32 {
        self.cutoff_hz
    }
}

impl FxNode for Filter {
    fn process(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(CHANNELS) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = self.filters[ch].process_sample(*sample);
            }
        }
    }

    fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset();
        }
    }

    fn name(&self) -> &'static str {
        "filter"
    }
}

// ============================================================================
// FLANGER
// ============================================================================

/// Modulated short delay
///
/// A 0.5 Hz sine LFO sweeps the delay time around 5 ms with 3 ms depth;
/// reads are fractional with linear interpolation.
pub struct Flanger {
    buffers: [Vec<f32>; CHANNELS],
    write_pos: usize,
    sample_rate: f32,
    lfo_phase: f32,
    lfo_increment: f32,
}

impl Flanger {
    pub fn new(sample_rate: f32) -> Self {
        let max_delay = ((FLANGER_BASE_DELAY_SECS + FLANGER_DEPTH_SECS) * sample_rate) as usize + 2;
        Self {
            buffers: [vec![0.0; max_delay], vec![0.0; max_delay]],
            write_pos: 0,
            sample_rate,
            lfo_phase: 0.0,
            lfo_increment: 2.0 * std::f32::consts::PI * FLANGER_LFO_HZ / sample_rate,
        }
    }
}

impl FxNode for Flanger {
    fn process(&mut self, buffer: &mut [f32]) {
        let capacity = self.buffers[0].len();
        for frame in buffer.chunks_exact_mut(CHANNELS) {
            let delay_secs = FLANGER_BASE_DELAY_SECS + FLANGER_DEPTH_SECS * self.lfo_phase.sin();
            let delay_samples = (delay_secs * self.sample_rate).max(1.0);
            let whole = delay_samples as usize;
            let frac = delay_samples - whole as f32;

            for (ch, sample) in frame.iter_mut().enumerate() {
                self.buffers[ch][self.write_pos] = *sample;
                let read_a = (self.write_pos + capacity - whole) % capacity;
                let read_b = (read_a + capacity - 1) % capacity;
                *sample = self.buffers[ch][read_a] * (1.0 - frac) + self.buffers[ch][read_b] * frac;
            }

            self.write_pos = (self.write_pos + 1) % capacity;
            self.lfo_phase += self.lfo_increment;
            if self.lfo_phase > 2.0 * std::f32::consts::PI {
                self.lfo_phase -= 2.0 * std::f32::consts::PI;
            }
        }
    }

    fn reset(&mut self) {
        for buffer in &mut self.buffers {
            buffer.fill(0.0);
        }
        self.write_pos = 0;
        self.lfo_phase = 0.0;
    }

    fn name(&self) -> &'static str {
        "flanger"
    }
}

// ============================================================================
// DRY/WET WRAPPER
// ============================================================================

/// Parallel dry/wet routing around one effect node
///
/// Active: wet gain = mix, dry gain = 1 - mix. Inactive: wet = 0, dry = 1.
/// Gains ramp with the engine smoothing time constant and settle exactly,
/// so a bypassed effect is a bit-exact passthrough once the ramp finishes.
pub struct DryWetEffect<E: FxNode> {
    effect: E,
    active: bool,
    mix: f32,
    dry_gain: SmoothedGain,
    wet_gain: SmoothedGain,
    scratch: Vec<f32>,
    tail_cleared: bool,
}

impl<E: FxNode> DryWetEffect<E> {
    const SCRATCH_FRAMES: usize = 4096;

    pub fn new(effect: E, default_mix: f32, sample_rate: f32) -> Self {
        Self {
            effect,
            active: false,
            mix: default_mix.clamp(0.0, 1.0),
            dry_gain: SmoothedGain::new(1.0, params::GAIN_SMOOTHING_SECS, sample_rate),
            wet_gain: SmoothedGain::new(0.0, params::GAIN_SMOOTHING_SECS, sample_rate),
            scratch: vec![0.0; Self::SCRATCH_FRAMES * CHANNELS],
            tail_cleared: true,
        }
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        self.apply_targets();
    }

    pub fn set_mix(&mut self, mix: f32) {
        self.mix = mix.clamp(0.0, 1.0);
        if self.active {
            self.apply_targets();
        }
    }

    fn apply_targets(&mut self) {
        if self.active {
            self.wet_gain.set_target(self.mix);
            self.dry_gain.set_target(1.0 - self.mix);
        } else {
            self.wet_gain.set_target(0.0);
            self.dry_gain.set_target(1.0);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn mix(&self) -> f32 {
        self.mix
    }

    pub fn effect(&self) -> &E {
        &self.effect
    }

    pub fn effect_mut(&mut self) -> &mut E {
        &mut self.effect
    }

    /// Process an interleaved stereo buffer in place
    pub fn process(&mut self, buffer: &mut [f32]) {
        let bypassed = !self.active
            && self.wet_gain.is_settled()
            && self.wet_gain.value() == 0.0;
        if bypassed {
            // Full bypass; clear the node once so a later re-activation
            // does not replay a stale tail
            if !self.tail_cleared {
                self.effect.reset();
                self.tail_cleared = true;
            }
            return;
        }
        self.tail_cleared = false;

        for chunk in buffer.chunks_mut(self.scratch.len()) {
            let scratch = &mut self.scratch[..chunk.len()];
            scratch.copy_from_slice(chunk);
            self.effect.process(scratch);

            for (frame, wet_frame) in chunk
                .chunks_exact_mut(CHANNELS)
                .zip(scratch.chunks_exact(CHANNELS))
            {
                let dry = self.dry_gain.next();
                let wet = self.wet_gain.next();
                for (sample, &wet_sample) in frame.iter_mut().zip(wet_frame.iter()) {
                    *sample = *sample * dry + wet_sample * wet;
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.effect.reset();
        self.tail_cleared = true;
    }
}

// ============================================================================
// EFFECTS CHAIN
// ============================================================================

/// The fixed per-deck insert chain: echo, reverb, filter, flanger
///
/// Every stage runs on every buffer whether active or not; bypass is the
/// dry/wet wrapper's gain-zeroing, so latency and topology never change
/// with parameter edits.
pub struct FxChain {
    echo: DryWetEffect<Echo>,
    reverb: DryWetEffect<Reverb>,
    filter: DryWetEffect<Filter>,
    flanger: DryWetEffect<Flanger>,
}

impl FxChain {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            echo: DryWetEffect::new(Echo::new(sample_rate), ECHO_DEFAULT_MIX, sample_rate),
            reverb: DryWetEffect::new(
                Reverb::new(sample_rate as u32),
                REVERB_DEFAULT_MIX,
                sample_rate,
            ),
            filter: DryWetEffect::new(Filter::new(sample_rate), FILTER_DEFAULT_MIX, sample_rate),
            flanger: DryWetEffect::new(Flanger::new(sample_rate), FLANGER_DEFAULT_MIX, sample_rate),
        }
    }

    /// Process an interleaved stereo buffer through all four stages in order
    pub fn process(&mut self, buffer: &mut [f32]) {
        self.echo.process(buffer);
        self.reverb.process(buffer);
        self.filter.process(buffer);
        self.flanger.process(buffer);
    }

    pub fn set_active(&mut self, effect: EffectName, active: bool) {
        match effect {
            EffectName::Echo => self.echo.set_active(active),
            EffectName::Reverb => self.reverb.set_active(active),
            EffectName::Filter => self.filter.set_active(active),
            EffectName::Flanger => self.flanger.set_active(active),
        }
    }

    pub fn set_mix(&mut self, effect: EffectName, mix: f32) {
        match effect {
            EffectName::Echo => self.echo.set_mix(mix),
            EffectName::Reverb => self.reverb.set_mix(mix),
            EffectName::Filter => self.filter.set_mix(mix),
            EffectName::Flanger => self.flanger.set_mix(mix),
        }
    }

    pub fn is_active(&self, effect: EffectName) -> bool {
        match effect {
            EffectName::Echo => self.echo.is_active(),
            EffectName::Reverb => self.reverb.is_active(),
            EffectName::Filter => self.filter.is_active(),
            EffectName::Flanger => self.flanger.is_active(),
        }
    }

    pub fn mix(&self, effect: EffectName) -> f32 {
        match effect {
            EffectName::Echo => self.echo.mix(),
            EffectName::Reverb => self.reverb.mix(),
            EffectName::Filter => self.filter.mix(),
            EffectName::Flanger => self.flanger.mix(),
        }
    }

    /// Update the filter stage cutoff without touching its mix
    pub fn set_filter_cutoff(&mut self, hz: f32) {
        self.filter.effect_mut().set_cutoff(hz);
    }

    pub fn filter_cutoff(&self) -> f32 {
        self.filter.effect().cutoff()
    }

    /// Clear all delay lines and filter history
    pub fn reset(&mut self) {
        self.echo.reset();
        self.reverb.reset();
        self.filter.reset();
        self.flanger.reset();
    }
}
