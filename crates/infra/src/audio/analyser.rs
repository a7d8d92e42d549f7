//! Frequency-domain analysis for visualization
//!
//! Consumes one deck's post-gain signal from a [`TapReader`], keeps the
//! most recent 256-sample mono window, and produces 128 magnitude bins
//! normalized to 0-255. Read-only with respect to the signal path; a slow
//! visualization frame rate just means older windows are skipped.

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tandem_core::domain::audio::CHANNELS;

use super::tap::TapReader;

/// dB floor mapped to bin value 0
const MIN_DB: f32 = -100.0;
/// dB ceiling mapped to bin value 255
const MAX_DB: f32 = -30.0;

/// Windowed FFT magnitude analyser over a tap stream
pub struct SpectrumAnalyser {
    reader: TapReader,
    fft: Arc<dyn Fft<f32>>,
    /// Ring of the latest `window_size` mono samples
    window: Vec<f32>,
    window_pos: usize,
    hann: Vec<f32>,
    fft_buf: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    drain: Vec<f32>,
    bins: Vec<u8>,
}

impl SpectrumAnalyser {
    /// Create an analyser with the given window size (must be a power of 2)
    pub fn new(reader: TapReader, window_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(window_size);
        let scratch_len = fft.get_inplace_scratch_len();

        let hann = (0..window_size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / window_size as f32;
                0.5 * (1.0 - phase.cos())
            })
            .collect();

        Self {
            reader,
            fft,
            window: vec![0.0; window_size],
            window_pos: 0,
            hann,
            fft_buf: vec![Complex::new(0.0, 0.0); window_size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            drain: vec![0.0; 4096],
            bins: vec![0; window_size / 2],
        }
    }

    /// Number of frequency bins (window size / 2)
    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    /// Center frequency of a bin at the given sample rate
    pub fn bin_frequency(&self, bin: usize, sample_rate: f32) -> f32 {
        bin as f32 * sample_rate / self.window.len() as f32
    }

    /// Drain the tap, transform the latest window, and refresh the bins
    ///
    /// Call once per visualization frame. Returns the bin slice.
    pub fn update(&mut self) -> &[u8] {
        // Fold the interleaved stereo stream to mono into the window ring
        loop {
            let n = self.reader.read(&mut self.drain);
            if n == 0 {
                break;
            }
            for frame in self.drain[..n].chunks_exact(CHANNELS) {
                let mono = (frame[0] + frame[1]) * 0.5;
                self.window[self.window_pos] = mono;
                self.window_pos = (self.window_pos + 1) % self.window.len();
            }
        }

        let size = self.window.len();
        for i in 0..size {
            // Oldest sample first so the window is time-ordered
            let sample = self.window[(self.window_pos + i) % size];
            self.fft_buf[i] = Complex::new(sample * self.hann[i], 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.fft_buf, &mut self.scratch);

        let scale = 1.0 / size as f32;
        for (bin, value) in self.bins.iter_mut().enumerate() {
            let magnitude = self.fft_buf[bin].norm() * scale;
            let db = if magnitude > 0.0 {
                20.0 * magnitude.log10()
            } else {
                MIN_DB
            };
            let normalized = ((db - MIN_DB) / (MAX_DB - MIN_DB)).clamp(0.0, 1.0);
            *value = (normalized * 255.0) as u8;
        }

        &self.bins
    }

    /// The most recently computed bins without re-analysing
    pub fn bins(&self) -> &[u8] {
        &self.bins
    }
}
