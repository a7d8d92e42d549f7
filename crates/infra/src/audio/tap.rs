//! Lock-free analysis tap between the render domain and visualization
//!
//! A split single-producer single-consumer ring buffer: the [`TapWriter`]
//! half lives inside the audio callback (via the core `AnalysisTap` trait)
//! and the [`TapReader`] half feeds the spectrum analyser. Uses crossbeam's
//! cache-padded counters to prevent false sharing between cores.
//!
//! Performance characteristics:
//! - Wait-free for both halves
//! - No allocations in the hot path
//! - Overwrite-latest semantics overall: the reader drains everything and
//!   keeps only the newest window, so a slow reader never backpressures
//!   the audio thread

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tandem_core::domain::mixer::AnalysisTap;

struct Shared {
    /// Buffer storage; the writer and reader touch disjoint index ranges
    buffer: UnsafeCell<Box<[f32]>>,
    /// Write position (cache-padded to prevent false sharing)
    write_pos: CachePadded<AtomicUsize>,
    /// Read position (cache-padded to prevent false sharing)
    read_pos: CachePadded<AtomicUsize>,
    /// Capacity (power of 2 for fast modulo)
    capacity: usize,
    mask: usize,
}

// SAFETY: single producer, single consumer. The writer only writes slots in
// [write_pos, write_pos + available_write) and the reader only reads slots
// in [read_pos, read_pos + available_read); the position atomics order the
// two ranges so they never overlap.
unsafe impl Sync for Shared {}
unsafe impl Send for Shared {}

/// Create a connected writer/reader pair
///
/// Capacity is rounded up to the next power of 2.
pub fn tap_pair(mut capacity: usize) -> (TapWriter, TapReader) {
    if !capacity.is_power_of_two() {
        capacity = capacity.next_power_of_two();
    }

    let shared = Arc::new(Shared {
        buffer: UnsafeCell::new(vec![0.0; capacity].into_boxed_slice()),
        write_pos: CachePadded::new(AtomicUsize::new(0)),
        read_pos: CachePadded::new(AtomicUsize::new(0)),
        capacity,
        mask: capacity - 1,
    });

    (
        TapWriter {
            shared: Arc::clone(&shared),
        },
        TapReader { shared },
    )
}

/// Producer half, owned by the render domain
pub struct TapWriter {
    shared: Arc<Shared>,
}

impl TapWriter {
    /// Write samples, returning how many fit
    ///
    /// Wait-free; samples that do not fit are dropped (the reader keeps
    /// only the latest window anyway).
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let write_pos = self.shared.write_pos.load(Ordering::Acquire);
        let read_pos = self.shared.read_pos.load(Ordering::Acquire);

        // One slot kept empty to distinguish full from empty
        let available = if write_pos >= read_pos {
            self.shared.capacity - (write_pos - read_pos) - 1
        } else {
            read_pos - write_pos - 1
        };
        let to_write = samples.len().min(available);

        let buffer = unsafe { &mut *self.shared.buffer.get() };
        for (i, &sample) in samples[..to_write].iter().enumerate() {
            buffer[(write_pos + i) & self.shared.mask] = sample;
        }

        self.shared
            .write_pos
            .store(write_pos + to_write, Ordering::Release);

        to_write
    }
}

impl AnalysisTap for TapWriter {
    fn push(&mut self, interleaved: &[f32]) {
        self.write(interleaved);
    }
}

/// Consumer half, owned by the analysis side
pub struct TapReader {
    shared: Arc<Shared>,
}

impl TapReader {
    /// Read up to `out.len()` samples, returning how many were read
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let read_pos = self.shared.read_pos.load(Ordering::Acquire);
        let write_pos = self.shared.write_pos.load(Ordering::Acquire);

        let available = write_pos.wrapping_sub(read_pos);
        let to_read = out.len().min(available);

        let buffer = unsafe { &*self.shared.buffer.get() };
        for (i, slot) in out[..to_read].iter_mut().enumerate() {
            *slot = buffer[(read_pos + i) & self.shared.mask];
        }

        self.shared
            .read_pos
            .store(read_pos + to_read, Ordering::Release);

        to_read
    }

    /// Samples currently queued
    pub fn available(&self) -> usize {
        let read_pos = self.shared.read_pos.load(Ordering::Acquire);
        let write_pos = self.shared.write_pos.load(Ordering::Acquire);
        write_pos.wrapping_sub(read_pos)
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }
}
