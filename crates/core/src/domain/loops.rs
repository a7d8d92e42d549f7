//! Beat-synchronized looping
//!
//! Loops are anchored at the playback position when armed and sized from
//! a fixed 120 BPM grid (no tempo detection). A cooperative polling task
//! watches the published position at roughly 60 Hz and requests a
//! position wrap when the loop end is crossed; wraps are tagged with a
//! loop generation so a cancelled loop can never reset the position after
//! the fact.

use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::domain::deck::{DeckControls, DeckId};

/// Fixed tempo for loop length computation
pub const BPM_DEFAULT: f64 = 120.0;

/// Target cadence of the loop boundary poll (~60 Hz)
pub const POLL_INTERVAL: Duration = Duration::from_millis(16);

/// Loop length in beats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BeatLength {
    #[serde(rename = "1/4")]
    Quarter,
    #[serde(rename = "1/2")]
    Half,
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
    #[serde(rename = "4")]
    Four,
    #[serde(rename = "8")]
    Eight,
}

impl BeatLength {
    pub const ALL: [BeatLength; 6] = [
        BeatLength::Quarter,
        BeatLength::Half,
        BeatLength::One,
        BeatLength::Two,
        BeatLength::Four,
        BeatLength::Eight,
    ];

    /// Length as a fraction of one beat
    pub fn fraction(&self) -> f64 {
        match self {
            BeatLength::Quarter => 0.25,
            BeatLength::Half => 0.5,
            BeatLength::One => 1.0,
            BeatLength::Two => 2.0,
            BeatLength::Four => 4.0,
            BeatLength::Eight => 8.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BeatLength::Quarter => "1/4",
            BeatLength::Half => "1/2",
            BeatLength::One => "1",
            BeatLength::Two => "2",
            BeatLength::Four => "4",
            BeatLength::Eight => "8",
        }
    }

    /// Loop duration in seconds at the fixed tempo
    pub fn duration_secs(&self) -> f64 {
        (60.0 / BPM_DEFAULT) * self.fraction()
    }
}

impl FromStr for BeatLength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1/4" => Ok(BeatLength::Quarter),
            "1/2" => Ok(BeatLength::Half),
            "1" => Ok(BeatLength::One),
            "2" => Ok(BeatLength::Two),
            "4" => Ok(BeatLength::Four),
            "8" => Ok(BeatLength::Eight),
            other => Err(format!("unknown beat length: {other}")),
        }
    }
}

impl std::fmt::Display for BeatLength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An armed loop region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopRegion {
    pub start_secs: f32,
    pub end_secs: f32,
    pub beat: BeatLength,
}

/// Per-deck loop state machine
///
/// At most one loop is armed at a time; arming a new loop cancels the old
/// one first, so two regions can never poll concurrently.
pub struct LoopScheduler {
    deck: DeckId,
    controls: Arc<DeckControls>,
    region: Option<LoopRegion>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl LoopScheduler {
    pub fn new(deck: DeckId, controls: Arc<DeckControls>) -> Self {
        Self {
            deck,
            controls,
            region: None,
            task: None,
        }
    }

    pub fn region(&self) -> Option<LoopRegion> {
        self.region
    }

    pub fn is_looping(&self) -> bool {
        self.region.is_some()
    }

    /// Arm a loop at the current playback position
    ///
    /// No-op when no track is loaded: there is no valid position to anchor
    /// on. A previously armed loop is cancelled before the new region is
    /// established.
    pub fn set_loop(&mut self, beat: BeatLength) {
        if !self.controls.track_loaded.load(Ordering::Acquire) {
            debug!(deck = %self.deck, beat = %beat, "set_loop without a track, ignoring");
            return;
        }

        self.clear_loop();

        let start = self.controls.position_secs.load();
        let end = start + beat.duration_secs() as f32;
        self.region = Some(LoopRegion {
            start_secs: start,
            end_secs: end,
            beat,
        });
        debug!(deck = %self.deck, beat = %beat, start, end, "loop armed");

        let generation = self.controls.loop_generation.load(Ordering::Acquire);
        // Only poll from a background task when a runtime is available;
        // poll_once drives the same check synchronously otherwise
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let controls = Arc::clone(&self.controls);
            self.task = Some(handle.spawn(async move {
                let mut interval = tokio::time::interval(POLL_INTERVAL);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    if controls.loop_generation.load(Ordering::Acquire) != generation {
                        break;
                    }
                    if controls.position_secs.load() >= end {
                        controls.request_loop_wrap(generation, start);
                    }
                }
            }));
        }
    }

    /// Cancel the armed loop
    ///
    /// Bumping the generation first guarantees no stale wrap lands after
    /// this returns, even if the poll task already issued one.
    pub fn clear_loop(&mut self) {
        self.controls.loop_generation.fetch_add(1, Ordering::AcqRel);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.controls.loop_seek.store(0, Ordering::Release);
        if self.region.take().is_some() {
            debug!(deck = %self.deck, "loop cleared");
        }
    }

    /// Run one boundary check synchronously
    pub fn poll_once(&self) {
        let Some(region) = self.region else {
            return;
        };
        if self.controls.position_secs.load() >= region.end_secs {
            let generation = self.controls.loop_generation.load(Ordering::Acquire);
            self.controls
                .request_loop_wrap(generation, region.start_secs);
        }
    }
}

impl Drop for LoopScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler_with_track() -> LoopScheduler {
        let controls = Arc::new(DeckControls::new());
        controls.track_loaded.store(true, Ordering::Release);
        controls.duration_secs.store(180.0);
        LoopScheduler::new(DeckId::A, controls)
    }

    #[test]
    fn test_beat_fractions() {
        assert_eq!(BeatLength::Quarter.fraction(), 0.25);
        assert_eq!(BeatLength::Eight.fraction(), 8.0);
    }

    #[test]
    fn test_duration_at_fixed_tempo() {
        // 120 BPM: one beat is 0.5 s
        assert_eq!(BeatLength::One.duration_secs(), 0.5);
        assert_eq!(BeatLength::Quarter.duration_secs(), 0.125);
        assert_eq!(BeatLength::Eight.duration_secs(), 4.0);
    }

    #[test]
    fn test_beat_length_parse_round_trip() {
        for beat in BeatLength::ALL {
            assert_eq!(beat.as_str().parse::<BeatLength>(), Ok(beat));
        }
        assert!("3".parse::<BeatLength>().is_err());
    }

    #[test]
    fn test_beat_length_serde_strings() {
        let json = serde_json::to_string(&BeatLength::Quarter).unwrap();
        assert_eq!(json, "\"1/4\"");
        let parsed: BeatLength = serde_json::from_str("\"8\"").unwrap();
        assert_eq!(parsed, BeatLength::Eight);
    }

    #[test]
    fn test_set_loop_without_track_is_no_op() {
        let controls = Arc::new(DeckControls::new());
        let mut scheduler = LoopScheduler::new(DeckId::A, controls);
        scheduler.set_loop(BeatLength::One);
        assert!(!scheduler.is_looping());
    }

    #[test]
    fn test_set_loop_anchors_at_position() {
        let mut scheduler = scheduler_with_track();
        scheduler.controls.position_secs.store(10.0);
        scheduler.set_loop(BeatLength::One);

        let region = scheduler.region().unwrap();
        assert_eq!(region.start_secs, 10.0);
        assert_eq!(region.end_secs, 10.5);
        assert_eq!(region.beat, BeatLength::One);
    }

    #[test]
    fn test_set_loop_twice_keeps_only_second_region() {
        let mut scheduler = scheduler_with_track();
        scheduler.controls.position_secs.store(10.0);
        scheduler.set_loop(BeatLength::One);
        scheduler.set_loop(BeatLength::Two);

        let region = scheduler.region().unwrap();
        assert_eq!(region.start_secs, 10.0);
        assert_eq!(region.end_secs, 11.0);
        assert_eq!(region.beat, BeatLength::Two);
    }

    #[test]
    fn test_poll_once_requests_wrap_at_boundary() {
        let mut scheduler = scheduler_with_track();
        scheduler.controls.position_secs.store(10.0);
        scheduler.set_loop(BeatLength::One);

        // Before the boundary: nothing requested
        scheduler.controls.position_secs.store(10.4);
        scheduler.poll_once();
        assert_eq!(scheduler.controls.loop_seek.load(Ordering::Acquire), 0);

        // At/past the boundary: wrap back to start
        scheduler.controls.position_secs.store(10.5);
        scheduler.poll_once();
        let packed = scheduler.controls.loop_seek.load(Ordering::Acquire);
        assert_ne!(packed, 0);
        assert_eq!(f32::from_bits(packed as u32), 10.0);
    }

    #[test]
    fn test_clear_loop_resets_everything() {
        let mut scheduler = scheduler_with_track();
        scheduler.controls.position_secs.store(10.0);
        scheduler.set_loop(BeatLength::One);
        let armed_generation = scheduler.controls.loop_generation.load(Ordering::Acquire);

        scheduler.clear_loop();

        assert!(!scheduler.is_looping());
        assert!(scheduler.region().is_none());
        assert_eq!(scheduler.controls.loop_seek.load(Ordering::Acquire), 0);
        // Generation moved on, so any in-flight wrap is stale
        assert_ne!(
            scheduler.controls.loop_generation.load(Ordering::Acquire),
            armed_generation
        );

        // Crossing the old boundary no longer produces a wrap
        scheduler.controls.position_secs.store(11.0);
        scheduler.poll_once();
        assert_eq!(scheduler.controls.loop_seek.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn test_background_poll_wraps_position() {
        let mut scheduler = scheduler_with_track();
        scheduler.controls.position_secs.store(10.0);
        scheduler.set_loop(BeatLength::One);

        scheduler.controls.position_secs.store(10.6);
        // Give the poll task a few ticks
        for _ in 0..5 {
            tokio::time::sleep(POLL_INTERVAL).await;
            if scheduler.controls.loop_seek.load(Ordering::Acquire) != 0 {
                break;
            }
        }

        let packed = scheduler.controls.loop_seek.load(Ordering::Acquire);
        assert_ne!(packed, 0);
        assert_eq!(f32::from_bits(packed as u32), 10.0);
    }
}
