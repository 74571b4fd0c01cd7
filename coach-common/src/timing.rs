//! Musical timing math for the coach core
//!
//! Everything downstream of the segmenter reasons about a *grid*: the
//! set of expected event times derived from tempo, meter, subdivision,
//! and bar count. This module owns those derivations so the segmenter,
//! analyzer, and pulse scheduler all agree on the same arithmetic:
//!
//! - `beat_ms = 60000 / bpm`
//! - `slot_ms = beat_ms / slots_per_beat(subdivision)`
//! - `grid_start = count_in_start + count_in_beats * beat_ms`
//! - `grid_end = grid_start + beats_per_bar * bars * beat_ms`
//!
//! All times are `f64` milliseconds against a caller-supplied
//! monotonic clock. Nothing here reads a wall clock.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Milliseconds per beat at a given tempo
pub fn beat_ms(bpm: f64) -> f64 {
    60_000.0 / bpm
}

/// Time signature, reduced to what the grid needs: beats per bar
///
/// The denominator of a printed time signature does not change slot
/// arithmetic (the subdivision carries that), so it is not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meter {
    pub beats_per_bar: u8,
}

impl Meter {
    pub fn new(beats_per_bar: u8) -> Self {
        assert!(beats_per_bar > 0, "meter must have at least one beat");
        Self { beats_per_bar }
    }

    pub const fn four_four() -> Self {
        Self { beats_per_bar: 4 }
    }

    pub const fn three_four() -> Self {
        Self { beats_per_bar: 3 }
    }

    pub const fn six_eight() -> Self {
        Self { beats_per_bar: 6 }
    }

    /// Zero-based beat indices that form the backbeat
    ///
    /// Every other beat starting at beat 2: `[1, 3]` in 4/4, `[1]` in
    /// 3/4, `[1, 3, 5]` in 6/8.
    pub fn backbeat_beats(&self) -> Vec<u8> {
        (1..self.beats_per_bar).step_by(2).collect()
    }
}

/// Musical subdivision of the beat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subdivision {
    Quarter,
    Eighth,
    Sixteenth,
    TripletEighth,
}

impl Subdivision {
    /// Grid slots per beat for this subdivision
    pub fn slots_per_beat(&self) -> u32 {
        match self {
            Subdivision::Quarter => 1,
            Subdivision::Eighth => 2,
            Subdivision::Sixteenth => 4,
            Subdivision::TripletEighth => 3,
        }
    }

    /// Parse subdivision from string (policy/exercise documents)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "quarter" | "4th" => Some(Subdivision::Quarter),
            "eighth" | "8th" => Some(Subdivision::Eighth),
            "sixteenth" | "16th" => Some(Subdivision::Sixteenth),
            "triplet_eighth" | "triplet-8th" | "8th-triplet" => Some(Subdivision::TripletEighth),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Subdivision::Quarter => "quarter",
            Subdivision::Eighth => "eighth",
            Subdivision::Sixteenth => "sixteenth",
            Subdivision::TripletEighth => "triplet_eighth",
        }
    }
}

impl std::fmt::Display for Subdivision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-exercise grid description, supplied by the content collaborator
///
/// Read-only for the core. `pattern` is a per-bar expected-hit mask
/// with one entry per slot in the bar; an empty mask means every slot
/// expects a hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseContext {
    pub meter: Meter,
    pub bars: u32,
    pub bpm_target: f64,
    pub subdivision: Subdivision,
    pub count_in_beats: u32,
    #[serde(default)]
    pub pattern: Vec<bool>,
}

impl ExerciseContext {
    pub fn beat_ms(&self) -> f64 {
        beat_ms(self.bpm_target)
    }

    pub fn slot_ms(&self) -> f64 {
        self.beat_ms() / self.subdivision.slots_per_beat() as f64
    }

    pub fn slots_per_bar(&self) -> u32 {
        self.meter.beats_per_bar as u32 * self.subdivision.slots_per_beat()
    }

    pub fn bar_ms(&self) -> f64 {
        self.meter.beats_per_bar as f64 * self.beat_ms()
    }

    pub fn total_slots(&self) -> u32 {
        self.slots_per_bar() * self.bars
    }

    /// Grid duration from first expected slot to grid end
    pub fn grid_duration_ms(&self) -> f64 {
        self.bars as f64 * self.bar_ms()
    }

    pub fn count_in_ms(&self) -> f64 {
        self.count_in_beats as f64 * self.beat_ms()
    }

    /// Whether the expected-hit mask expects a hit at this bar slot
    pub fn expects_slot(&self, slot_in_bar: u32) -> bool {
        if self.pattern.is_empty() {
            return true;
        }
        self.pattern
            .get(slot_in_bar as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Number of expected slots per bar under the mask
    pub fn expected_slots_per_bar(&self) -> u32 {
        if self.pattern.is_empty() {
            return self.slots_per_bar();
        }
        self.pattern.iter().filter(|&&e| e).count() as u32
    }

    /// Reject out-of-range contexts before a take is armed
    pub fn validate(&self) -> Result<()> {
        if self.bars == 0 {
            return Err(Error::InvalidInput("exercise must have at least one bar".into()));
        }
        if !(20.0..=300.0).contains(&self.bpm_target) {
            return Err(Error::InvalidInput(format!(
                "bpm_target {} outside [20, 300]",
                self.bpm_target
            )));
        }
        if !self.pattern.is_empty() && self.pattern.len() != self.slots_per_bar() as usize {
            return Err(Error::InvalidInput(format!(
                "pattern length {} does not match {} slots per bar",
                self.pattern.len(),
                self.slots_per_bar()
            )));
        }
        Ok(())
    }
}

/// The musical grid a pulse payload is scheduled against
///
/// Unlike `ExerciseContext` this is anchored: `grid_start_ms` is an
/// absolute time on the caller's monotonic clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MusicalContext {
    pub grid_start_ms: f64,
    pub bpm: f64,
    pub meter: Meter,
    pub subdivision: Subdivision,
}

impl MusicalContext {
    /// Anchor an exercise context at an absolute grid start
    pub fn from_exercise(ctx: &ExerciseContext, grid_start_ms: f64) -> Self {
        Self {
            grid_start_ms,
            bpm: ctx.bpm_target,
            meter: ctx.meter,
            subdivision: ctx.subdivision,
        }
    }

    pub fn beat_ms(&self) -> f64 {
        beat_ms(self.bpm)
    }

    pub fn slot_ms(&self) -> f64 {
        self.beat_ms() / self.subdivision.slots_per_beat() as f64
    }

    pub fn slots_per_bar(&self) -> u32 {
        self.meter.beats_per_bar as u32 * self.subdivision.slots_per_beat()
    }

    pub fn bar_ms(&self) -> f64 {
        self.meter.beats_per_bar as f64 * self.beat_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beat_and_slot_math() {
        // 80 BPM eighths: the worked example grid
        let ctx = ExerciseContext {
            meter: Meter::four_four(),
            bars: 2,
            bpm_target: 80.0,
            subdivision: Subdivision::Eighth,
            count_in_beats: 4,
            pattern: vec![],
        };
        assert_eq!(ctx.beat_ms(), 750.0);
        assert_eq!(ctx.slot_ms(), 375.0);
        assert_eq!(ctx.slots_per_bar(), 8);
        assert_eq!(ctx.total_slots(), 16);
        assert_eq!(ctx.grid_duration_ms(), 6000.0);
        assert_eq!(ctx.count_in_ms(), 3000.0);
    }

    #[test]
    fn test_backbeat_beats() {
        assert_eq!(Meter::four_four().backbeat_beats(), vec![1, 3]);
        assert_eq!(Meter::three_four().backbeat_beats(), vec![1]);
        assert_eq!(Meter::six_eight().backbeat_beats(), vec![1, 3, 5]);
    }

    #[test]
    fn test_subdivision_slots() {
        assert_eq!(Subdivision::Quarter.slots_per_beat(), 1);
        assert_eq!(Subdivision::Eighth.slots_per_beat(), 2);
        assert_eq!(Subdivision::Sixteenth.slots_per_beat(), 4);
        assert_eq!(Subdivision::TripletEighth.slots_per_beat(), 3);
    }

    #[test]
    fn test_subdivision_parse_aliases() {
        assert_eq!(Subdivision::parse("8th"), Some(Subdivision::Eighth));
        assert_eq!(Subdivision::parse("EIGHTH"), Some(Subdivision::Eighth));
        assert_eq!(Subdivision::parse("16th"), Some(Subdivision::Sixteenth));
        assert_eq!(Subdivision::parse("bogus"), None);
    }

    #[test]
    fn test_pattern_mask() {
        let mut ctx = ExerciseContext {
            meter: Meter::four_four(),
            bars: 1,
            bpm_target: 100.0,
            subdivision: Subdivision::Quarter,
            count_in_beats: 4,
            pattern: vec![true, false, true, false],
        };
        assert!(ctx.expects_slot(0));
        assert!(!ctx.expects_slot(1));
        assert_eq!(ctx.expected_slots_per_bar(), 2);
        assert!(ctx.validate().is_ok());

        // Wrong mask length is a configuration error
        ctx.pattern = vec![true, false];
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn test_context_validation() {
        let mut ctx = ExerciseContext {
            meter: Meter::four_four(),
            bars: 0,
            bpm_target: 90.0,
            subdivision: Subdivision::Eighth,
            count_in_beats: 4,
            pattern: vec![],
        };
        assert!(ctx.validate().is_err());
        ctx.bars = 2;
        assert!(ctx.validate().is_ok());
        ctx.bpm_target = 500.0;
        assert!(ctx.validate().is_err());
    }
}
