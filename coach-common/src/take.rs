//! Take lifecycle outputs
//!
//! A take is one bounded attempt at an exercise, from count-in through
//! grid end or early termination. While a take is live the segmenter
//! accumulates flags; flags are write-once (never cleared) and frozen
//! at finalize. A `TakeFinalized` is immutable once produced.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::StrumCandidate;
use crate::timing::ExerciseContext;

/// Why a take ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeReason {
    /// The expected grid ran to completion (plus post-roll)
    GridComplete,
    /// The player stopped early or explicitly stopped
    UserStop,
    /// A restart signature was detected mid-take
    Restart,
    /// The host cancelled the take
    Cancelled,
}

/// Write-once edge-case flags accumulated during a take
///
/// Booleans only ever transition false -> true within a take's life.
/// `low_confidence_events` counts candidates excluded from grading by
/// the confidence filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeFlags {
    pub late_start: bool,
    pub missed_count_in: bool,
    pub extra_events_after_end: bool,
    pub extra_bars: bool,
    pub partial_take: bool,
    pub tempo_mismatch: bool,
    pub restart_detected: bool,
    pub low_confidence_events: u32,
}

impl TakeFlags {
    /// Names of the active boolean flags, for verification strings
    pub fn active_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.late_start {
            names.push("late_start");
        }
        if self.missed_count_in {
            names.push("missed_count_in");
        }
        if self.extra_events_after_end {
            names.push("extra_events_after_end");
        }
        if self.extra_bars {
            names.push("extra_bars");
        }
        if self.partial_take {
            names.push("partial_take");
        }
        if self.tempo_mismatch {
            names.push("tempo_mismatch");
        }
        if self.restart_detected {
            names.push("restart_detected");
        }
        names
    }

    pub fn any_boolean(&self) -> bool {
        !self.active_names().is_empty()
    }
}

/// Frozen snapshot of a completed take
///
/// `events` holds only the accepted in-window candidates (confidence
/// filter passed, deduplicated, `grid_start_ms <= t < grid_end_ms`).
/// Pre-grid and post-grid activity is summarized by the flag set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeFinalized {
    pub take_id: Uuid,
    pub context: ExerciseContext,

    // Timing anchors, fixed when the take was armed; monotonic:
    // take_start <= count_in_start <= grid_start < grid_end
    pub take_start_ms: f64,
    pub count_in_start_ms: f64,
    pub grid_start_ms: f64,
    pub grid_end_ms: f64,

    pub events: Vec<StrumCandidate>,
    pub reason: FinalizeReason,
    pub flags: TakeFlags,

    /// Diagnostic only: candidates dropped for duplicate sequence ids
    pub dropped_duplicates: u32,
}

impl TakeFinalized {
    pub fn slot_ms(&self) -> f64 {
        self.context.slot_ms()
    }
}
