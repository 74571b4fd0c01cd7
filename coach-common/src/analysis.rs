//! Take analysis outputs
//!
//! Derived, not stored long-term: one `TakeAnalysis` is computed fresh
//! per finalized take and never mutated after creation. Gradeability
//! is the coarse confidence tier gating how aggressively downstream
//! rules may trust the metrics.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::take::{FinalizeReason, TakeFlags};
use crate::timing::ExerciseContext;

/// Coarse confidence tier for a take's metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gradeability {
    Unusable,
    Low,
    Ok,
    High,
}

impl Gradeability {
    /// Map analysis confidence to a tier
    ///
    /// Thresholds are exact at boundaries: confidence 0.20 is `Low`,
    /// 0.55 is `Ok`, 0.80 is `High`.
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence < 0.20 {
            Gradeability::Unusable
        } else if confidence < 0.55 {
            Gradeability::Low
        } else if confidence < 0.80 {
            Gradeability::Ok
        } else {
            Gradeability::High
        }
    }
}

/// One expected slot matched to an accepted event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlotHit {
    /// Global slot index within the take
    pub slot: u32,
    /// Slot position within its bar
    pub slot_in_bar: u32,
    /// Bar the slot falls in
    pub bar: u32,
    /// Sequence id of the matched event
    pub seq: u64,
    /// Signed offset of the event from the slot time (negative = early)
    pub offset_ms: f64,
}

/// Result of aligning in-window events to the expected grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
    pub hits: Vec<SlotHit>,
    /// Global indices of expected slots with no matching event
    pub missed_slots: Vec<u32>,
    /// Sequence ids of accepted events matched to no slot
    pub extra_seqs: Vec<u64>,
    /// Total expected slots under the exercise's hit mask
    pub expected_slots: u32,
}

/// Confidence-weighted take metrics
///
/// All rates are relative to the expected-slot count. Offsets are in
/// milliseconds; `drift_ms_per_bar` is the regression slope of offsets
/// over hit order scaled to bars.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeMetrics {
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub extra_rate: f64,
    pub mean_offset_ms: f64,
    pub median_offset_ms: f64,
    pub std_offset_ms: f64,
    pub p90_abs_offset_ms: f64,
    pub drift_ms_per_bar: f64,
    /// Weighted blend of timing, coverage, and extra-motion quality, in [0, 1]
    pub stability: f64,
}

/// Confidence record for a graded take
///
/// The suppression booleans are pure functions of gradeability and
/// flags, never of the metrics themselves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisQuality {
    /// Overall trust in the metrics, in [0, 1]
    pub analysis_confidence: f64,
    pub gradeability: Gradeability,
    /// Do not critique timing detail on this take
    pub suppress_timing_critique: bool,
    /// Do not offer slot-level micro feedback on this take
    pub suppress_micro_feedback: bool,
    /// Prefer coaching toward a cleaner take over musical detail
    pub prefer_take_quality_prompt: bool,
}

/// Full analysis of one finalized take
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeAnalysis {
    pub take_id: Uuid,
    pub context: ExerciseContext,
    pub reason: FinalizeReason,
    pub flags: TakeFlags,
    pub metrics: TakeMetrics,
    pub alignment: Alignment,
    pub quality: AnalysisQuality,
}
