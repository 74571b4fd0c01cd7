//! Event types crossing the coach core's boundaries
//!
//! `StrumCandidate` is the inbound play-event record produced by the
//! external onset-detection collaborator. `CoachEvent` is the outbound
//! event enum the host forwards to its logging/telemetry collaborator;
//! the core never persists these itself.

use serde::{Deserialize, Serialize};

use crate::analysis::TakeAnalysis;
use crate::decision::CoachDecision;
use crate::take::TakeFinalized;

/// Pick direction reported by the onset detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrumDirection {
    Down,
    Up,
    Unknown,
}

/// One detected play event
///
/// Immutable, produced externally. `seq` is a monotonic sequence id
/// used for deduplication; `t_ms` is on the caller's monotonic clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrumCandidate {
    pub t_ms: f64,
    /// Detector confidence in [0, 1]
    pub confidence: f32,
    pub direction: StrumDirection,
    /// Relative strum strength in [0, 1]
    pub intensity: f32,
    pub seq: u64,
}

/// Outbound coach events for the telemetry collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CoachEvent {
    /// A take lifecycle completed
    TakeFinalized { take: TakeFinalized },

    /// A finalized take was graded
    AnalysisReady { analysis: TakeAnalysis },

    /// The router chose what to teach next
    DecisionReady { decision: CoachDecision },
}
