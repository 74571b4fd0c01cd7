//! Coaching decision types
//!
//! The router resolves exactly one `TeachingObjective` per finalized
//! take and translates it into one `CoachDecision`. `max_cues` is
//! structurally 1: one take, one piece of coaching.

use serde::{Deserialize, Serialize};

/// The single pedagogical goal chosen for a take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeachingObjective {
    /// Reset and get a clean attempt
    Recovery,
    /// Input was dominated by low-confidence noise
    ReduceNoise,
    /// Play the exercise to the end before refining it
    CompleteRequiredForm,
    /// Come in with the count-in, not during it
    ReenterOnCountIn,
    /// Lock to the target tempo
    MatchTargetTempo,
    /// Start on the first downbeat
    AlignFirstDownbeat,
    /// Stop at the exercise's written length
    MatchExerciseLength,
    /// Cut extra strums between expected hits
    ReduceExtraMotion,
    /// Hold tempo steady across bars
    StabilizeTempoDrift,
    /// One grid position keeps failing
    FixRepeatableSlotErrors,
    /// Passed cleanly; raise the difficulty
    AdvanceDifficulty,
    /// Consistently early or late overall
    CenterTimingBias,
    /// Tighten placement within the subdivision
    TightenSubdivision,
}

impl TeachingObjective {
    /// Content-lookup key for the copy/asset collaborator
    pub fn cue_key(&self) -> &'static str {
        match self {
            TeachingObjective::Recovery => "coach.recovery",
            TeachingObjective::ReduceNoise => "coach.reduce_noise",
            TeachingObjective::CompleteRequiredForm => "coach.complete_required_form",
            TeachingObjective::ReenterOnCountIn => "coach.reenter_on_count_in",
            TeachingObjective::MatchTargetTempo => "coach.match_target_tempo",
            TeachingObjective::AlignFirstDownbeat => "coach.align_first_downbeat",
            TeachingObjective::MatchExerciseLength => "coach.match_exercise_length",
            TeachingObjective::ReduceExtraMotion => "coach.reduce_extra_motion",
            TeachingObjective::StabilizeTempoDrift => "coach.stabilize_tempo_drift",
            TeachingObjective::FixRepeatableSlotErrors => "coach.fix_repeatable_slot_errors",
            TeachingObjective::AdvanceDifficulty => "coach.advance_difficulty",
            TeachingObjective::CenterTimingBias => "coach.center_timing_bias",
            TeachingObjective::TightenSubdivision => "coach.tighten_subdivision",
        }
    }
}

/// How the chosen cue should land
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackIntent {
    /// Get the player back to a usable attempt
    Recover,
    /// Name the mechanical fix
    Instruct,
    /// Adjust tempo or pacing
    Calibrate,
    /// Push into harder material
    Challenge,
}

/// What the next take should look like
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextTakeStrategy {
    RepeatSame,
    RestartWithCountIn,
    SwitchSimpler,
}

/// The router's output for one take
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachDecision {
    pub objective: TeachingObjective,
    pub feedback_intent: FeedbackIntent,
    /// Key into the external copy/asset catalog
    pub cue_key: String,
    /// Suggested tempo for the next take, floor-clamped
    pub bpm_next: f64,
    pub next_take: NextTakeStrategy,
    /// Human-readable audit line explaining the routing
    pub verification: String,
    /// Always 1; one take gets one cue
    pub max_cues: u8,
}

impl CoachDecision {
    /// Structural invariant: a decision never carries more than one cue
    pub const MAX_CUES: u8 = 1;
}
