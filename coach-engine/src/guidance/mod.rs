//! Guidance engine
//!
//! Decides, each tick, whether the coach may speak right now and
//! through which modality. Policy (the 4x5 mode/backoff matrix) is
//! data; the engine applies runtime clamps, safe-window gates, and a
//! token-bucket interrupt budget on top of it.

pub mod engine;
pub mod policy;

pub use engine::{
    DecisionReason, GuidanceEngine, InterventionDecision, ModalityAvailability, SessionSignals,
};
pub use policy::{
    AssistFlags, BackoffLevel, Granularity, GuidancePolicy, Modality, ModalityWeights, Mode,
    PolicyConfig, RuntimeTuning, Tone,
};
