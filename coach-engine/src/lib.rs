//! # Coach Engine
//!
//! Decision core for the connected-instrument coaching feature. Five
//! components, leaves first:
//!
//! 1. **Take Segmenter** — converts the live `StrumCandidate` stream
//!    into discrete, flagged `TakeFinalized` records.
//! 2. **Take Analyzer** — aligns finalized events to the expected grid
//!    and computes confidence-weighted metrics.
//! 3. **Objective Router** — resolves exactly one `TeachingObjective`
//!    per take and emits one `CoachDecision`.
//! 4. **Guidance Engine** — decides each tick whether to intervene
//!    right now, and with what modality, without becoming annoying.
//! 5. **Pulse Scheduler** — deterministically expands a pulse payload
//!    into millisecond-exact `PulseEvent`s on the musical grid.
//!
//! The whole pipeline is single-threaded, tick-driven, and pure: every
//! operation is `(state, now, inputs) -> (state, outputs)` against a
//! caller-supplied monotonic clock, so logged inputs replay exactly.
//! `CoachSession` wires the components the way a host drives them.

pub mod analyzer;
pub mod guidance;
pub mod pulse;
pub mod router;
pub mod segmenter;
pub mod session;

pub use coach_common::{Error, Result};
pub use guidance::{GuidanceEngine, InterventionDecision, SessionSignals};
pub use router::ObjectiveRouter;
pub use segmenter::{SegmenterConfig, TakeSegmenter};
pub use session::CoachSession;
