//! # Coach Common Library
//!
//! Shared types for the practice-coach decision core:
//! - Musical timing math (meters, subdivisions, grids)
//! - Input event types (`StrumCandidate`)
//! - Take lifecycle outputs (`TakeFinalized`, flags)
//! - Analysis outputs (`TakeAnalysis`, gradeability)
//! - Coaching decisions (`TeachingObjective`, `CoachDecision`)
//! - Outbound event enum for the telemetry collaborator (`CoachEvent`)
//!
//! Decision logic lives in the `coach-engine` crate; this crate is
//! data definitions only.

pub mod analysis;
pub mod decision;
pub mod error;
pub mod events;
pub mod take;
pub mod timing;

pub use error::{Error, Result};
pub use timing::{ExerciseContext, Meter, MusicalContext, Subdivision};
