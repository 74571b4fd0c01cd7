//! Coach session facade
//!
//! Wires the five components into the shape a host drives: feed clock
//! ticks and strum candidates in, get `CoachEvent`s out. Each take that
//! finalizes flows segmenter -> analyzer -> router in the same tick, so
//! the host always sees the finalized take, its analysis, and the
//! decision together and in that order.

use tracing::info;

use coach_common::events::{CoachEvent, StrumCandidate};
use coach_common::take::TakeFinalized;
use coach_common::timing::{ExerciseContext, MusicalContext};
use coach_common::Result;

use crate::analyzer::analyze_take;
use crate::guidance::{
    BackoffLevel, GuidanceEngine, InterventionDecision, ModalityAvailability, Mode, PolicyConfig,
    SessionSignals,
};
use crate::pulse::{self, CoachPayload, PulseEvent};
use crate::router::{ObjectiveRouter, RouterConfig};
use crate::segmenter::{SegmenterConfig, TakeSegmenter};

/// One player's coaching session
pub struct CoachSession {
    segmenter: TakeSegmenter,
    router: ObjectiveRouter,
    guidance: GuidanceEngine,
}

impl CoachSession {
    /// Fails fast on any invalid configuration.
    pub fn new(
        segmenter_config: SegmenterConfig,
        router_config: RouterConfig,
        policy: PolicyConfig,
        availability: ModalityAvailability,
        rng_seed: u64,
    ) -> Result<Self> {
        Ok(Self {
            segmenter: TakeSegmenter::new(segmenter_config)?,
            router: ObjectiveRouter::new(router_config)?,
            guidance: GuidanceEngine::new(policy, availability, rng_seed)?,
        })
    }

    pub fn begin_exercise(&mut self, context: ExerciseContext, now_ms: f64) -> Result<()> {
        info!(
            bpm = context.bpm_target,
            bars = context.bars,
            subdivision = %context.subdivision,
            "exercise started"
        );
        self.segmenter.begin_exercise(context, now_ms)
    }

    /// Feed one strum candidate; returns any events a finalization
    /// produced.
    pub fn ingest(&mut self, candidate: StrumCandidate) -> Vec<CoachEvent> {
        match self.segmenter.ingest(candidate) {
            Some(take) => self.on_finalized(take),
            None => Vec::new(),
        }
    }

    /// Advance the clock with no input.
    pub fn tick(&mut self, now_ms: f64) -> Vec<CoachEvent> {
        match self.segmenter.tick(now_ms) {
            Some(take) => self.on_finalized(take),
            None => Vec::new(),
        }
    }

    /// Player-initiated stop.
    pub fn stop(&mut self, now_ms: f64) -> Vec<CoachEvent> {
        match self.segmenter.stop(now_ms) {
            Some(take) => self.on_finalized(take),
            None => Vec::new(),
        }
    }

    /// Abandon the current take; nothing downstream is notified beyond
    /// the cancelled record itself.
    pub fn cancel(&mut self, now_ms: f64) -> Vec<CoachEvent> {
        match self.segmenter.cancel(now_ms) {
            Some(take) => self.on_finalized(take),
            None => Vec::new(),
        }
    }

    /// Ask the guidance engine whether the coach may speak right now.
    pub fn maybe_intervene(
        &mut self,
        now_ms: f64,
        mode: Mode,
        backoff: BackoffLevel,
        signals: &SessionSignals,
    ) -> InterventionDecision {
        self.guidance.decide(now_ms, mode, backoff, signals)
    }

    /// Expand a pulse payload against a musical context.
    pub fn schedule(&self, payload: &CoachPayload, context: &MusicalContext) -> Vec<PulseEvent> {
        pulse::schedule(payload, context)
    }

    pub fn segmenter(&self) -> &TakeSegmenter {
        &self.segmenter
    }

    fn on_finalized(&mut self, take: TakeFinalized) -> Vec<CoachEvent> {
        let analysis = analyze_take(&take);
        let decision = self.router.decide(&analysis);
        info!(
            take_id = %take.take_id,
            reason = ?take.reason,
            objective = ?decision.objective,
            confidence = analysis.quality.analysis_confidence,
            "take finalized and routed"
        );
        vec![
            CoachEvent::TakeFinalized { take },
            CoachEvent::AnalysisReady { analysis },
            CoachEvent::DecisionReady { decision },
        ]
    }
}
