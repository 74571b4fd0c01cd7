//! Teaching-objective resolver / router
//!
//! Resolves exactly one `TeachingObjective` per analyzed take using
//! strict first-match priority, then translates it into one concrete
//! `CoachDecision`. Identical analysis input always yields identical
//! output; the router holds no per-take state.
//!
//! Priority order:
//! 1. Cancelled / restart -> recovery
//! 2. Unusable gradeability -> noise reduction or recovery
//! 3. Low gradeability -> flag ladder (form, count-in, tempo, downbeat)
//! 4. Mechanical overrides at OK/HIGH (extra bars, count-in, late start)
//! 5. Musical ladder (coverage, extras, drift, hotspot, advance, bias,
//!    subdivision), then recovery as the fallback

use tracing::debug;

use coach_common::analysis::{Alignment, Gradeability, TakeAnalysis};
use coach_common::decision::{CoachDecision, FeedbackIntent, NextTakeStrategy, TeachingObjective};
use coach_common::take::FinalizeReason;
use coach_common::timing::ExerciseContext;
use coach_common::{Error, Result};

/// Pluggable significance strategy for repeatable-slot hotspots
///
/// The musical ladder asks one question of the alignment: "is there a
/// grid position that keeps failing?" The concentration thresholds are
/// a product decision, so the strategy is swappable.
pub trait HotspotDetector: Send {
    fn significant_hotspot(&self, alignment: &Alignment, context: &ExerciseContext) -> bool;
}

/// Default hotspot strategy: a bar position counts as a hotspot when
/// it misses at least `min_misses` times and in at least `miss_share`
/// of the bars that expect it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConcentrationHotspot {
    pub min_misses: u32,
    pub miss_share: f64,
}

impl Default for ConcentrationHotspot {
    fn default() -> Self {
        Self {
            min_misses: 2,
            miss_share: 0.6,
        }
    }
}

impl HotspotDetector for ConcentrationHotspot {
    fn significant_hotspot(&self, alignment: &Alignment, context: &ExerciseContext) -> bool {
        let slots_per_bar = context.slots_per_bar();
        if slots_per_bar == 0 || context.bars == 0 {
            return false;
        }
        let mut misses_by_position = vec![0u32; slots_per_bar as usize];
        for &slot in &alignment.missed_slots {
            misses_by_position[(slot % slots_per_bar) as usize] += 1;
        }
        misses_by_position.iter().any(|&misses| {
            misses >= self.min_misses
                && misses as f64 / context.bars as f64 >= self.miss_share
        })
    }
}

/// Router thresholds, validated at construction
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    /// Coverage below this routes to tempo-match coaching
    pub almost_hit_rate: f64,
    /// Coverage at/above this is a pass for advancement
    pub pass_hit_rate: f64,
    /// Extra-event rate above this routes to motion reduction
    pub extra_rate_limit: f64,
    /// Drift beyond this fraction of slot_ms per bar is excessive
    pub drift_limit_fraction: f64,
    /// Mean offset beyond this fraction of slot_ms is a timing bias
    pub bias_fraction: f64,
    /// p90 spread beyond this fraction of slot_ms needs tightening
    pub spread_fraction: f64,
    /// Stability at/above this passes
    pub stability_pass: f64,
    /// Low-confidence count at/above this is extreme noise
    pub noise_extreme_events: u32,
    /// Tempo suggestions never drop below this
    pub bpm_floor: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            almost_hit_rate: 0.85,
            pass_hit_rate: 0.92,
            extra_rate_limit: 0.15,
            drift_limit_fraction: 0.20,
            bias_fraction: 0.25,
            spread_fraction: 0.30,
            stability_pass: 0.80,
            noise_extreme_events: 15,
            bpm_floor: 40.0,
        }
    }
}

impl RouterConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("almost_hit_rate", self.almost_hit_rate),
            ("pass_hit_rate", self.pass_hit_rate),
            ("extra_rate_limit", self.extra_rate_limit),
            ("stability_pass", self.stability_pass),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(Error::Config(format!("{name} {v} outside [0, 1]")));
            }
        }
        if self.almost_hit_rate > self.pass_hit_rate {
            return Err(Error::Config(
                "almost_hit_rate must not exceed pass_hit_rate".to_string(),
            ));
        }
        for (name, v) in [
            ("drift_limit_fraction", self.drift_limit_fraction),
            ("bias_fraction", self.bias_fraction),
            ("spread_fraction", self.spread_fraction),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(Error::Config(format!("{name} must be finite and > 0, got {v}")));
            }
        }
        if !self.bpm_floor.is_finite() || self.bpm_floor < 20.0 {
            return Err(Error::Config(format!(
                "bpm_floor {} below supported tempo range",
                self.bpm_floor
            )));
        }
        Ok(())
    }
}

/// Deterministic objective resolver and decision emitter
pub struct ObjectiveRouter {
    config: RouterConfig,
    hotspot: Box<dyn HotspotDetector>,
}

impl ObjectiveRouter {
    pub fn new(config: RouterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            hotspot: Box::new(ConcentrationHotspot::default()),
        })
    }

    /// Swap in a different hotspot significance strategy
    pub fn with_hotspot(mut self, hotspot: Box<dyn HotspotDetector>) -> Self {
        self.hotspot = hotspot;
        self
    }

    /// Resolve the single teaching objective for this take
    pub fn resolve(&self, analysis: &TakeAnalysis) -> TeachingObjective {
        let flags = &analysis.flags;
        let metrics = &analysis.metrics;
        let grade = analysis.quality.gradeability;
        let slot_ms = analysis.context.slot_ms();

        // 1. Cancellation and restarts always route to recovery
        if analysis.reason == FinalizeReason::Cancelled
            || analysis.reason == FinalizeReason::Restart
            || flags.restart_detected
        {
            return TeachingObjective::Recovery;
        }

        // 2. Ungradeable takes: extreme noise gets its own objective
        if grade == Gradeability::Unusable {
            return if flags.low_confidence_events >= self.config.noise_extreme_events {
                TeachingObjective::ReduceNoise
            } else {
                TeachingObjective::Recovery
            };
        }

        // 3. Low gradeability: pick by flag, in this fixed order
        if grade == Gradeability::Low {
            return if flags.partial_take {
                TeachingObjective::CompleteRequiredForm
            } else if flags.missed_count_in {
                TeachingObjective::ReenterOnCountIn
            } else if flags.tempo_mismatch {
                TeachingObjective::MatchTargetTempo
            } else if flags.late_start {
                TeachingObjective::AlignFirstDownbeat
            } else {
                TeachingObjective::Recovery
            };
        }

        // 4. Mechanical overrides even at OK/HIGH gradeability
        if flags.extra_bars {
            return TeachingObjective::MatchExerciseLength;
        }
        if flags.missed_count_in {
            return TeachingObjective::ReenterOnCountIn;
        }
        if flags.late_start {
            return TeachingObjective::AlignFirstDownbeat;
        }

        // 5. Musical ladder
        if metrics.hit_rate < self.config.almost_hit_rate {
            return TeachingObjective::MatchTargetTempo;
        }
        if metrics.extra_rate > self.config.extra_rate_limit {
            return TeachingObjective::ReduceExtraMotion;
        }
        if metrics.drift_ms_per_bar.abs() > self.config.drift_limit_fraction * slot_ms {
            return TeachingObjective::StabilizeTempoDrift;
        }
        if self
            .hotspot
            .significant_hotspot(&analysis.alignment, &analysis.context)
        {
            return TeachingObjective::FixRepeatableSlotErrors;
        }
        // Advancement is the one ladder rung that consults stability.
        if metrics.hit_rate >= self.config.pass_hit_rate
            && metrics.mean_offset_ms.abs() <= self.config.bias_fraction * slot_ms
            && metrics.stability >= self.config.stability_pass
        {
            return TeachingObjective::AdvanceDifficulty;
        }
        if metrics.mean_offset_ms.abs() > self.config.bias_fraction * slot_ms {
            return TeachingObjective::CenterTimingBias;
        }
        if metrics.stability < self.config.stability_pass
            || metrics.p90_abs_offset_ms > self.config.spread_fraction * slot_ms
        {
            return TeachingObjective::TightenSubdivision;
        }

        TeachingObjective::Recovery
    }

    /// Resolve the objective and emit the full decision
    pub fn decide(&self, analysis: &TakeAnalysis) -> CoachDecision {
        let objective = self.resolve(analysis);
        let metrics = &analysis.metrics;

        let feedback_intent = match objective {
            TeachingObjective::Recovery | TeachingObjective::ReduceNoise => FeedbackIntent::Recover,
            TeachingObjective::MatchTargetTempo | TeachingObjective::StabilizeTempoDrift => {
                FeedbackIntent::Calibrate
            }
            TeachingObjective::AdvanceDifficulty => FeedbackIntent::Challenge,
            _ => FeedbackIntent::Instruct,
        };

        // Small fixed tempo deltas; coverage fixes back off the most
        let delta = match objective {
            TeachingObjective::MatchTargetTempo => -6.0,
            TeachingObjective::ReduceExtraMotion | TeachingObjective::StabilizeTempoDrift => -3.0,
            TeachingObjective::AdvanceDifficulty => 3.0,
            _ => 0.0,
        };
        let bpm_next = (analysis.context.bpm_target + delta).max(self.config.bpm_floor);

        let next_take = match objective {
            TeachingObjective::Recovery | TeachingObjective::ReduceNoise => {
                NextTakeStrategy::SwitchSimpler
            }
            TeachingObjective::ReenterOnCountIn | TeachingObjective::AlignFirstDownbeat => {
                NextTakeStrategy::RestartWithCountIn
            }
            _ => NextTakeStrategy::RepeatSame,
        };

        let verification = format!(
            "reason={:?} grade={:?} flags=[{}] hit={:.2} extra={:.2} drift={:.1}ms/bar stability={:.2} -> {}",
            analysis.reason,
            analysis.quality.gradeability,
            analysis.flags.active_names().join(","),
            metrics.hit_rate,
            metrics.extra_rate,
            metrics.drift_ms_per_bar,
            metrics.stability,
            objective.cue_key(),
        );

        debug!(take_id = %analysis.take_id, objective = ?objective, bpm_next, "decision routed");

        CoachDecision {
            objective,
            feedback_intent,
            cue_key: objective.cue_key().to_string(),
            bpm_next,
            next_take,
            verification,
            max_cues: CoachDecision::MAX_CUES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_common::analysis::{AnalysisQuality, TakeMetrics};
    use coach_common::take::TakeFlags;
    use coach_common::timing::{Meter, Subdivision};
    use uuid::Uuid;

    fn ctx() -> ExerciseContext {
        ExerciseContext {
            meter: Meter::four_four(),
            bars: 2,
            bpm_target: 80.0,
            subdivision: Subdivision::Eighth,
            count_in_beats: 4,
            pattern: vec![],
        }
    }

    fn clean_metrics() -> TakeMetrics {
        TakeMetrics {
            hit_rate: 1.0,
            miss_rate: 0.0,
            extra_rate: 0.0,
            mean_offset_ms: 0.0,
            median_offset_ms: 0.0,
            std_offset_ms: 5.0,
            p90_abs_offset_ms: 10.0,
            drift_ms_per_bar: 0.0,
            stability: 0.95,
        }
    }

    fn analysis(
        reason: FinalizeReason,
        flags: TakeFlags,
        metrics: TakeMetrics,
    ) -> TakeAnalysis {
        let quality = crate::analyzer::score_quality(reason, &flags);
        TakeAnalysis {
            take_id: Uuid::new_v4(),
            context: ctx(),
            reason,
            flags,
            metrics,
            alignment: Alignment {
                hits: vec![],
                missed_slots: vec![],
                extra_seqs: vec![],
                expected_slots: 16,
            },
            quality,
        }
    }

    fn router() -> ObjectiveRouter {
        ObjectiveRouter::new(RouterConfig::default()).unwrap()
    }

    #[test]
    fn test_cancelled_routes_to_recovery() {
        let a = analysis(FinalizeReason::Cancelled, TakeFlags::default(), clean_metrics());
        assert_eq!(router().resolve(&a), TeachingObjective::Recovery);
    }

    #[test]
    fn test_restart_routes_to_recovery_even_with_clean_metrics() {
        let flags = TakeFlags { restart_detected: true, ..TakeFlags::default() };
        let a = analysis(FinalizeReason::Restart, flags, clean_metrics());
        assert_eq!(router().resolve(&a), TeachingObjective::Recovery);
    }

    #[test]
    fn test_unusable_extreme_noise_routes_to_reduce_noise() {
        // Cancelled would route at rule 1, so build an unusable take
        // from stacked penalties instead: UserStop + partial + restart.
        let flags = TakeFlags {
            partial_take: true,
            restart_detected: true,
            low_confidence_events: 20,
            ..TakeFlags::default()
        };
        let a = analysis(FinalizeReason::UserStop, flags, clean_metrics());
        // restart_detected matches rule 1 first
        assert_eq!(router().resolve(&a), TeachingObjective::Recovery);

        let flags = TakeFlags {
            partial_take: true,
            missed_count_in: true,
            tempo_mismatch: true,
            low_confidence_events: 20,
            ..TakeFlags::default()
        };
        let a = analysis(FinalizeReason::UserStop, flags, clean_metrics());
        assert_eq!(a.quality.gradeability, Gradeability::Unusable);
        assert_eq!(router().resolve(&a), TeachingObjective::ReduceNoise);
    }

    #[test]
    fn test_low_grade_flag_ladder_order() {
        // partial_take outranks the other flags at LOW gradeability,
        // even when musical metrics would pass.
        let flags = TakeFlags {
            partial_take: true,
            missed_count_in: true,
            late_start: true,
            ..TakeFlags::default()
        };
        let a = analysis(FinalizeReason::UserStop, flags, clean_metrics());
        assert_eq!(a.quality.gradeability, Gradeability::Low);
        assert_eq!(router().resolve(&a), TeachingObjective::CompleteRequiredForm);

        let flags = TakeFlags {
            missed_count_in: true,
            late_start: true,
            ..TakeFlags::default()
        };
        let a = analysis(FinalizeReason::UserStop, flags, clean_metrics());
        assert_eq!(a.quality.gradeability, Gradeability::Low);
        assert_eq!(router().resolve(&a), TeachingObjective::ReenterOnCountIn);
    }

    #[test]
    fn test_mechanical_overrides_at_high_grade() {
        let flags = TakeFlags { extra_bars: true, ..TakeFlags::default() };
        let a = analysis(FinalizeReason::GridComplete, flags, clean_metrics());
        assert_eq!(a.quality.gradeability, Gradeability::High);
        assert_eq!(router().resolve(&a), TeachingObjective::MatchExerciseLength);

        let flags = TakeFlags { late_start: true, ..TakeFlags::default() };
        let a = analysis(FinalizeReason::GridComplete, flags, clean_metrics());
        assert_eq!(a.quality.gradeability, Gradeability::High);
        assert_eq!(router().resolve(&a), TeachingObjective::AlignFirstDownbeat);
    }

    #[test]
    fn test_musical_ladder_order() {
        let r = router();

        // Coverage failure first
        let m = TakeMetrics { hit_rate: 0.5, extra_rate: 0.5, ..clean_metrics() };
        let a = analysis(FinalizeReason::GridComplete, TakeFlags::default(), m);
        assert_eq!(r.resolve(&a), TeachingObjective::MatchTargetTempo);

        // Extras next
        let m = TakeMetrics { extra_rate: 0.3, ..clean_metrics() };
        let a = analysis(FinalizeReason::GridComplete, TakeFlags::default(), m);
        assert_eq!(r.resolve(&a), TeachingObjective::ReduceExtraMotion);

        // Drift next (slot_ms = 375, limit = 75ms/bar)
        let m = TakeMetrics { drift_ms_per_bar: 100.0, ..clean_metrics() };
        let a = analysis(FinalizeReason::GridComplete, TakeFlags::default(), m);
        assert_eq!(r.resolve(&a), TeachingObjective::StabilizeTempoDrift);

        // Clean pass advances
        let a = analysis(FinalizeReason::GridComplete, TakeFlags::default(), clean_metrics());
        assert_eq!(r.resolve(&a), TeachingObjective::AdvanceDifficulty);

        // Timing bias (slot_ms * 0.25 = 93.75)
        let m = TakeMetrics { mean_offset_ms: 120.0, ..clean_metrics() };
        let a = analysis(FinalizeReason::GridComplete, TakeFlags::default(), m);
        assert_eq!(r.resolve(&a), TeachingObjective::CenterTimingBias);

        // Stability-only shortfall
        let m = TakeMetrics { stability: 0.6, ..clean_metrics() };
        let a = analysis(FinalizeReason::GridComplete, TakeFlags::default(), m);
        assert_eq!(r.resolve(&a), TeachingObjective::TightenSubdivision);
    }

    #[test]
    fn test_hotspot_detection() {
        let detector = ConcentrationHotspot::default();
        let context = ctx();

        // Slot position 2 missed in both bars (2 of 2 bars = 100%)
        let alignment = Alignment {
            hits: vec![],
            missed_slots: vec![2, 10],
            extra_seqs: vec![],
            expected_slots: 16,
        };
        assert!(detector.significant_hotspot(&alignment, &context));

        // Scattered misses are not a hotspot
        let alignment = Alignment {
            hits: vec![],
            missed_slots: vec![2, 11],
            extra_seqs: vec![],
            expected_slots: 16,
        };
        assert!(!detector.significant_hotspot(&alignment, &context));
    }

    #[test]
    fn test_hotspot_routes_before_advance() {
        let r = router();
        let mut a = analysis(FinalizeReason::GridComplete, TakeFlags::default(), clean_metrics());
        a.alignment.missed_slots = vec![2, 10];
        assert_eq!(r.resolve(&a), TeachingObjective::FixRepeatableSlotErrors);
    }

    #[test]
    fn test_router_determinism() {
        let r = router();
        let flags = TakeFlags { late_start: true, ..TakeFlags::default() };
        let a = analysis(FinalizeReason::GridComplete, flags, clean_metrics());
        let first = r.decide(&a);
        for _ in 0..10 {
            assert_eq!(r.decide(&a), first);
        }
    }

    #[test]
    fn test_partial_take_never_advances() {
        // Passing musical metrics with a partial take must still route
        // to completion coaching.
        let flags = TakeFlags { partial_take: true, ..TakeFlags::default() };
        let a = analysis(FinalizeReason::UserStop, flags, clean_metrics());
        assert_eq!(router().resolve(&a), TeachingObjective::CompleteRequiredForm);
    }

    #[test]
    fn test_bpm_deltas_and_floor() {
        let r = router();

        let m = TakeMetrics { hit_rate: 0.5, ..clean_metrics() };
        let a = analysis(FinalizeReason::GridComplete, TakeFlags::default(), m);
        let d = r.decide(&a);
        assert_eq!(d.bpm_next, 74.0); // 80 - 6

        let a = analysis(FinalizeReason::GridComplete, TakeFlags::default(), clean_metrics());
        let d = r.decide(&a);
        assert_eq!(d.objective, TeachingObjective::AdvanceDifficulty);
        assert_eq!(d.bpm_next, 83.0); // 80 + 3

        // Floor clamp
        let mut a = analysis(
            FinalizeReason::GridComplete,
            TakeFlags::default(),
            TakeMetrics { hit_rate: 0.5, ..clean_metrics() },
        );
        a.context.bpm_target = 42.0;
        let d = r.decide(&a);
        assert_eq!(d.bpm_next, 40.0);
    }

    #[test]
    fn test_max_cues_is_structural() {
        let a = analysis(FinalizeReason::GridComplete, TakeFlags::default(), clean_metrics());
        let d = router().decide(&a);
        assert_eq!(d.max_cues, 1);
        assert_eq!(CoachDecision::MAX_CUES, 1);
    }
}
