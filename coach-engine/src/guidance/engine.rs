//! Guidance runtime
//!
//! Each tick the host asks: "may the coach speak right now, and how?"
//! The engine looks up the policy cell for (mode, backoff), clamps it
//! with session signals, runs the safe-window gates, charges the token
//! bucket, and picks a modality. Every refusal carries a reason so the
//! host can log why the coach stayed quiet.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use coach_common::Result;

use super::policy::{
    BackoffLevel, Granularity, GuidancePolicy, Modality, Mode, PolicyConfig, Tone,
};

/// Per-tick session signals supplied by the host
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSignals {
    /// Quiet gap since the player last produced a note-on
    pub time_since_last_note_on_ms: f64,
    /// Age of the most recent phrase boundary, if one has occurred
    pub phrase_boundary_age_ms: Option<f64>,
    /// Consecutive cues the player has ignored
    pub ignore_streak: u32,
    /// Learned preference for quiet, 0 (chatty ok) to 1 (leave me alone)
    pub silence_preference: f64,
    /// The player asked for quiet explicitly; absolute veto
    pub user_explicit_quiet: bool,
    /// Upstream confidence in the current mode classification
    pub mode_confidence: Option<f64>,
}

impl Default for SessionSignals {
    fn default() -> Self {
        Self {
            time_since_last_note_on_ms: f64::INFINITY,
            phrase_boundary_age_ms: None,
            ignore_streak: 0,
            silence_preference: 0.0,
            user_explicit_quiet: false,
            mode_confidence: None,
        }
    }
}

/// Which delivery channels are physically available right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModalityAvailability {
    pub haptic: bool,
    pub visual: bool,
    pub audio: bool,
    pub text: bool,
}

impl Default for ModalityAvailability {
    fn default() -> Self {
        Self {
            haptic: true,
            visual: true,
            audio: true,
            text: true,
        }
    }
}

impl ModalityAvailability {
    fn allows(&self, modality: Modality) -> bool {
        match modality {
            Modality::Haptic => self.haptic,
            Modality::Visual => self.visual,
            Modality::Audio => self.audio,
            Modality::Text => self.text,
        }
    }
}

/// Why the engine did or did not initiate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    Initiate,
    UserQuiet,
    RealtimeDisabled,
    PerformanceGuard,
    SafeWindowClosed,
    PhraseBoundaryRequired,
    CooldownActive,
    BudgetExhausted,
    NoModalityAvailable,
}

/// The engine's per-tick answer
#[derive(Debug, Clone, PartialEq)]
pub struct InterventionDecision {
    pub should_initiate: bool,
    pub reason: DecisionReason,
    /// The cell after all runtime clamps, for the renderer to honor
    pub effective: GuidancePolicy,
    /// Chosen delivery channel when initiating
    pub modality: Option<Modality>,
}

/// Stateful guidance decision engine
///
/// Mutable state is limited to the token bucket, the last-intervention
/// timestamp, and the injected RNG; everything else is a pure function
/// of (policy cell, signals).
pub struct GuidanceEngine {
    policy: PolicyConfig,
    availability: ModalityAvailability,
    rng: StdRng,
    tokens: f64,
    last_refill_ms: Option<f64>,
    last_intervention_ms: Option<f64>,
    last_now_ms: f64,
}

impl GuidanceEngine {
    pub fn new(
        policy: PolicyConfig,
        availability: ModalityAvailability,
        rng_seed: u64,
    ) -> Result<Self> {
        policy.validate()?;
        let tokens = policy.runtime.token_bucket_max;
        Ok(Self {
            policy,
            availability,
            rng: StdRng::seed_from_u64(rng_seed),
            tokens,
            last_refill_ms: None,
            last_intervention_ms: None,
            last_now_ms: 0.0,
        })
    }

    pub fn availability_mut(&mut self) -> &mut ModalityAvailability {
        &mut self.availability
    }

    /// Decide whether to intervene at `now_ms`
    pub fn decide(
        &mut self,
        now_ms: f64,
        mode: Mode,
        backoff: BackoffLevel,
        signals: &SessionSignals,
    ) -> InterventionDecision {
        let now_ms = self.clamp_now(now_ms);

        // Explicit quiet is the equivalent of forcing L4: short-circuit
        // with the silent cell before anything else runs.
        if signals.user_explicit_quiet {
            return self.refuse(DecisionReason::UserQuiet, GuidancePolicy::silent());
        }

        let effective = self.effective_policy(mode, backoff, signals);
        if !effective.realtime_enabled || effective.granularity == Granularity::None {
            return self.refuse(DecisionReason::RealtimeDisabled, effective);
        }
        if mode == Mode::Performance
            && (effective.tone == Tone::Instructive || effective.granularity == Granularity::Micro)
        {
            // Belt and braces: the clamp below rewrites these, so this
            // only fires for a hand-edited policy file.
            return self.refuse(DecisionReason::PerformanceGuard, effective);
        }

        let required_pause = effective.min_pause_ms.max(backoff.min_pause_ms());
        if signals.time_since_last_note_on_ms < required_pause {
            return self.refuse(DecisionReason::SafeWindowClosed, effective);
        }
        if effective.phrase_boundary_only {
            let debounce = self.policy.runtime.phrase_debounce_ms;
            match signals.phrase_boundary_age_ms {
                Some(age) if age >= debounce => {}
                _ => return self.refuse(DecisionReason::PhraseBoundaryRequired, effective),
            }
        }
        if mode == Mode::Performance
            && signals.time_since_last_note_on_ms < self.policy.runtime.performance_min_pause_ms
        {
            return self.refuse(DecisionReason::SafeWindowClosed, effective);
        }

        self.refill(now_ms, effective.interrupt_budget_per_min);

        if let Some(last) = self.last_intervention_ms {
            if now_ms - last < self.policy.runtime.cooldown_ms {
                return self.refuse(DecisionReason::CooldownActive, effective);
            }
        }

        // Check modality availability before spending any budget.
        let masked_sum: f64 = Modality::ALL
            .iter()
            .filter(|&&m| self.availability.allows(m))
            .map(|&m| effective.modality_weights.get(m))
            .sum();
        if masked_sum <= 0.0 {
            return self.refuse(DecisionReason::NoModalityAvailable, effective);
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
        } else if self.policy.runtime.stochastic_rounding && self.tokens > 0.0 {
            // Spend a fractional token probabilistically so a 0.2/min
            // budget still fires occasionally instead of never.
            let p = self.tokens;
            if self.rng.gen::<f64>() < p {
                self.tokens = 0.0;
            } else {
                return self.refuse(DecisionReason::BudgetExhausted, effective);
            }
        } else {
            return self.refuse(DecisionReason::BudgetExhausted, effective);
        }

        let modality = self.pick_modality(&effective, masked_sum);
        self.last_intervention_ms = Some(now_ms);
        debug!(?mode, ?backoff, ?modality, tokens = self.tokens, "intervention initiated");

        InterventionDecision {
            should_initiate: true,
            reason: DecisionReason::Initiate,
            effective,
            modality: Some(modality),
        }
    }

    /// Apply session-signal clamps to the raw policy cell. Clamps only
    /// ever quiet the coach; nothing here raises a budget or lowers a
    /// pause requirement.
    fn effective_policy(
        &self,
        mode: Mode,
        backoff: BackoffLevel,
        signals: &SessionSignals,
    ) -> GuidancePolicy {
        let runtime = &self.policy.runtime;
        let mut cell = self.policy.cell(mode, backoff).clone();

        if backoff >= BackoffLevel::L2 {
            cell.phrase_boundary_only = true;
        }
        if signals.ignore_streak >= runtime.ignore_streak_threshold {
            cell.interrupt_budget_per_min = cell
                .interrupt_budget_per_min
                .min(runtime.ignore_streak_budget_cap);
            cell.min_pause_ms += runtime.ignore_streak_extra_pause_ms;
        }
        if signals.silence_preference > runtime.silence_pref_hard {
            cell.interrupt_budget_per_min *= 0.25;
            cell.min_pause_ms += 4000.0;
        } else if signals.silence_preference > runtime.silence_pref_soft {
            cell.interrupt_budget_per_min *= 0.5;
            cell.min_pause_ms += 2000.0;
        }
        if let Some(confidence) = signals.mode_confidence {
            if confidence < runtime.low_mode_confidence {
                let scale = (confidence / runtime.low_mode_confidence).clamp(0.0, 1.0);
                cell.interrupt_budget_per_min *= scale;
                cell.min_pause_ms += (1.0 - scale) * 2000.0;
            }
        }
        if mode == Mode::Performance {
            if cell.tone == Tone::Instructive {
                cell.tone = Tone::Neutral;
            }
            if cell.granularity == Granularity::Micro {
                cell.granularity = Granularity::Summary;
            }
            cell.interrupt_budget_per_min = cell.interrupt_budget_per_min.min(0.2);
        }
        if backoff == BackoffLevel::L3 {
            cell.realtime_enabled = false;
            cell.granularity = cell.granularity.min(Granularity::Summary);
        }
        if backoff == BackoffLevel::L4 {
            cell = GuidancePolicy::silent();
        }
        cell
    }

    fn refill(&mut self, now_ms: f64, budget_per_min: f64) {
        if let Some(last) = self.last_refill_ms {
            let elapsed_min = (now_ms - last).max(0.0) / 60_000.0;
            self.tokens = (self.tokens + elapsed_min * budget_per_min)
                .min(self.policy.runtime.token_bucket_max);
        }
        self.last_refill_ms = Some(now_ms);
    }

    fn pick_modality(&mut self, effective: &GuidancePolicy, masked_sum: f64) -> Modality {
        let mut roll = self.rng.gen::<f64>() * masked_sum;
        for modality in Modality::ALL {
            if !self.availability.allows(modality) {
                continue;
            }
            let weight = effective.modality_weights.get(modality);
            if weight <= 0.0 {
                continue;
            }
            if roll < weight {
                return modality;
            }
            roll -= weight;
        }
        // Float edge: fall back to the last available weighted channel.
        Modality::ALL
            .into_iter()
            .rev()
            .find(|&m| self.availability.allows(m) && effective.modality_weights.get(m) > 0.0)
            .unwrap_or(Modality::Text)
    }

    fn refuse(
        &self,
        reason: DecisionReason,
        effective: GuidancePolicy,
    ) -> InterventionDecision {
        InterventionDecision {
            should_initiate: false,
            reason,
            effective,
            modality: None,
        }
    }

    /// Callers supply a monotonic clock; tolerate small regressions by
    /// clamping rather than erroring.
    fn clamp_now(&mut self, now_ms: f64) -> f64 {
        if now_ms < self.last_now_ms {
            warn!(
                now_ms,
                last_now_ms = self.last_now_ms,
                "non-monotonic clock input clamped"
            );
            return self.last_now_ms;
        }
        self.last_now_ms = now_ms;
        now_ms
    }
}
