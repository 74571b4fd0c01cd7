//! Take segmenter
//!
//! Converts a live `StrumCandidate` stream into discrete, flagged
//! `TakeFinalized` records through the lifecycle
//!
//! ```text
//! Idle -(begin_exercise)-> Armed -(tick)-> CountIn
//!      -(now >= grid_start)-> Playing
//!      -(grid end | pause timeout | restart signature)-> Finalizing
//!      -(post-roll elapsed)-> Armed | Idle
//! ```
//!
//! The grid is always hard-stopped at `expected_grid_end`; it is never
//! stretched. Exactly one `TakeFinalized` is produced per lifecycle,
//! and no flag is ever cleared after being set within a take.

use std::collections::HashSet;

use tracing::{debug, info, trace};
use uuid::Uuid;

use coach_common::events::StrumCandidate;
use coach_common::take::{FinalizeReason, TakeFinalized, TakeFlags};
use coach_common::timing::ExerciseContext;
use coach_common::{Error, Result};

/// Segmenter tuning, validated at construction
#[derive(Debug, Clone, PartialEq)]
pub struct SegmenterConfig {
    /// Candidates below this confidence are counted and excluded
    pub min_confidence: f32,
    /// Silence during Playing that finalizes as an early stop
    pub abort_pause_ms: f64,
    /// Silence that arms restart-signature detection
    pub restart_pause_ms: f64,
    /// Events needed inside the burst window to confirm a restart
    pub restart_burst_count: u32,
    /// Width of the restart burst window
    pub restart_burst_ms: f64,
    /// Post-grid window separating stragglers from extra bars
    pub post_roll_ms: f64,
    /// Fraction of slot_ms the median inter-event interval may deviate
    pub tempo_mismatch_fraction: f64,
    /// Minimum in-window events before tempo mismatch is judged
    pub tempo_mismatch_min_events: usize,
    /// Re-arm automatically after a finalize (Idle otherwise)
    pub auto_rearm: bool,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.30,
            abort_pause_ms: 2500.0,
            restart_pause_ms: 1500.0,
            restart_burst_count: 3,
            restart_burst_ms: 900.0,
            post_roll_ms: 1200.0,
            tempo_mismatch_fraction: 0.25,
            tempo_mismatch_min_events: 8,
            auto_rearm: true,
        }
    }
}

impl SegmenterConfig {
    /// Fail fast on out-of-range tuning
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(Error::Config(format!(
                "min_confidence {} outside [0, 1]",
                self.min_confidence
            )));
        }
        for (name, v) in [
            ("abort_pause_ms", self.abort_pause_ms),
            ("restart_pause_ms", self.restart_pause_ms),
            ("restart_burst_ms", self.restart_burst_ms),
            ("post_roll_ms", self.post_roll_ms),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(Error::Config(format!("{name} must be finite and > 0, got {v}")));
            }
        }
        if self.restart_burst_count < 2 {
            return Err(Error::Config(
                "restart_burst_count must be at least 2".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.tempo_mismatch_fraction) || self.tempo_mismatch_fraction == 0.0 {
            return Err(Error::Config(format!(
                "tempo_mismatch_fraction {} outside (0, 1)",
                self.tempo_mismatch_fraction
            )));
        }
        if self.tempo_mismatch_min_events < 2 {
            return Err(Error::Config(
                "tempo_mismatch_min_events must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

/// Segmenter lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    Idle,
    Armed,
    CountIn,
    Playing,
    Finalizing,
}

/// Live take segmenter
///
/// Single-threaded and tick-driven: the host calls `ingest` for each
/// candidate (non-decreasing timestamps) and `tick` on its cadence.
/// All waiting is expressed as explicit checks against the supplied
/// clock; nothing here owns a timer.
pub struct TakeSegmenter {
    config: SegmenterConfig,
    state: SegmenterState,
    context: Option<ExerciseContext>,

    take_id: Uuid,
    take_start_ms: f64,
    count_in_start_ms: f64,
    grid_start_ms: f64,
    grid_end_ms: f64,

    /// Accepted events before grid start (count-in window)
    pre_grid: Vec<StrumCandidate>,
    /// Accepted events in [grid_start, grid_end)
    in_window: Vec<StrumCandidate>,

    flags: TakeFlags,
    dropped_duplicates: u32,
    seen_seqs: HashSet<u64>,

    /// Time of the last accepted in-window event (grid_start before any)
    last_activity_ms: f64,

    // Restart-signature tracking: a long silence arms a burst window
    burst_start_ms: Option<f64>,
    burst_count: u32,
}

impl TakeSegmenter {
    pub fn new(config: SegmenterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: SegmenterState::Idle,
            context: None,
            take_id: Uuid::new_v4(),
            take_start_ms: 0.0,
            count_in_start_ms: 0.0,
            grid_start_ms: 0.0,
            grid_end_ms: 0.0,
            pre_grid: Vec::new(),
            in_window: Vec::new(),
            flags: TakeFlags::default(),
            dropped_duplicates: 0,
            seen_seqs: HashSet::new(),
            last_activity_ms: 0.0,
            burst_start_ms: None,
            burst_count: 0,
        })
    }

    pub fn state(&self) -> SegmenterState {
        self.state
    }

    /// Arm a new exercise; valid from Idle or Armed only
    pub fn begin_exercise(&mut self, context: ExerciseContext, now_ms: f64) -> Result<()> {
        context.validate()?;
        match self.state {
            SegmenterState::Idle | SegmenterState::Armed => {
                self.context = Some(context);
                self.arm_take(now_ms);
                info!(take_id = %self.take_id, "exercise armed");
                Ok(())
            }
            _ => Err(Error::InvalidInput(
                "cannot begin an exercise while a take is live".to_string(),
            )),
        }
    }

    /// Drive time forward; may finalize a take
    pub fn tick(&mut self, now_ms: f64) -> Option<TakeFinalized> {
        self.advance_transitions(now_ms);
        self.check_finalize(now_ms)
    }

    /// Ingest one candidate; may finalize a take (restart / grid end)
    ///
    /// The candidate is attributed to the current take first, then its
    /// timestamp drives the same time checks a tick would, so an event
    /// beyond the post-roll still lands its `extra_bars` flag on the
    /// take it trails.
    pub fn ingest(&mut self, candidate: StrumCandidate) -> Option<TakeFinalized> {
        if self.state == SegmenterState::Idle {
            trace!(seq = candidate.seq, "candidate ignored while idle");
            return None;
        }

        // Duplicate sequence ids are dropped, counted, never fatal
        if !self.seen_seqs.insert(candidate.seq) {
            self.dropped_duplicates += 1;
            trace!(seq = candidate.seq, "duplicate candidate dropped");
            return None;
        }

        self.advance_transitions(candidate.t_ms);

        if candidate.confidence < self.config.min_confidence {
            // Confidence filter: counted, excluded from grading
            self.flags.low_confidence_events += 1;
        } else if let Some(take) = self.accept(candidate) {
            // Restart signature confirmed; already re-armed
            return Some(take);
        }

        self.check_finalize(candidate.t_ms)
    }

    /// Host-initiated stop
    pub fn stop(&mut self, now_ms: f64) -> Option<TakeFinalized> {
        match self.state {
            SegmenterState::Idle => None,
            SegmenterState::Armed => {
                self.state = SegmenterState::Idle;
                None
            }
            _ => {
                if now_ms < self.grid_end_ms {
                    self.flags.partial_take = true;
                }
                Some(self.finalize(FinalizeReason::UserStop, now_ms))
            }
        }
    }

    /// Host-initiated cancel; the take is discarded downstream
    pub fn cancel(&mut self, now_ms: f64) -> Option<TakeFinalized> {
        match self.state {
            SegmenterState::Idle => None,
            SegmenterState::Armed => {
                self.state = SegmenterState::Idle;
                None
            }
            _ => Some(self.finalize(FinalizeReason::Cancelled, now_ms)),
        }
    }

    fn arm_take(&mut self, now_ms: f64) {
        self.take_id = Uuid::new_v4();
        self.take_start_ms = now_ms;
        self.count_in_start_ms = now_ms;
        self.grid_start_ms = 0.0;
        self.grid_end_ms = 0.0;
        self.pre_grid.clear();
        self.in_window.clear();
        self.flags = TakeFlags::default();
        self.dropped_duplicates = 0;
        self.seen_seqs.clear();
        self.last_activity_ms = now_ms;
        self.burst_start_ms = None;
        self.burst_count = 0;
        self.state = SegmenterState::Armed;
    }

    /// Non-finalizing state transitions shared by `tick` and `ingest`
    fn advance_transitions(&mut self, now_ms: f64) {
        if self.state == SegmenterState::Armed {
            let ctx = self.context.as_ref().expect("armed without context");
            self.count_in_start_ms = now_ms;
            self.grid_start_ms = now_ms + ctx.count_in_ms();
            self.grid_end_ms = self.grid_start_ms + ctx.grid_duration_ms();
            self.last_activity_ms = self.grid_start_ms;
            self.state = SegmenterState::CountIn;
            debug!(
                take_id = %self.take_id,
                grid_start = self.grid_start_ms,
                grid_end = self.grid_end_ms,
                "count-in started"
            );
        }

        if self.state == SegmenterState::CountIn && now_ms >= self.grid_start_ms {
            self.state = SegmenterState::Playing;
            debug!(take_id = %self.take_id, "grid entered");
        }

        if self.state == SegmenterState::Playing && now_ms >= self.grid_end_ms {
            self.state = SegmenterState::Finalizing;
            debug!(take_id = %self.take_id, "grid complete, post-roll open");
        }
    }

    /// Time-based finalization checks, after any event was attributed
    fn check_finalize(&mut self, now_ms: f64) -> Option<TakeFinalized> {
        if self.state == SegmenterState::Playing
            && now_ms - self.last_activity_ms >= self.config.abort_pause_ms
        {
            // Early stop: silence before grid end
            self.flags.partial_take = true;
            return Some(self.finalize(FinalizeReason::UserStop, now_ms));
        }

        if self.state == SegmenterState::Finalizing
            && now_ms >= self.grid_end_ms + self.config.post_roll_ms
        {
            return Some(self.finalize(FinalizeReason::GridComplete, now_ms));
        }

        None
    }

    /// Buffer an accepted candidate; may finalize on restart signature
    fn accept(&mut self, candidate: StrumCandidate) -> Option<TakeFinalized> {
        let t = candidate.t_ms;

        if t < self.grid_start_ms {
            self.pre_grid.push(candidate);
            return None;
        }

        if t < self.grid_end_ms {
            // Late start: first in-window hit beyond half a slot
            let slot_ms = self.context.as_ref().map(|c| c.slot_ms()).unwrap_or(0.0);
            if self.in_window.is_empty() && t > self.grid_start_ms + 0.5 * slot_ms {
                self.flags.late_start = true;
            }

            // Restart signature: long silence, then a burst
            let gap = t - self.last_activity_ms;
            if !self.in_window.is_empty() && gap >= self.config.restart_pause_ms {
                self.burst_start_ms = Some(t);
                self.burst_count = 1;
            } else if let Some(burst_start) = self.burst_start_ms {
                if t - burst_start <= self.config.restart_burst_ms {
                    self.burst_count += 1;
                    if self.burst_count >= self.config.restart_burst_count {
                        // The burst is the player starting over; it does
                        // not belong to the finalized take's grading window.
                        self.in_window.retain(|e| e.t_ms < burst_start);
                        self.flags.restart_detected = true;
                        return Some(self.finalize(FinalizeReason::Restart, t));
                    }
                } else {
                    self.burst_start_ms = None;
                    self.burst_count = 0;
                }
            }

            self.in_window.push(candidate);
            self.last_activity_ms = t;
            return None;
        }

        // Past grid end: post-roll stragglers vs. runaway extra bars
        if t < self.grid_end_ms + self.config.post_roll_ms {
            self.flags.extra_events_after_end = true;
        } else {
            self.flags.extra_bars = true;
        }
        None
    }

    /// Freeze the take and hand it downstream
    fn finalize(&mut self, reason: FinalizeReason, now_ms: f64) -> TakeFinalized {
        let ctx = self.context.clone().expect("finalize without context");

        // Missed count-in: >= 2 accepted hits inside the final count-in
        // beat before grid start.
        let window_start = self.grid_start_ms - ctx.beat_ms();
        let in_last_beat = self
            .pre_grid
            .iter()
            .filter(|e| e.t_ms >= window_start && e.t_ms < self.grid_start_ms)
            .count();
        if in_last_beat >= 2 {
            self.flags.missed_count_in = true;
        }

        // Tempo mismatch: median inter-event interval vs slot_ms, only
        // judged with enough events to avoid noise.
        if self.in_window.len() >= self.config.tempo_mismatch_min_events {
            let mut deltas: Vec<f64> = self
                .in_window
                .windows(2)
                .map(|w| w[1].t_ms - w[0].t_ms)
                .collect();
            deltas.sort_by(|a, b| a.partial_cmp(b).expect("non-finite event delta"));
            let median = deltas[deltas.len() / 2];
            let slot_ms = ctx.slot_ms();
            if (median - slot_ms).abs() > self.config.tempo_mismatch_fraction * slot_ms {
                self.flags.tempo_mismatch = true;
            }
        }

        let take = TakeFinalized {
            take_id: self.take_id,
            context: ctx,
            take_start_ms: self.take_start_ms,
            count_in_start_ms: self.count_in_start_ms,
            grid_start_ms: self.grid_start_ms,
            grid_end_ms: self.grid_end_ms,
            events: std::mem::take(&mut self.in_window),
            reason,
            flags: self.flags,
            dropped_duplicates: self.dropped_duplicates,
        };

        info!(
            take_id = %take.take_id,
            reason = ?reason,
            events = take.events.len(),
            flags = ?take.flags.active_names(),
            "take finalized"
        );

        // Restart always re-arms immediately; other reasons follow the
        // auto_rearm setting, except cancel which parks the segmenter.
        let rearm = match reason {
            FinalizeReason::Restart => true,
            FinalizeReason::Cancelled => false,
            _ => self.config.auto_rearm,
        };
        if rearm {
            self.arm_take(now_ms);
        } else {
            self.state = SegmenterState::Idle;
            self.context = None;
        }

        take
    }
}
