//! Take analyzer
//!
//! Aligns a finalized take's events to the expected grid and computes
//! confidence-weighted metrics. Analysis is a pure function of the
//! `TakeFinalized` snapshot: same take in, same analysis out.
//!
//! Data-quality degradation (noise, partial takes, missed count-in) is
//! not an error here; it flows through the confidence/gradeability
//! model and changes what downstream routing may trust.

use tracing::debug;

use coach_common::analysis::{
    Alignment, AnalysisQuality, Gradeability, SlotHit, TakeAnalysis, TakeMetrics,
};
use coach_common::take::{FinalizeReason, TakeFinalized, TakeFlags};

/// Alignment search half-window as a fraction of slot_ms
const ALIGN_TOLERANCE_FRACTION: f64 = 0.35;

/// Stability blend weights: timing, coverage, extra-motion
const STABILITY_TIMING_WEIGHT: f64 = 0.55;
const STABILITY_COVERAGE_WEIGHT: f64 = 0.35;
const STABILITY_EXTRA_WEIGHT: f64 = 0.10;

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Analyze one finalized take
pub fn analyze_take(take: &TakeFinalized) -> TakeAnalysis {
    let alignment = align(take);
    let metrics = compute_metrics(take, &alignment);
    let quality = score_quality(take.reason, &take.flags);

    debug!(
        take_id = %take.take_id,
        hit_rate = metrics.hit_rate,
        confidence = quality.analysis_confidence,
        gradeability = ?quality.gradeability,
        "take analyzed"
    );

    TakeAnalysis {
        take_id: take.take_id,
        context: take.context.clone(),
        reason: take.reason,
        flags: take.flags,
        metrics,
        alignment,
        quality,
    }
}

/// Match in-window events to expected slots
///
/// For each expected slot in order, the nearest unused event within
/// ±0.35·slot_ms is claimed. Unmatched slots become misses; unclaimed
/// events become extras.
pub fn align(take: &TakeFinalized) -> Alignment {
    let ctx = &take.context;
    let slot_ms = ctx.slot_ms();
    let tolerance = ALIGN_TOLERANCE_FRACTION * slot_ms;
    let slots_per_bar = ctx.slots_per_bar();

    let mut used = vec![false; take.events.len()];
    let mut hits = Vec::new();
    let mut missed_slots = Vec::new();
    let mut expected_slots = 0u32;

    for slot in 0..ctx.total_slots() {
        let slot_in_bar = slot % slots_per_bar;
        if !ctx.expects_slot(slot_in_bar) {
            continue;
        }
        expected_slots += 1;
        let slot_time = take.grid_start_ms + slot as f64 * slot_ms;

        // Nearest unused event within tolerance
        let mut best: Option<(usize, f64)> = None;
        for (i, event) in take.events.iter().enumerate() {
            if used[i] {
                continue;
            }
            let offset = event.t_ms - slot_time;
            if offset.abs() <= tolerance {
                match best {
                    Some((_, b)) if b.abs() <= offset.abs() => {}
                    _ => best = Some((i, offset)),
                }
            }
        }

        match best {
            Some((i, offset)) => {
                used[i] = true;
                hits.push(SlotHit {
                    slot,
                    slot_in_bar,
                    bar: slot / slots_per_bar,
                    seq: take.events[i].seq,
                    offset_ms: offset,
                });
            }
            None => missed_slots.push(slot),
        }
    }

    let extra_seqs = take
        .events
        .iter()
        .zip(used.iter())
        .filter(|(_, &u)| !u)
        .map(|(e, _)| e.seq)
        .collect();

    Alignment {
        hits,
        missed_slots,
        extra_seqs,
        expected_slots,
    }
}

/// Derive rates, offset statistics, drift, and stability
pub fn compute_metrics(take: &TakeFinalized, alignment: &Alignment) -> TakeMetrics {
    let expected = alignment.expected_slots as f64;
    let hits = alignment.hits.len() as f64;
    let slot_ms = take.context.slot_ms();

    let (hit_rate, miss_rate, extra_rate) = if expected > 0.0 {
        (
            hits / expected,
            alignment.missed_slots.len() as f64 / expected,
            alignment.extra_seqs.len() as f64 / expected,
        )
    } else {
        (0.0, 0.0, 0.0)
    };

    let offsets: Vec<f64> = alignment.hits.iter().map(|h| h.offset_ms).collect();
    let (mean, median, std, p90_abs) = offset_statistics(&offsets);
    let drift_ms_per_bar = drift_per_bar(&offsets, hits, take.context.bars as f64);

    // Stability blend; each sub-term clamped to [0, 1]
    let timing_quality = if offsets.is_empty() {
        0.0
    } else {
        clamp01(1.0 - p90_abs / (ALIGN_TOLERANCE_FRACTION * slot_ms))
    };
    let coverage_quality = clamp01(hit_rate);
    let extra_quality = clamp01(1.0 - extra_rate);
    let stability = STABILITY_TIMING_WEIGHT * timing_quality
        + STABILITY_COVERAGE_WEIGHT * coverage_quality
        + STABILITY_EXTRA_WEIGHT * extra_quality;

    TakeMetrics {
        hit_rate,
        miss_rate,
        extra_rate,
        mean_offset_ms: mean,
        median_offset_ms: median,
        std_offset_ms: std,
        p90_abs_offset_ms: p90_abs,
        drift_ms_per_bar,
        stability,
    }
}

fn offset_statistics(offsets: &[f64]) -> (f64, f64, f64, f64) {
    if offsets.is_empty() {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let n = offsets.len() as f64;
    let mean = offsets.iter().sum::<f64>() / n;
    let variance = offsets.iter().map(|o| (o - mean).powi(2)).sum::<f64>() / n;

    let mut sorted = offsets.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("non-finite offset"));
    let median = if sorted.len() % 2 == 1 {
        sorted[sorted.len() / 2]
    } else {
        (sorted[sorted.len() / 2 - 1] + sorted[sorted.len() / 2]) / 2.0
    };

    let mut abs_sorted: Vec<f64> = offsets.iter().map(|o| o.abs()).collect();
    abs_sorted.sort_by(|a, b| a.partial_cmp(b).expect("non-finite offset"));
    let p90_index = ((0.9 * abs_sorted.len() as f64).ceil() as usize)
        .saturating_sub(1)
        .min(abs_sorted.len() - 1);
    let p90_abs = abs_sorted[p90_index];

    (mean, median, variance.sqrt(), p90_abs)
}

/// Linear-regression slope of offsets over hit order, scaled to bars
fn drift_per_bar(offsets: &[f64], hits: f64, bars: f64) -> f64 {
    if offsets.len() < 2 || bars <= 0.0 {
        return 0.0;
    }
    let n = offsets.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = offsets.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var = 0.0;
    for (i, y) in offsets.iter().enumerate() {
        let dx = i as f64 - mean_x;
        cov += dx * (y - mean_y);
        var += dx * dx;
    }
    if var == 0.0 {
        return 0.0;
    }
    let slope_per_hit = cov / var;
    slope_per_hit * (hits / bars)
}

/// Multiplicative confidence model and the derived quality record
///
/// Pure function of `(finalize_reason, flags)` only; the suppression
/// booleans never look at the metrics.
pub fn score_quality(reason: FinalizeReason, flags: &TakeFlags) -> AnalysisQuality {
    let base = match reason {
        FinalizeReason::GridComplete => 0.95,
        FinalizeReason::UserStop => 0.55,
        FinalizeReason::Restart => 0.45,
        FinalizeReason::Cancelled => 0.0,
    };

    let mut confidence = base;
    if flags.missed_count_in {
        confidence *= 0.80;
    }
    if flags.late_start {
        confidence *= 0.85;
    }
    if flags.partial_take {
        confidence *= 0.70;
    }
    if flags.tempo_mismatch {
        confidence *= 0.85;
    }
    if flags.extra_events_after_end {
        confidence *= 0.95;
    }
    if flags.extra_bars {
        confidence *= 0.90;
    }
    if flags.restart_detected {
        confidence *= 0.75;
    }
    if flags.low_confidence_events >= 10 {
        confidence *= 0.70;
    } else if flags.low_confidence_events >= 3 {
        confidence *= 0.85;
    }
    let confidence = clamp01(confidence);

    let gradeability = Gradeability::from_confidence(confidence);

    AnalysisQuality {
        analysis_confidence: confidence,
        gradeability,
        suppress_timing_critique: gradeability <= Gradeability::Low || flags.tempo_mismatch,
        suppress_micro_feedback: gradeability < Gradeability::High,
        prefer_take_quality_prompt: flags.partial_take
            || flags.missed_count_in
            || flags.restart_detected
            || gradeability == Gradeability::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_common::events::{StrumCandidate, StrumDirection};
    use coach_common::timing::{ExerciseContext, Meter, Subdivision};
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

    fn take_with_events(times: &[f64]) -> TakeFinalized {
        let events = times
            .iter()
            .enumerate()
            .map(|(i, &t)| StrumCandidate {
                t_ms: t,
                confidence: 0.9,
                direction: StrumDirection::Down,
                intensity: 0.5,
                seq: i as u64,
            })
            .collect();
        TakeFinalized {
            take_id: Uuid::new_v4(),
            context: ctx(),
            take_start_ms: 0.0,
            count_in_start_ms: 0.0,
            grid_start_ms: 1000.0,
            grid_end_ms: 7000.0,
            events,
            reason: FinalizeReason::GridComplete,
            flags: TakeFlags::default(),
            dropped_duplicates: 0,
        }
    }

    #[test]
    fn test_perfect_take_aligns_all_slots() {
        // 16 slots at 375ms starting at 1000
        let times: Vec<f64> = (0..16).map(|k| 1000.0 + k as f64 * 375.0).collect();
        let take = take_with_events(&times);
        let a = align(&take);
        assert_eq!(a.expected_slots, 16);
        assert_eq!(a.hits.len(), 16);
        assert!(a.missed_slots.is_empty());
        assert!(a.extra_seqs.is_empty());

        let m = compute_metrics(&take, &a);
        assert_eq!(m.hit_rate, 1.0);
        assert_eq!(m.miss_rate, 0.0);
        assert_eq!(m.mean_offset_ms, 0.0);
        assert!(m.stability > 0.95);
    }

    #[test]
    fn test_alignment_tolerance_boundary() {
        // Tolerance is 0.35 * 375 = 131.25ms; one event just inside,
        // one just outside the window of its slot.
        let take = take_with_events(&[1000.0 + 131.0, 1375.0 + 132.0]);
        let a = align(&take);
        assert_eq!(a.hits.len(), 1);
        assert_eq!(a.hits[0].slot, 0);
        assert_eq!(a.extra_seqs, vec![1]);
    }

    #[test]
    fn test_nearest_event_wins() {
        // Two events near slot 0; the closer one is claimed, the other
        // becomes an extra (slot 1 is too far for it).
        let take = take_with_events(&[990.0, 1100.0]);
        let a = align(&take);
        assert_eq!(a.hits.len(), 1);
        assert_eq!(a.hits[0].seq, 0);
        assert_eq!(a.hits[0].offset_ms, -10.0);
        assert!(a.extra_seqs.contains(&1));
    }

    #[test]
    fn test_pattern_mask_limits_expected_slots() {
        let mut take = take_with_events(&[1000.0, 1750.0]);
        // Expect only beats (slots 0, 2, 4, 6) in each bar
        take.context.pattern = vec![true, false, true, false, true, false, true, false];
        let a = align(&take);
        assert_eq!(a.expected_slots, 8);
        assert_eq!(a.hits.len(), 2);
    }

    #[test]
    fn test_drift_detection() {
        // Offsets grow 4ms per hit: clear positive drift
        let times: Vec<f64> = (0..16)
            .map(|k| 1000.0 + k as f64 * 375.0 + 4.0 * k as f64)
            .collect();
        let take = take_with_events(&times);
        let a = align(&take);
        let m = compute_metrics(&take, &a);
        // 4ms/hit * 8 hits/bar = 32ms/bar
        assert!((m.drift_ms_per_bar - 32.0).abs() < 1.0);
    }

    #[test]
    fn test_confidence_base_by_reason() {
        let flags = TakeFlags::default();
        assert_eq!(
            score_quality(FinalizeReason::GridComplete, &flags).analysis_confidence,
            0.95
        );
        assert_eq!(
            score_quality(FinalizeReason::UserStop, &flags).analysis_confidence,
            0.55
        );
        assert_eq!(
            score_quality(FinalizeReason::Restart, &flags).analysis_confidence,
            0.45
        );
        assert_eq!(
            score_quality(FinalizeReason::Cancelled, &flags).analysis_confidence,
            0.0
        );
    }

    #[test]
    fn test_confidence_monotonic_under_flags() {
        // Adding any single penalizing flag must not increase confidence
        let base = score_quality(FinalizeReason::GridComplete, &TakeFlags::default())
            .analysis_confidence;

        let flag_sets = [
            TakeFlags { missed_count_in: true, ..TakeFlags::default() },
            TakeFlags { late_start: true, ..TakeFlags::default() },
            TakeFlags { partial_take: true, ..TakeFlags::default() },
            TakeFlags { tempo_mismatch: true, ..TakeFlags::default() },
            TakeFlags { extra_events_after_end: true, ..TakeFlags::default() },
            TakeFlags { extra_bars: true, ..TakeFlags::default() },
            TakeFlags { restart_detected: true, ..TakeFlags::default() },
            TakeFlags { low_confidence_events: 3, ..TakeFlags::default() },
            TakeFlags { low_confidence_events: 10, ..TakeFlags::default() },
        ];
        for flags in flag_sets {
            let c = score_quality(FinalizeReason::GridComplete, &flags).analysis_confidence;
            assert!(c <= base, "flags {flags:?} raised confidence {c} > {base}");
        }
    }

    #[test]
    fn test_low_confidence_count_tiers() {
        let at = |n: u32| {
            score_quality(
                FinalizeReason::GridComplete,
                &TakeFlags { low_confidence_events: n, ..TakeFlags::default() },
            )
            .analysis_confidence
        };
        assert_eq!(at(0), 0.95);
        assert_eq!(at(2), 0.95);
        assert!((at(3) - 0.95 * 0.85).abs() < 1e-12);
        assert!((at(9) - 0.95 * 0.85).abs() < 1e-12);
        assert!((at(10) - 0.95 * 0.70).abs() < 1e-12);
    }

    #[test]
    fn test_suppression_pure_functions() {
        let q = score_quality(FinalizeReason::GridComplete, &TakeFlags::default());
        assert_eq!(q.gradeability, Gradeability::High);
        assert!(!q.suppress_timing_critique);
        assert!(!q.suppress_micro_feedback);
        assert!(!q.prefer_take_quality_prompt);

        // Tempo mismatch suppresses timing critique even at OK grade
        let q = score_quality(
            FinalizeReason::GridComplete,
            &TakeFlags { tempo_mismatch: true, ..TakeFlags::default() },
        );
        assert!(q.suppress_timing_critique);

        let q = score_quality(
            FinalizeReason::UserStop,
            &TakeFlags { partial_take: true, ..TakeFlags::default() },
        );
        assert_eq!(q.gradeability, Gradeability::Low);
        assert!(q.prefer_take_quality_prompt);
    }
}
