//! Pulse scheduler
//!
//! Expands a declarative coach payload into concrete, millisecond-exact
//! `PulseEvent`s on the musical grid. Pure function of (payload,
//! context): no clock, no RNG, so the same inputs always produce the
//! same schedule and re-scheduling is idempotent.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use coach_common::timing::{Meter, MusicalContext, Subdivision};

/// One haptic/audio pulse to emit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseEvent {
    pub time_ms: f64,
    /// Slot position within the bar, 0-based
    pub slot_in_bar: u32,
    /// Bar number; negative during a count-in before the grid
    pub bar_index: i64,
    pub accented: bool,
    /// Output gain in [0, 1]
    pub gain: f64,
}

/// Placement of a pattern relative to the grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseWindow {
    /// Absolute start; defaults to the grid start when absent
    pub deliver_at_ms: Option<f64>,
    /// Shift applied after anchoring, before quantization
    pub phase_offset_ms: f64,
    pub duration_ms: f64,
    /// Snap the anchor onto the slot grid
    pub quantize: bool,
    /// Max distance to snap to the nearest boundary; beyond it, the
    /// anchor moves forward to the next boundary instead
    pub max_snap_ms: f64,
}

impl PulseWindow {
    pub fn from_grid_start(duration_ms: f64) -> Self {
        Self {
            deliver_at_ms: None,
            phase_offset_ms: 0.0,
            duration_ms,
            quantize: true,
            max_snap_ms: 40.0,
        }
    }
}

/// A repeating pulse shape over the slot grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulsePattern {
    pub window: PulseWindow,
    pub base_gain: f64,
    /// Extra gain per slot-in-bar; any entry > 0 marks the slot accented
    pub accents: BTreeMap<u32, f64>,
    /// Slots-in-bar that emit nothing
    pub suppressed: BTreeSet<u32>,
}

impl PulsePattern {
    /// Every slot pulses; downbeats and beat starts are accented.
    pub fn subdivision(
        meter: Meter,
        subdivision: Subdivision,
        window: PulseWindow,
        base_gain: f64,
    ) -> Self {
        let slots_per_beat = subdivision.slots_per_beat();
        let mut accents = BTreeMap::new();
        for beat in 0..meter.beats_per_bar as u32 {
            let slot = beat * slots_per_beat;
            // Downbeat strongest, other beat starts lighter.
            accents.insert(slot, if beat == 0 { 0.5 } else { 0.25 });
        }
        Self {
            window,
            base_gain,
            accents,
            suppressed: BTreeSet::new(),
        }
    }

    /// Only the backbeat positions pulse, all accented.
    pub fn backbeat(
        meter: Meter,
        subdivision: Subdivision,
        window: PulseWindow,
        base_gain: f64,
    ) -> Self {
        let slots_per_beat = subdivision.slots_per_beat();
        let slots_per_bar = meter.beats_per_bar as u32 * slots_per_beat;
        let active: BTreeSet<u32> = meter
            .backbeat_beats()
            .into_iter()
            .map(|beat| beat as u32 * slots_per_beat)
            .collect();
        let accents = active.iter().map(|&slot| (slot, 0.4)).collect();
        let suppressed = (0..slots_per_bar).filter(|s| !active.contains(s)).collect();
        Self {
            window,
            base_gain,
            accents,
            suppressed,
        }
    }
}

/// Declarative payload the decision layer hands to the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoachPayload {
    /// A pulse pattern over the grid
    Pulse(PulsePattern),
    /// Count-in clicks on the beats leading into the grid
    CountIn { beats: u8, gain: f64 },
    /// One click at the start of each bar
    BarCounter { bars: u32, gain: f64 },
    /// Non-temporal cue; schedules nothing
    TextPrompt { cue_key: String },
    /// Several payloads merged into one timeline
    Composite(Vec<CoachPayload>),
}

/// Expand a payload into an ordered pulse schedule.
///
/// Output is strictly increasing in time and every event lies within
/// the payload's own window.
pub fn schedule(payload: &CoachPayload, context: &MusicalContext) -> Vec<PulseEvent> {
    match payload {
        CoachPayload::Pulse(pattern) => schedule_pattern(pattern, context),
        CoachPayload::CountIn { beats, gain } => schedule_count_in(*beats, *gain, context),
        CoachPayload::BarCounter { bars, gain } => schedule_bar_counter(*bars, *gain, context),
        CoachPayload::TextPrompt { .. } => Vec::new(),
        CoachPayload::Composite(parts) => {
            let mut merged: Vec<PulseEvent> = Vec::new();
            for part in parts {
                merged.extend(schedule(part, context));
            }
            merged.sort_by(|a, b| a.time_ms.total_cmp(&b.time_ms));
            // Identical times collapse to the first contributor.
            merged.dedup_by(|b, a| b.time_ms == a.time_ms);
            merged
        }
    }
}

fn schedule_pattern(pattern: &PulsePattern, context: &MusicalContext) -> Vec<PulseEvent> {
    let slot_ms = context.slot_ms();
    let slots_per_bar = context.slots_per_bar() as i64;
    if slot_ms <= 0.0 || slots_per_bar == 0 || pattern.window.duration_ms <= 0.0 {
        return Vec::new();
    }

    let anchor = pattern
        .window
        .deliver_at_ms
        .unwrap_or(context.grid_start_ms)
        + pattern.window.phase_offset_ms;
    let start = align_anchor(anchor, context, &pattern.window);
    let end = start + pattern.window.duration_ms;

    // First grid slot at or after the aligned start.
    let mut slot = ((start - context.grid_start_ms) / slot_ms).ceil() as i64;
    // Guard against float error placing us one slot early.
    while context.grid_start_ms + slot as f64 * slot_ms < start - 1e-9 {
        slot += 1;
    }

    let mut events = Vec::new();
    loop {
        let t = context.grid_start_ms + slot as f64 * slot_ms;
        if t >= end {
            break;
        }
        let slot_in_bar = slot.rem_euclid(slots_per_bar) as u32;
        let bar_index = slot.div_euclid(slots_per_bar);
        if !pattern.suppressed.contains(&slot_in_bar) {
            let accent = pattern.accents.get(&slot_in_bar).copied().unwrap_or(0.0);
            events.push(PulseEvent {
                time_ms: t,
                slot_in_bar,
                bar_index,
                accented: accent > 0.0,
                gain: (pattern.base_gain * (1.0 + accent)).clamp(0.0, 1.0),
            });
        }
        slot += 1;
    }
    events
}

/// Snap or advance the anchor onto the slot grid
fn align_anchor(anchor: f64, context: &MusicalContext, window: &PulseWindow) -> f64 {
    let slot_ms = context.slot_ms();
    let offset = anchor - context.grid_start_ms;
    if window.quantize {
        let nearest = (offset / slot_ms).round() * slot_ms;
        if (offset - nearest).abs() <= window.max_snap_ms {
            return context.grid_start_ms + nearest;
        }
    }
    // Not snapping: start at the next boundary so the first pulse is
    // never earlier than asked for.
    context.grid_start_ms + (offset / slot_ms).ceil() * slot_ms
}

fn schedule_count_in(beats: u8, gain: f64, context: &MusicalContext) -> Vec<PulseEvent> {
    let beat_ms = coach_common::timing::beat_ms(context.bpm);
    let slots_per_beat = context.subdivision.slots_per_beat() as i64;
    let slots_per_bar = context.slots_per_bar() as i64;
    if beat_ms <= 0.0 || slots_per_bar == 0 {
        return Vec::new();
    }
    (0..beats as i64)
        .map(|i| {
            let beats_before = beats as i64 - i;
            let t = context.grid_start_ms - beats_before as f64 * beat_ms;
            let slot = -beats_before * slots_per_beat;
            PulseEvent {
                time_ms: t,
                slot_in_bar: slot.rem_euclid(slots_per_bar) as u32,
                bar_index: slot.div_euclid(slots_per_bar),
                accented: i == 0,
                gain: gain.clamp(0.0, 1.0),
            }
        })
        .collect()
}

fn schedule_bar_counter(bars: u32, gain: f64, context: &MusicalContext) -> Vec<PulseEvent> {
    let bar_ms = context.bar_ms();
    (0..bars as i64)
        .map(|bar| PulseEvent {
            time_ms: context.grid_start_ms + bar as f64 * bar_ms,
            slot_in_bar: 0,
            bar_index: bar,
            accented: true,
            gain: gain.clamp(0.0, 1.0),
        })
        .collect()
}
