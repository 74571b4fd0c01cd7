//! Guidance engine invariants across the full policy matrix
//!
//! These sweep every (mode, backoff) cell with adversarial signal
//! combinations; the properties here must hold no matter how the
//! matrix is tuned.

use coach_engine::guidance::{
    BackoffLevel, DecisionReason, Granularity, GuidanceEngine, Modality, ModalityAvailability,
    Mode, PolicyConfig, SessionSignals, Tone,
};

fn engine(seed: u64) -> GuidanceEngine {
    GuidanceEngine::new(PolicyConfig::builtin(), ModalityAvailability::default(), seed).unwrap()
}

fn open_signals() -> SessionSignals {
    SessionSignals {
        time_since_last_note_on_ms: 600_000.0,
        phrase_boundary_age_ms: Some(2_000.0),
        ignore_streak: 0,
        silence_preference: 0.0,
        user_explicit_quiet: false,
        mode_confidence: None,
    }
}

#[test]
fn explicit_quiet_is_an_absolute_veto() {
    let signals = SessionSignals {
        user_explicit_quiet: true,
        ..open_signals()
    };
    for mode in Mode::ALL {
        for backoff in BackoffLevel::ALL {
            let mut e = engine(3);
            for i in 1..50 {
                let d = e.decide(i as f64 * 60_000.0, mode, backoff, &signals);
                assert!(!d.should_initiate, "{mode:?}/{backoff:?} spoke over quiet");
            }
        }
    }
}

#[test]
fn l4_never_initiates_for_any_mode() {
    for mode in Mode::ALL {
        let mut e = engine(5);
        for i in 1..100 {
            let d = e.decide(i as f64 * 60_000.0, mode, BackoffLevel::L4, &open_signals());
            assert!(!d.should_initiate);
            assert_eq!(d.effective.tone, Tone::Silent);
            assert_eq!(d.effective.granularity, Granularity::None);
        }
    }
}

#[test]
fn performance_mode_is_never_instructive_or_micro() {
    for backoff in BackoffLevel::ALL {
        for seed in 0..5u64 {
            let mut e = engine(seed);
            for i in 1..50 {
                let d = e.decide(
                    i as f64 * 120_000.0,
                    Mode::Performance,
                    backoff,
                    &open_signals(),
                );
                assert_ne!(d.effective.tone, Tone::Instructive);
                assert_ne!(d.effective.granularity, Granularity::Micro);
            }
        }
    }
}

#[test]
fn interventions_respect_cooldown_spacing() {
    let mut e = engine(11);
    let signals = open_signals();
    let mut last_fire: Option<f64> = None;
    let mut now = 0.0;
    for _ in 0..500 {
        now += 1_000.0;
        let d = e.decide(now, Mode::Practice, BackoffLevel::L0, &signals);
        if d.should_initiate {
            if let Some(prev) = last_fire {
                assert!(now - prev >= 8_000.0, "fired {}ms after previous", now - prev);
            }
            last_fire = Some(now);
        }
    }
    assert!(last_fire.is_some(), "engine never fired with an open window");
}

#[test]
fn budget_bounds_interventions_per_minute() {
    // Practice L0 refills 3 tokens/min from a 2-token bucket; over ten
    // minutes of constant open window the engine cannot fire more than
    // refill + initial capacity allows.
    let mut e = engine(13);
    let signals = open_signals();
    let mut fired = 0u32;
    let mut now = 0.0;
    for _ in 0..600 {
        now += 1_000.0;
        if e.decide(now, Mode::Practice, BackoffLevel::L0, &signals).should_initiate {
            fired += 1;
        }
    }
    assert!(fired <= 32, "fired {fired} times in 10 minutes");
}

#[test]
fn deeper_backoff_never_fires_more_often() {
    let count_fires = |backoff: BackoffLevel| -> u32 {
        let mut e = engine(17);
        let signals = open_signals();
        let mut fired = 0;
        let mut now = 0.0;
        for _ in 0..600 {
            now += 1_000.0;
            if e.decide(now, Mode::Neutral, backoff, &signals).should_initiate {
                fired += 1;
            }
        }
        fired
    };
    let l0 = count_fires(BackoffLevel::L0);
    let l2 = count_fires(BackoffLevel::L2);
    let l4 = count_fires(BackoffLevel::L4);
    assert!(l0 >= l2, "L0 {l0} < L2 {l2}");
    assert!(l2 >= l4);
    assert_eq!(l4, 0);
}

#[test]
fn silence_preference_quiets_the_coach() {
    let count_fires = |silence: f64| -> u32 {
        let mut e = engine(19);
        let signals = SessionSignals {
            silence_preference: silence,
            ..open_signals()
        };
        let mut fired = 0;
        let mut now = 0.0;
        for _ in 0..600 {
            now += 1_000.0;
            if e.decide(now, Mode::Neutral, BackoffLevel::L0, &signals).should_initiate {
                fired += 1;
            }
        }
        fired
    };
    assert!(count_fires(0.0) >= count_fires(0.5));
    assert!(count_fires(0.5) >= count_fires(0.9));
}

#[test]
fn unavailable_modalities_are_never_chosen() {
    let availability = ModalityAvailability {
        haptic: false,
        visual: true,
        audio: false,
        text: true,
    };
    let mut e = GuidanceEngine::new(PolicyConfig::builtin(), availability, 23).unwrap();
    let signals = open_signals();
    let mut now = 0.0;
    let mut chosen = Vec::new();
    for _ in 0..300 {
        now += 9_000.0;
        let d = e.decide(now, Mode::Practice, BackoffLevel::L0, &signals);
        if let Some(m) = d.modality {
            chosen.push(m);
        }
    }
    assert!(!chosen.is_empty());
    assert!(chosen
        .iter()
        .all(|m| matches!(m, Modality::Visual | Modality::Text)));
}

#[test]
fn every_refusal_carries_a_reason() {
    let mut e = engine(29);
    let closed = SessionSignals {
        time_since_last_note_on_ms: 0.0,
        ..open_signals()
    };
    let d = e.decide(10_000.0, Mode::Neutral, BackoffLevel::L0, &closed);
    assert!(!d.should_initiate);
    assert_ne!(d.reason, DecisionReason::Initiate);
    assert!(d.modality.is_none());
}

#[test]
fn identical_seed_and_inputs_replay_identically() {
    let run = |seed: u64| {
        let mut e = engine(seed);
        let signals = open_signals();
        let mut log = Vec::new();
        let mut now = 0.0;
        for step in 0..400 {
            now += 1_500.0;
            let backoff = BackoffLevel::ALL[step % 5];
            let d = e.decide(now, Mode::Practice, backoff, &signals);
            log.push((d.should_initiate, d.reason, d.modality));
        }
        log
    };
    assert_eq!(run(99), run(99));
}
