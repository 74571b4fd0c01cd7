//! Guidance policy matrix
//!
//! A `GuidancePolicy` is one cell of the mode x backoff matrix: how
//! often the coach may interrupt, how fine-grained it may get, and how
//! it should sound. `PolicyConfig` holds all 20 cells plus the runtime
//! tuning knobs, with a built-in default matrix and a TOML loader for
//! product overrides. Config errors fail fast at load; everything at
//! runtime degrades toward silence instead of erroring.

use std::path::Path;

use serde::{Deserialize, Serialize};

use coach_common::{Error, Result};

/// Session mode selected by the host (or inferred upstream)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Default: unobtrusive but present
    Neutral,
    /// Deliberate practice: densest feedback
    Practice,
    /// Playing for real: near-silent
    Performance,
    /// Noodling: light encouragement only
    Exploration,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Neutral, Mode::Practice, Mode::Performance, Mode::Exploration];

    pub fn index(&self) -> usize {
        match self {
            Mode::Neutral => 0,
            Mode::Practice => 1,
            Mode::Performance => 2,
            Mode::Exploration => 3,
        }
    }
}

/// Escalating quiet levels; L4 is fully silent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BackoffLevel {
    L0,
    L1,
    L2,
    L3,
    L4,
}

impl BackoffLevel {
    pub const ALL: [BackoffLevel; 5] = [
        BackoffLevel::L0,
        BackoffLevel::L1,
        BackoffLevel::L2,
        BackoffLevel::L3,
        BackoffLevel::L4,
    ];

    pub fn index(&self) -> usize {
        match self {
            BackoffLevel::L0 => 0,
            BackoffLevel::L1 => 1,
            BackoffLevel::L2 => 2,
            BackoffLevel::L3 => 3,
            BackoffLevel::L4 => 4,
        }
    }

    /// Hard floor on the required quiet gap, regardless of policy cell
    pub fn min_pause_ms(&self) -> f64 {
        match self {
            BackoffLevel::L0 => 0.0,
            BackoffLevel::L1 => 1000.0,
            BackoffLevel::L2 => 2500.0,
            BackoffLevel::L3 => 5000.0,
            BackoffLevel::L4 => f64::INFINITY,
        }
    }
}

/// How fine-grained feedback may get
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    None,
    Summary,
    Phrase,
    Micro,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Instructive,
    Encouraging,
    Neutral,
    Silent,
}

/// Delivery channel for a cue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Haptic,
    Visual,
    Audio,
    Text,
}

impl Modality {
    pub const ALL: [Modality; 4] = [Modality::Haptic, Modality::Visual, Modality::Audio, Modality::Text];
}

/// Relative preference for each delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModalityWeights {
    pub haptic: f64,
    pub visual: f64,
    pub audio: f64,
    pub text: f64,
}

impl ModalityWeights {
    pub fn get(&self, modality: Modality) -> f64 {
        match modality {
            Modality::Haptic => self.haptic,
            Modality::Visual => self.visual,
            Modality::Audio => self.audio,
            Modality::Text => self.text,
        }
    }

    pub fn sum(&self) -> f64 {
        self.haptic + self.visual + self.audio + self.text
    }

    pub fn validate(&self) -> Result<()> {
        for (name, w) in [
            ("haptic", self.haptic),
            ("visual", self.visual),
            ("audio", self.audio),
            ("text", self.text),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::Config(format!(
                    "modality weight {name} must be finite and >= 0, got {w}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for ModalityWeights {
    fn default() -> Self {
        Self {
            haptic: 1.0,
            visual: 1.0,
            audio: 0.5,
            text: 0.5,
        }
    }
}

/// Opt-in assistance behaviors a cell may enable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssistFlags {
    pub offer_demo: bool,
    pub auto_slowdown: bool,
}

/// One cell of the mode x backoff policy matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidancePolicy {
    /// Token-bucket refill rate, interventions per minute
    pub interrupt_budget_per_min: f64,
    /// Required quiet gap since the last note-on
    pub min_pause_ms: f64,
    /// Only speak at phrase boundaries
    pub phrase_boundary_only: bool,
    /// Whether realtime cues are allowed at all
    pub realtime_enabled: bool,
    pub granularity: Granularity,
    pub max_cues: u8,
    pub modality_weights: ModalityWeights,
    pub tone: Tone,
    pub assist: AssistFlags,
}

impl GuidancePolicy {
    pub fn validate(&self) -> Result<()> {
        if !self.interrupt_budget_per_min.is_finite() || self.interrupt_budget_per_min < 0.0 {
            return Err(Error::Config(format!(
                "interrupt_budget_per_min must be finite and >= 0, got {}",
                self.interrupt_budget_per_min
            )));
        }
        if self.min_pause_ms.is_nan() || self.min_pause_ms < 0.0 {
            return Err(Error::Config(format!(
                "min_pause_ms must be >= 0, got {}",
                self.min_pause_ms
            )));
        }
        self.modality_weights.validate()
    }

    /// The fully-muted cell used at L4 and as the degradation target
    pub fn silent() -> Self {
        Self {
            interrupt_budget_per_min: 0.0,
            min_pause_ms: f64::INFINITY,
            phrase_boundary_only: true,
            realtime_enabled: false,
            granularity: Granularity::None,
            max_cues: 0,
            modality_weights: ModalityWeights::default(),
            tone: Tone::Silent,
            assist: AssistFlags::default(),
        }
    }
}

/// Runtime knobs shared across all cells
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeTuning {
    /// Token bucket capacity; the bucket starts full
    pub token_bucket_max: f64,
    /// Minimum spacing between two delivered interventions
    pub cooldown_ms: f64,
    /// Consecutive ignored cues before the engine backs itself off
    pub ignore_streak_threshold: u32,
    /// Budget cap applied while the ignore streak is active
    pub ignore_streak_budget_cap: f64,
    /// Extra quiet gap required while the ignore streak is active
    pub ignore_streak_extra_pause_ms: f64,
    /// Silence-preference soft threshold (halve budget above this)
    pub silence_pref_soft: f64,
    /// Silence-preference hard threshold (quarter budget above this)
    pub silence_pref_hard: f64,
    /// Performance mode never speaks within this gap of playing
    pub performance_min_pause_ms: f64,
    /// A phrase boundary only counts once it is at least this old
    pub phrase_debounce_ms: f64,
    /// Spend fractional tokens probabilistically instead of refusing
    pub stochastic_rounding: bool,
    /// Below this mode confidence, blend the cell toward silence
    pub low_mode_confidence: f64,
}

impl Default for RuntimeTuning {
    fn default() -> Self {
        Self {
            token_bucket_max: 2.0,
            cooldown_ms: 8000.0,
            ignore_streak_threshold: 3,
            ignore_streak_budget_cap: 0.5,
            ignore_streak_extra_pause_ms: 3000.0,
            silence_pref_soft: 0.4,
            silence_pref_hard: 0.7,
            performance_min_pause_ms: 4000.0,
            phrase_debounce_ms: 600.0,
            stochastic_rounding: true,
            low_mode_confidence: 0.5,
        }
    }
}

impl RuntimeTuning {
    pub fn validate(&self) -> Result<()> {
        if !self.token_bucket_max.is_finite() || self.token_bucket_max < 1.0 {
            return Err(Error::Config(format!(
                "token_bucket_max must be >= 1, got {}",
                self.token_bucket_max
            )));
        }
        if !(0.0..=1.0).contains(&self.silence_pref_soft)
            || !(0.0..=1.0).contains(&self.silence_pref_hard)
            || self.silence_pref_soft > self.silence_pref_hard
        {
            return Err(Error::Config(format!(
                "silence preference thresholds must satisfy 0 <= soft <= hard <= 1, got {} / {}",
                self.silence_pref_soft, self.silence_pref_hard
            )));
        }
        for (name, v) in [
            ("cooldown_ms", self.cooldown_ms),
            ("ignore_streak_extra_pause_ms", self.ignore_streak_extra_pause_ms),
            ("performance_min_pause_ms", self.performance_min_pause_ms),
            ("phrase_debounce_ms", self.phrase_debounce_ms),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(Error::Config(format!("{name} must be finite and >= 0, got {v}")));
            }
        }
        if !(0.0..=1.0).contains(&self.low_mode_confidence) {
            return Err(Error::Config(format!(
                "low_mode_confidence must be in [0, 1], got {}",
                self.low_mode_confidence
            )));
        }
        Ok(())
    }
}

/// The complete guidance configuration: 20 cells plus tuning
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    pub version: u32,
    pub runtime: RuntimeTuning,
    /// Indexed mode.index() * 5 + backoff.index()
    cells: Vec<GuidancePolicy>,
}

/// TOML shape for one overridable cell
#[derive(Debug, Deserialize)]
struct RawCell {
    mode: Mode,
    backoff: BackoffLevel,
    #[serde(flatten)]
    policy: GuidancePolicy,
}

#[derive(Debug, Deserialize)]
struct RawPolicyConfig {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    runtime: RuntimeTuning,
    #[serde(rename = "cell")]
    cells: Vec<RawCell>,
}

fn default_version() -> u32 {
    1
}

impl PolicyConfig {
    /// The shipped default matrix
    pub fn builtin() -> Self {
        let mut cells = Vec::with_capacity(20);
        for mode in Mode::ALL {
            let base = Self::base_cell(mode);
            for backoff in BackoffLevel::ALL {
                cells.push(Self::derive_cell(&base, backoff));
            }
        }
        Self {
            version: 1,
            runtime: RuntimeTuning::default(),
            cells,
        }
    }

    fn base_cell(mode: Mode) -> GuidancePolicy {
        match mode {
            Mode::Neutral => GuidancePolicy {
                interrupt_budget_per_min: 2.0,
                min_pause_ms: 1500.0,
                phrase_boundary_only: false,
                realtime_enabled: true,
                granularity: Granularity::Phrase,
                max_cues: 1,
                modality_weights: ModalityWeights::default(),
                tone: Tone::Neutral,
                assist: AssistFlags::default(),
            },
            Mode::Practice => GuidancePolicy {
                interrupt_budget_per_min: 3.0,
                min_pause_ms: 1000.0,
                phrase_boundary_only: false,
                realtime_enabled: true,
                granularity: Granularity::Micro,
                max_cues: 1,
                modality_weights: ModalityWeights {
                    haptic: 1.0,
                    visual: 1.0,
                    audio: 1.0,
                    text: 0.5,
                },
                tone: Tone::Instructive,
                assist: AssistFlags {
                    offer_demo: true,
                    auto_slowdown: true,
                },
            },
            Mode::Performance => GuidancePolicy {
                interrupt_budget_per_min: 0.2,
                min_pause_ms: 6000.0,
                phrase_boundary_only: true,
                realtime_enabled: true,
                granularity: Granularity::Summary,
                max_cues: 1,
                modality_weights: ModalityWeights {
                    haptic: 1.0,
                    visual: 0.5,
                    audio: 0.0,
                    text: 0.25,
                },
                tone: Tone::Encouraging,
                assist: AssistFlags::default(),
            },
            Mode::Exploration => GuidancePolicy {
                interrupt_budget_per_min: 1.0,
                min_pause_ms: 2000.0,
                phrase_boundary_only: false,
                realtime_enabled: true,
                granularity: Granularity::Summary,
                max_cues: 1,
                modality_weights: ModalityWeights::default(),
                tone: Tone::Encouraging,
                assist: AssistFlags::default(),
            },
        }
    }

    fn derive_cell(base: &GuidancePolicy, backoff: BackoffLevel) -> GuidancePolicy {
        let mut cell = base.clone();
        match backoff {
            BackoffLevel::L0 => {}
            BackoffLevel::L1 => {
                cell.interrupt_budget_per_min *= 0.6;
                cell.min_pause_ms += 1000.0;
            }
            BackoffLevel::L2 => {
                cell.interrupt_budget_per_min *= 0.35;
                cell.min_pause_ms += 2000.0;
                cell.phrase_boundary_only = true;
            }
            BackoffLevel::L3 => {
                cell.interrupt_budget_per_min *= 0.15;
                cell.min_pause_ms += 4000.0;
                cell.phrase_boundary_only = true;
                cell.realtime_enabled = false;
                cell.granularity = cell.granularity.min(Granularity::Summary);
            }
            BackoffLevel::L4 => {
                cell = GuidancePolicy::silent();
            }
        }
        cell
    }

    pub fn cell(&self, mode: Mode, backoff: BackoffLevel) -> &GuidancePolicy {
        &self.cells[mode.index() * 5 + backoff.index()]
    }

    /// Parse a full matrix from TOML; all 20 cells must be present
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let raw: RawPolicyConfig = toml::from_str(s)?;
        let mut cells: Vec<Option<GuidancePolicy>> = vec![None; 20];
        for cell in raw.cells {
            let idx = cell.mode.index() * 5 + cell.backoff.index();
            if cells[idx].is_some() {
                return Err(Error::Config(format!(
                    "duplicate policy cell for {:?}/{:?}",
                    cell.mode, cell.backoff
                )));
            }
            cells[idx] = Some(cell.policy);
        }
        let mut out = Vec::with_capacity(20);
        for mode in Mode::ALL {
            for backoff in BackoffLevel::ALL {
                let idx = mode.index() * 5 + backoff.index();
                match cells[idx].take() {
                    Some(policy) => out.push(policy),
                    None => {
                        return Err(Error::Config(format!(
                            "missing policy cell for {mode:?}/{backoff:?}"
                        )))
                    }
                }
            }
        }
        let config = Self {
            version: raw.version,
            runtime: raw.runtime,
            cells: out,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    pub fn validate(&self) -> Result<()> {
        self.runtime.validate()?;
        for mode in Mode::ALL {
            for backoff in BackoffLevel::ALL {
                self.cell(mode, backoff).validate().map_err(|e| {
                    Error::Config(format!("cell {mode:?}/{backoff:?}: {e}"))
                })?;
            }
        }
        Ok(())
    }
}
