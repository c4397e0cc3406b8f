//! Engine configuration
//!
//! `EngineConfig` is a plain value loaded from TOML. `ConfigStore` keeps its
//! version history; the engine snapshots `current()` at the start of every
//! run, so promotion and rollback only ever swap which version new runs see.

use crate::error::ConfigError;
use crate::impact::ImpactTier;
use crate::types::{ComputeTier, ResourceBudget};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use verimath_expr::Tolerance;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Assigned by `ConfigStore` on promotion
    pub version: u64,
    /// Attempts after the first
    pub max_retries: u32,
    pub budgets: BudgetTable,
    pub thresholds: Thresholds,
    pub tolerance: Tolerance,
    pub policy: Policy,
    pub spot_check: SpotCheck,
    /// Append a `reproduce` subgoal when a build backend is registered
    pub request_reproduction: bool,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// `ConfigError::Toml` on syntax errors, `ConfigError::Invalid` on bad values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` when the file cannot be read, otherwise as `from_toml_str`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// With retry limit
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// With one tier's budget replaced
    #[inline]
    #[must_use]
    pub fn with_budget(mut self, tier: ComputeTier, budget: ResourceBudget) -> Self {
        match tier {
            ComputeTier::Light => self.budgets.light = budget,
            ComputeTier::Standard => self.budgets.standard = budget,
            ComputeTier::DeepSearch => self.budgets.deep_search = budget,
        }
        self
    }

    /// Replace the confidence thresholds
    #[inline]
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Replace the run policy
    #[inline]
    #[must_use]
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the spot-check settings
    #[inline]
    #[must_use]
    pub fn with_spot_check(mut self, spot_check: SpotCheck) -> Self {
        self.spot_check = spot_check;
        self
    }

    /// Toggle reproduction builds
    #[inline]
    #[must_use]
    pub fn with_reproduction(mut self, enabled: bool) -> Self {
        self.request_reproduction = enabled;
        self
    }

    /// Check value ranges and orderings
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        for (name, value) in [
            ("thresholds.standard", t.standard),
            ("thresholds.elevated", t.elevated),
            ("thresholds.critical", t.critical),
            ("thresholds.review", t.review),
            ("policy.reaudit_sample_rate", self.policy.reaudit_sample_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{name} must be in [0, 1], got {value}")));
            }
        }
        if !(t.standard <= t.elevated && t.elevated <= t.critical) {
            return Err(ConfigError::Invalid(
                "thresholds must not decrease with impact tier".into(),
            ));
        }
        for (tier, budget) in [
            (ComputeTier::Light, &self.budgets.light),
            (ComputeTier::Standard, &self.budgets.standard),
            (ComputeTier::DeepSearch, &self.budgets.deep_search),
        ] {
            if budget.max_workers == 0 || budget.max_plan_alternatives == 0 || budget.max_verification_paths == 0 {
                return Err(ConfigError::Invalid(format!(
                    "budget for {tier} needs at least one worker, plan alternative and verification path"
                )));
            }
        }
        if self.spot_check.samples_per_path == 0 {
            return Err(ConfigError::Invalid("spot_check.samples_per_path must be positive".into()));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: 1,
            max_retries: 2,
            budgets: BudgetTable::default(),
            thresholds: Thresholds::default(),
            tolerance: Tolerance::default(),
            policy: Policy::default(),
            spot_check: SpotCheck::default(),
            request_reproduction: false,
        }
    }
}

/// Budget per compute tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetTable {
    pub light: ResourceBudget,
    pub standard: ResourceBudget,
    pub deep_search: ResourceBudget,
}

impl BudgetTable {
    /// Budget for `tier`
    #[inline]
    #[must_use]
    pub fn for_tier(&self, tier: ComputeTier) -> ResourceBudget {
        match tier {
            ComputeTier::Light => self.light,
            ComputeTier::Standard => self.standard,
            ComputeTier::DeepSearch => self.deep_search,
        }
    }

    /// Same budget for every tier
    #[must_use]
    pub fn uniform(budget: ResourceBudget) -> Self {
        Self {
            light: budget,
            standard: budget,
            deep_search: budget,
        }
    }
}

impl Default for BudgetTable {
    fn default() -> Self {
        Self {
            light: ResourceBudget::light(),
            standard: ResourceBudget::standard(),
            deep_search: ResourceBudget::deep_search(),
        }
    }
}

/// Validator acceptance thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub standard: f64,
    pub elevated: f64,
    pub critical: f64,
    /// Below this a result is flagged for review even when valid
    pub review: f64,
}

impl Thresholds {
    /// Minimum confidence for `tier`
    #[inline]
    #[must_use]
    pub fn for_tier(&self, tier: ImpactTier) -> f64 {
        match tier {
            ImpactTier::Standard => self.standard,
            ImpactTier::Elevated => self.elevated,
            ImpactTier::Critical => self.critical,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            standard: 0.7,
            elevated: 0.8,
            critical: 0.9,
            review: 0.7,
        }
    }
}

/// Governance and promotion knobs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Fraction of valid results flagged for re-audit
    pub reaudit_sample_rate: f64,
    /// Minimum observed improvement for promoting a configuration
    pub observable_effect_threshold: f64,
    /// Minimum causally attributed improvement for promoting a configuration
    pub causal_effect_threshold: f64,
    pub require_treaty_for_critical: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            reaudit_sample_rate: 0.0,
            observable_effect_threshold: 0.05,
            causal_effect_threshold: 0.10,
            require_treaty_for_critical: true,
        }
    }
}

/// Seeded numeric spot checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotCheck {
    pub seed: u64,
    /// Sample points per verification path
    pub samples_per_path: usize,
}

impl Default for SpotCheck {
    fn default() -> Self {
        Self {
            seed: 0x5eed,
            samples_per_path: 16,
        }
    }
}

/// Measured effect of a candidate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionEvidence {
    pub observable_effect: f64,
    pub causal_effect: f64,
    pub note: String,
}

/// Versioned configuration history
#[derive(Debug)]
pub struct ConfigStore {
    history: RwLock<Vec<Arc<EngineConfig>>>,
}

impl ConfigStore {
    /// Store whose first version is `initial`
    #[must_use]
    pub fn new(initial: EngineConfig) -> Self {
        Self {
            history: RwLock::new(vec![Arc::new(initial)]),
        }
    }

    /// Configuration new runs will use
    #[must_use]
    pub fn current(&self) -> Arc<EngineConfig> {
        let history = self.history.read();
        // history is never empty: rollback keeps the first version
        Arc::clone(&history[history.len() - 1])
    }

    /// Current version
    #[must_use]
    pub fn version(&self) -> u64 {
        self.current().version
    }

    /// Number of stored versions
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }

    /// Promote `candidate` when the evidence clears both effect thresholds
    /// of the current policy. Returns the new version number.
    ///
    /// # Errors
    /// `ConfigError::Invalid` for a bad candidate, `ConfigError::Rejected`
    /// when either effect is below its threshold.
    pub fn propose(&self, mut candidate: EngineConfig, evidence: &PromotionEvidence) -> Result<u64, ConfigError> {
        candidate.validate()?;
        let mut history = self.history.write();
        let current = Arc::clone(&history[history.len() - 1]);
        let policy = current.policy;
        if evidence.observable_effect < policy.observable_effect_threshold {
            tracing::warn!(
                effect = evidence.observable_effect,
                threshold = policy.observable_effect_threshold,
                "configuration promotion rejected"
            );
            return Err(ConfigError::Rejected(format!(
                "observable effect {:.3} below {:.3}",
                evidence.observable_effect, policy.observable_effect_threshold
            )));
        }
        if evidence.causal_effect < policy.causal_effect_threshold {
            tracing::warn!(
                effect = evidence.causal_effect,
                threshold = policy.causal_effect_threshold,
                "configuration promotion rejected"
            );
            return Err(ConfigError::Rejected(format!(
                "causal effect {:.3} below {:.3}",
                evidence.causal_effect, policy.causal_effect_threshold
            )));
        }
        candidate.version = current.version + 1;
        let version = candidate.version;
        history.push(Arc::new(candidate));
        tracing::info!(version, note = %evidence.note, "configuration promoted");
        Ok(version)
    }

    /// Return to the previous version
    ///
    /// # Errors
    /// `ConfigError::NoHistory` when only the initial version exists.
    pub fn rollback(&self) -> Result<Arc<EngineConfig>, ConfigError> {
        let mut history = self.history.write();
        if history.len() < 2 {
            return Err(ConfigError::NoHistory);
        }
        history.pop();
        let restored = Arc::clone(&history[history.len() - 1]);
        tracing::info!(version = restored.version, "configuration rolled back");
        Ok(restored)
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
