//! Engine configuration
//!
//! Every tunable of the resolution pipeline lives here: match thresholds,
//! the ambiguity band, completeness weights, the confidence decay curve
//! parameters, and lock/backoff settings. All sections have sensible
//! defaults; a YAML file may override any subset.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Matcher decision thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Composite confidence required for an automatic `matched` decision
    pub match_threshold: f64,

    /// Two candidates within this margin of each other (both above
    /// threshold) are ambiguous and flagged for review
    pub ambiguity_margin: f64,

    /// Bonus added when more than one independent identifier type agrees
    /// on the same actor (capped at 1.0)
    pub corroboration_bonus: f64,

    /// Minimum Jaro-Winkler similarity for a fuzzy name hit
    pub fuzzy_name_threshold: f64,

    /// Maximum candidate actors retained after ranking
    pub max_candidates: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.8,
            ambiguity_margin: 0.05,
            corroboration_bonus: 0.1,
            fuzzy_name_threshold: 0.88,
            max_candidates: 8,
        }
    }
}

/// Profile completeness weights.
///
/// Chosen so that no single identifier alone yields a "complete" profile:
/// phone + email + name + signal depth sum to exactly 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletenessWeights {
    pub phone: f64,
    pub email: f64,
    pub name: f64,
    /// Weight granted once `signal_count` reaches `signal_depth_at`
    pub signal_depth: f64,
    pub signal_depth_at: u64,
}

impl Default for CompletenessWeights {
    fn default() -> Self {
        Self {
            phone: 0.3,
            email: 0.2,
            name: 0.2,
            signal_depth: 0.3,
            signal_depth_at: 5,
        }
    }
}

/// Parameters of the identity-confidence model.
///
/// The exact decay curve is a tunable, not a fixed design constant: the
/// default model applies exponential staleness decay only to actors whose
/// identity rests on fewer than `corroboration_floor` independent
/// identifier types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Half-life, in days, of an uncorroborated identity's confidence
    pub decay_half_life_days: f64,

    /// Number of independent identifier types at which staleness decay
    /// stops applying
    pub corroboration_floor: usize,

    /// Minimum identifier confidence for a type to count as corroborating
    pub corroboration_min_confidence: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            decay_half_life_days: 180.0,
            corroboration_floor: 2,
            corroboration_min_confidence: 0.5,
        }
    }
}

/// Keyed-lock acquisition settings (bounded wait, capped backoff)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Attempts before giving up on a contended key
    pub max_attempts: u32,

    /// First backoff step in milliseconds; doubles per attempt
    pub base_backoff_ms: u64,

    /// Backoff ceiling in milliseconds (jitter is added below this)
    pub max_backoff_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            base_backoff_ms: 2,
            max_backoff_ms: 100,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub matching: MatchConfig,
    pub completeness: CompletenessWeights,
    pub confidence: ConfidenceConfig,
    pub locks: LockConfig,

    /// Bounded retries when a commit target turns out to be tombstoned
    pub redirect_retries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            matching: MatchConfig::default(),
            completeness: CompletenessWeights::default(),
            confidence: ConfidenceConfig::default(),
            locks: LockConfig::default(),
            redirect_retries: 3,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file, falling back to defaults for
    /// any omitted section.
    pub fn from_yaml_path(path: &Path) -> anyhow::Result<Self> {
        info!("Loading engine configuration from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&raw)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let config = EngineConfig::default();
        assert_eq!(config.matching.match_threshold, 0.8);
        assert_eq!(config.matching.ambiguity_margin, 0.05);
        assert_eq!(config.completeness.phone, 0.3);
        assert_eq!(config.completeness.signal_depth_at, 5);
    }

    #[test]
    fn test_completeness_weights_sum_to_one() {
        let w = CompletenessWeights::default();
        let total = w.phone + w.email + w.name + w.signal_depth;
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let yaml = "matching:\n  match_threshold: 0.9\n";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.matching.match_threshold, 0.9);
        // Untouched sections keep their defaults
        assert_eq!(config.matching.ambiguity_margin, 0.05);
        assert_eq!(config.locks.max_attempts, 20);
    }

    #[test]
    fn test_from_yaml_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "redirect_retries: 5\n").unwrap();

        let config = EngineConfig::from_yaml_path(&path).unwrap();
        assert_eq!(config.redirect_retries, 5);
    }
}
