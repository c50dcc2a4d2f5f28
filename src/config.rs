// =============================================================================
// Risk Engine Configuration — Hot-reloadable engine settings with atomic save
// =============================================================================
//
// Central configuration hub for the risk engine. Every tunable parameter
// lives here so that thresholds and rule defaults can be reconfigured at
// runtime without a restart.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_alert_threshold() -> f64 {
    30.0
}

fn default_block_threshold() -> f64 {
    70.0
}

fn default_ewma_alpha() -> f64 {
    0.01
}

fn default_min_profile_txns() -> u64 {
    20
}

fn default_rule_cache_refresh_secs() -> u64 {
    60
}

fn default_transaction_types() -> Vec<String> {
    vec![
        "NEFT".to_string(),
        "RTGS".to_string(),
        "IMPS".to_string(),
        "UPI".to_string(),
        "IFT".to_string(),
    ]
}

fn default_min_type_samples() -> u64 {
    10
}

fn default_min_type_frequency_pct() -> f64 {
    1.0
}

fn default_min_repeat_count() -> u64 {
    20
}

fn default_abs_min_concentration_pct() -> f64 {
    40.0
}

fn default_min_distinct_beneficiaries() -> u64 {
    2
}

fn default_daily_cumulative_min_days() -> u64 {
    3
}

fn default_new_bene_max_per_day() -> u64 {
    5
}

fn default_new_bene_min_profile_days() -> u64 {
    3
}

fn default_dormancy_days() -> f64 {
    30.0
}

fn default_seasonal_min_samples() -> u64 {
    4
}

fn default_max_cv_pct() -> f64 {
    150.0
}

fn default_min_beneficiary_txns() -> u64 {
    5
}

fn default_variance_pct() -> f64 {
    50.0
}

fn default_stddev_floor() -> f64 {
    1.0
}

fn default_auto_accept_timeout_secs() -> i64 {
    3600
}

fn default_auto_accept_sweep_interval_secs() -> u64 {
    60
}

fn default_weight_adjust_interval_secs() -> u64 {
    300
}

fn default_weight_min_samples() -> u64 {
    5
}

fn default_high_precision() -> f64 {
    0.8
}

fn default_low_precision() -> f64 {
    0.3
}

fn default_weight_up_factor() -> f64 {
    1.2
}

fn default_weight_down_factor() -> f64 {
    0.8
}

fn default_weight_min() -> f64 {
    0.1
}

fn default_weight_max() -> f64 {
    5.0
}

fn default_weight_epsilon() -> f64 {
    0.01
}

fn default_graph_refresh_secs() -> u64 {
    120
}

fn default_silence_enabled() -> bool {
    true
}

fn default_silence_check_interval_minutes() -> u64 {
    5
}

fn default_silence_multiplier() -> f64 {
    3.0
}

fn default_min_expected_tps() -> f64 {
    0.01
}

fn default_min_completed_hours() -> u64 {
    48
}

fn default_num_trees() -> usize {
    100
}

fn default_sample_size() -> usize {
    256
}

fn default_if_variance_pct() -> f64 {
    60.0
}

// =============================================================================
// RuleDefaults
// =============================================================================

/// Fallback values consulted by evaluators whenever a per-rule `params` entry
/// or `variancePct` override is absent or non-positive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefaults {
    #[serde(default = "default_variance_pct")]
    pub variance_pct: f64,
    #[serde(default = "default_stddev_floor")]
    pub stddev_floor: f64,
    #[serde(default = "default_min_type_samples")]
    pub min_type_samples: u64,
    #[serde(default = "default_min_type_frequency_pct")]
    pub min_type_frequency_pct: f64,
    #[serde(default = "default_min_repeat_count")]
    pub min_repeat_count: u64,
    #[serde(default = "default_abs_min_concentration_pct")]
    pub abs_min_concentration_pct: f64,
    #[serde(default = "default_min_distinct_beneficiaries")]
    pub min_distinct_beneficiaries: u64,
    #[serde(default = "default_daily_cumulative_min_days")]
    pub daily_cumulative_min_days: u64,
    #[serde(default = "default_new_bene_max_per_day")]
    pub new_bene_max_per_day: u64,
    #[serde(default = "default_new_bene_min_profile_days")]
    pub new_bene_min_profile_days: u64,
    #[serde(default = "default_dormancy_days")]
    pub dormancy_days: f64,
    #[serde(default = "default_seasonal_min_samples")]
    pub seasonal_min_samples: u64,
    #[serde(default = "default_max_cv_pct")]
    pub max_cv_pct: f64,
    #[serde(default = "default_min_beneficiary_txns")]
    pub min_beneficiary_txns: u64,
    #[serde(default = "default_num_trees")]
    pub if_num_trees: usize,
    #[serde(default = "default_sample_size")]
    pub if_sample_size: usize,
    #[serde(default = "default_if_variance_pct")]
    pub if_variance_pct: f64,
}

impl Default for RuleDefaults {
    fn default() -> Self {
        Self {
            variance_pct: default_variance_pct(),
            stddev_floor: default_stddev_floor(),
            min_type_samples: default_min_type_samples(),
            min_type_frequency_pct: default_min_type_frequency_pct(),
            min_repeat_count: default_min_repeat_count(),
            abs_min_concentration_pct: default_abs_min_concentration_pct(),
            min_distinct_beneficiaries: default_min_distinct_beneficiaries(),
            daily_cumulative_min_days: default_daily_cumulative_min_days(),
            new_bene_max_per_day: default_new_bene_max_per_day(),
            new_bene_min_profile_days: default_new_bene_min_profile_days(),
            dormancy_days: default_dormancy_days(),
            seasonal_min_samples: default_seasonal_min_samples(),
            max_cv_pct: default_max_cv_pct(),
            min_beneficiary_txns: default_min_beneficiary_txns(),
            if_num_trees: default_num_trees(),
            if_sample_size: default_sample_size(),
            if_variance_pct: default_if_variance_pct(),
        }
    }
}

/// `variancePct ≤ 0 ⇒ use config default`. Every evaluator funnels its
/// effective variance through this helper rather than reading the rule field
/// directly, so the fallback contract lives in exactly one place.
pub fn resolve_variance_pct(rule_variance_pct: f64, config_default: f64) -> f64 {
    if rule_variance_pct > 0.0 {
        rule_variance_pct
    } else {
        config_default
    }
}

// =============================================================================
// SilenceConfig / FeedbackConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilenceConfig {
    #[serde(default = "default_silence_enabled")]
    pub enabled: bool,
    #[serde(default = "default_silence_check_interval_minutes")]
    pub check_interval_minutes: u64,
    #[serde(default = "default_silence_multiplier")]
    pub silence_multiplier: f64,
    #[serde(default = "default_min_expected_tps")]
    pub min_expected_tps: f64,
    #[serde(default = "default_min_completed_hours")]
    pub min_completed_hours: u64,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_silence_enabled(),
            check_interval_minutes: default_silence_check_interval_minutes(),
            silence_multiplier: default_silence_multiplier(),
            min_expected_tps: default_min_expected_tps(),
            min_completed_hours: default_min_completed_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    #[serde(default = "default_auto_accept_timeout_secs")]
    pub auto_accept_timeout_secs: i64,
    #[serde(default = "default_auto_accept_sweep_interval_secs")]
    pub auto_accept_sweep_interval_secs: u64,
    #[serde(default = "default_weight_adjust_interval_secs")]
    pub weight_adjust_interval_secs: u64,
    #[serde(default = "default_weight_min_samples")]
    pub weight_min_samples: u64,
    #[serde(default = "default_high_precision")]
    pub high_precision: f64,
    #[serde(default = "default_low_precision")]
    pub low_precision: f64,
    #[serde(default = "default_weight_up_factor")]
    pub weight_up_factor: f64,
    #[serde(default = "default_weight_down_factor")]
    pub weight_down_factor: f64,
    #[serde(default = "default_weight_min")]
    pub weight_min: f64,
    #[serde(default = "default_weight_max")]
    pub weight_max: f64,
    #[serde(default = "default_weight_epsilon")]
    pub weight_epsilon: f64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            auto_accept_timeout_secs: default_auto_accept_timeout_secs(),
            auto_accept_sweep_interval_secs: default_auto_accept_sweep_interval_secs(),
            weight_adjust_interval_secs: default_weight_adjust_interval_secs(),
            weight_min_samples: default_weight_min_samples(),
            high_precision: default_high_precision(),
            low_precision: default_low_precision(),
            weight_up_factor: default_weight_up_factor(),
            weight_down_factor: default_weight_down_factor(),
            weight_min: default_weight_min(),
            weight_max: default_weight_max(),
            weight_epsilon: default_weight_epsilon(),
        }
    }
}

/// Default path the engine loads its config from at startup and persists it
/// to on shutdown or a config update via the API.
pub const CONFIG_PATH: &str = "risk_engine_config.json";

// =============================================================================
// RiskEngineConfig
// =============================================================================

/// Top-level runtime configuration for the risk engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEngineConfig {
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,
    #[serde(default = "default_block_threshold")]
    pub block_threshold: f64,
    #[serde(default = "default_ewma_alpha")]
    pub ewma_alpha: f64,
    #[serde(default = "default_min_profile_txns")]
    pub min_profile_txns: u64,
    #[serde(default = "default_rule_cache_refresh_secs")]
    pub rule_cache_refresh_secs: u64,
    #[serde(default = "default_transaction_types")]
    pub transaction_types: Vec<String>,

    #[serde(default = "default_graph_refresh_secs")]
    pub graph_refresh_secs: u64,

    #[serde(default)]
    pub rule_defaults: RuleDefaults,
    #[serde(default)]
    pub silence_detection: SilenceConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
}

impl Default for RiskEngineConfig {
    fn default() -> Self {
        Self {
            alert_threshold: default_alert_threshold(),
            block_threshold: default_block_threshold(),
            ewma_alpha: default_ewma_alpha(),
            min_profile_txns: default_min_profile_txns(),
            rule_cache_refresh_secs: default_rule_cache_refresh_secs(),
            transaction_types: default_transaction_types(),
            graph_refresh_secs: default_graph_refresh_secs(),
            rule_defaults: RuleDefaults::default(),
            silence_detection: SilenceConfig::default(),
            feedback: FeedbackConfig::default(),
        }
    }
}

impl RiskEngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read risk engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse risk engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            alert_threshold = config.alert_threshold,
            block_threshold = config.block_threshold,
            "risk engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise risk engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "risk engine config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RiskEngineConfig::default();
        assert_eq!(cfg.alert_threshold, 30.0);
        assert_eq!(cfg.block_threshold, 70.0);
        assert_eq!(cfg.ewma_alpha, 0.01);
        assert_eq!(cfg.min_profile_txns, 20);
        assert_eq!(cfg.transaction_types.len(), 5);
        assert!(cfg.silence_detection.enabled);
        assert_eq!(cfg.feedback.auto_accept_timeout_secs, 3600);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RiskEngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.alert_threshold, 30.0);
        assert_eq!(cfg.rule_defaults.variance_pct, 50.0);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "alert_threshold": 25.0, "rule_defaults": { "variance_pct": 80.0 } }"#;
        let cfg: RiskEngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.alert_threshold, 25.0);
        assert_eq!(cfg.rule_defaults.variance_pct, 80.0);
        assert_eq!(cfg.rule_defaults.stddev_floor, 1.0);
        assert_eq!(cfg.block_threshold, 70.0);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RiskEngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RiskEngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.alert_threshold, cfg2.alert_threshold);
        assert_eq!(cfg.transaction_types, cfg2.transaction_types);
    }

    #[test]
    fn resolve_variance_pct_falls_back_on_non_positive() {
        assert_eq!(resolve_variance_pct(0.0, 50.0), 50.0);
        assert_eq!(resolve_variance_pct(-10.0, 50.0), 50.0);
        assert_eq!(resolve_variance_pct(75.0, 50.0), 75.0);
    }
}
