// =============================================================================
// Rule Engine — dispatch layer over statistical + ML anomaly detectors
// =============================================================================

pub mod evaluators;
pub mod isolation_forest;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::RuleDefaults;
use crate::live_counters::CounterSnapshot;
use crate::profile::ClientProfile;
use crate::types::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleType {
    AmountAnomaly,
    AmountPerType,
    HourlyAmount,
    TpsSpike,
    TransactionType,
    BeneficiaryConcentration,
    DailyCumulative,
    NewBeneVelocity,
    DormancyBreak,
    CrossChannelBene,
    SeasonalDeviation,
    CvStability,
    IsolationForest,
}

impl RuleType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AmountAnomaly => "AMOUNT_ANOMALY",
            Self::AmountPerType => "AMOUNT_PER_TYPE",
            Self::HourlyAmount => "HOURLY_AMOUNT",
            Self::TpsSpike => "TPS_SPIKE",
            Self::TransactionType => "TRANSACTION_TYPE",
            Self::BeneficiaryConcentration => "BENEFICIARY_CONCENTRATION",
            Self::DailyCumulative => "DAILY_CUMULATIVE",
            Self::NewBeneVelocity => "NEW_BENE_VELOCITY",
            Self::DormancyBreak => "DORMANCY_BREAK",
            Self::CrossChannelBene => "CROSS_CHANNEL_BENE",
            Self::SeasonalDeviation => "SEASONAL_DEVIATION",
            Self::CvStability => "CV_STABILITY",
            Self::IsolationForest => "ISOLATION_FOREST",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AMOUNT_ANOMALY" => Some(Self::AmountAnomaly),
            "AMOUNT_PER_TYPE" => Some(Self::AmountPerType),
            "HOURLY_AMOUNT" => Some(Self::HourlyAmount),
            "TPS_SPIKE" => Some(Self::TpsSpike),
            "TRANSACTION_TYPE" => Some(Self::TransactionType),
            "BENEFICIARY_CONCENTRATION" => Some(Self::BeneficiaryConcentration),
            "DAILY_CUMULATIVE" => Some(Self::DailyCumulative),
            "NEW_BENE_VELOCITY" => Some(Self::NewBeneVelocity),
            "DORMANCY_BREAK" => Some(Self::DormancyBreak),
            "CROSS_CHANNEL_BENE" => Some(Self::CrossChannelBene),
            "SEASONAL_DEVIATION" => Some(Self::SeasonalDeviation),
            "CV_STABILITY" => Some(Self::CvStability),
            "ISOLATION_FOREST" => Some(Self::IsolationForest),
            _ => None,
        }
    }
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyRule {
    pub rule_id: String,
    pub name: String,
    pub rule_type: RuleType,
    #[serde(default = "default_risk_weight")]
    pub risk_weight: f64,
    #[serde(default)]
    pub variance_pct: f64,
    #[serde(default)]
    pub params: HashMap<String, f64>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_risk_weight() -> f64 {
    1.0
}

fn default_active() -> bool {
    true
}

impl AnomalyRule {
    pub fn param(&self, key: &str, default: f64) -> f64 {
        self.params.get(key).copied().unwrap_or(default)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule_id: String,
    pub rule_name: String,
    pub rule_type: RuleType,
    pub triggered: bool,
    pub deviation_pct: f64,
    pub partial_score: f64,
    pub risk_weight: f64,
    pub reason: String,
}

impl RuleResult {
    pub fn not_triggered(rule: &AnomalyRule, reason: impl Into<String>) -> Self {
        Self {
            rule_id: rule.rule_id.clone(),
            rule_name: rule.name.clone(),
            rule_type: rule.rule_type,
            triggered: false,
            deviation_pct: 0.0,
            partial_score: 0.0,
            risk_weight: rule.risk_weight,
            reason: reason.into(),
        }
    }

    pub fn triggered(rule: &AnomalyRule, deviation_pct: f64, reason: impl Into<String>) -> Self {
        Self {
            rule_id: rule.rule_id.clone(),
            rule_name: rule.name.clone(),
            rule_type: rule.rule_type,
            triggered: true,
            deviation_pct,
            partial_score: deviation_pct.min(100.0).max(0.0),
            risk_weight: rule.risk_weight,
            reason: reason.into(),
        }
    }
}

/// Everything an evaluator needs beyond the transaction and profile: the
/// live-counter snapshot taken before this transaction was folded in.
pub struct RuleContext<'a> {
    pub counters: &'a CounterSnapshot,
    pub current_beneficiary_key: Option<&'a str>,
    pub now_ms: i64,
}

/// `evaluateAll` — dispatch `txn` to every active rule's evaluator. A failing
/// evaluator is logged and its rule omitted from the result list; it never
/// prevents the remaining rules from running.
pub fn evaluate_all(
    txn: &Transaction,
    profile: &ClientProfile,
    ctx: &RuleContext,
    defaults: &RuleDefaults,
    active_rules: &[AnomalyRule],
    isolation_forest: Option<&isolation_forest::IsolationForest>,
) -> Vec<RuleResult> {
    let mut results = Vec::with_capacity(active_rules.len());

    for rule in active_rules {
        if !rule.active {
            continue;
        }
        let outcome = match rule.rule_type {
            RuleType::AmountAnomaly => evaluators::amount_anomaly(txn, profile, rule, defaults),
            RuleType::AmountPerType => evaluators::amount_per_type(txn, profile, rule, defaults),
            RuleType::HourlyAmount => evaluators::hourly_amount(txn, profile, ctx, rule, defaults),
            RuleType::TpsSpike => evaluators::tps_spike(txn, profile, ctx, rule, defaults),
            RuleType::TransactionType => evaluators::transaction_type(txn, profile, rule, defaults),
            RuleType::BeneficiaryConcentration => {
                evaluators::beneficiary_concentration(txn, profile, ctx, rule, defaults)
            }
            RuleType::DailyCumulative => evaluators::daily_cumulative(txn, profile, ctx, rule, defaults),
            RuleType::NewBeneVelocity => evaluators::new_bene_velocity(txn, profile, ctx, rule, defaults),
            RuleType::DormancyBreak => evaluators::dormancy_break(txn, profile, rule, defaults),
            RuleType::CrossChannelBene => {
                evaluators::cross_channel_bene(txn, profile, ctx, rule, defaults)
            }
            RuleType::SeasonalDeviation => evaluators::seasonal_deviation(txn, profile, rule, defaults),
            RuleType::CvStability => evaluators::cv_stability(txn, profile, rule, defaults),
            RuleType::IsolationForest => match isolation_forest {
                Some(forest) => {
                    isolation_forest::evaluate(txn, profile, ctx, rule, defaults, forest)
                }
                None => Ok(RuleResult::not_triggered(rule, "no model loaded for client")),
            },
        };

        match outcome {
            Ok(result) => results.push(result),
            Err(err) => {
                warn!(rule_id = %rule.rule_id, rule_type = %rule.rule_type, error = %err, "rule evaluator failed; treating as not-triggered");
            }
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_type_roundtrips() {
        for rt in [
            RuleType::AmountAnomaly,
            RuleType::AmountPerType,
            RuleType::HourlyAmount,
            RuleType::TpsSpike,
            RuleType::TransactionType,
            RuleType::BeneficiaryConcentration,
            RuleType::DailyCumulative,
            RuleType::NewBeneVelocity,
            RuleType::DormancyBreak,
            RuleType::CrossChannelBene,
            RuleType::SeasonalDeviation,
            RuleType::CvStability,
            RuleType::IsolationForest,
        ] {
            assert_eq!(RuleType::parse(rt.as_str()), Some(rt));
        }
    }

    #[test]
    fn unknown_rule_type_parses_to_none() {
        assert_eq!(RuleType::parse("NOT_A_RULE"), None);
    }
}
