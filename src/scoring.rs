// =============================================================================
// Risk Scoring — weighted ensemble of triggered rule results
// =============================================================================
//
// Generalizes the weighted ensemble scorer's shape: instead of regime-keyed
// weight maps blending signed signal directions into BUY/SELL/HOLD, this
// scorer averages triggered rules' partial scores by their risk weight and
// maps the composite onto PASS/ALERT/BLOCK via fixed thresholds.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::rules::RuleResult;
use crate::types::{Action, RiskLevel};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub txn_id: String,
    pub client_id: String,
    pub composite_score: f64,
    pub risk_level: RiskLevel,
    pub action: Action,
    pub rule_results: Vec<RuleResult>,
    pub evaluated_at: chrono::DateTime<Utc>,
}

/// `triggeredWeight = Σ riskWeight for triggered rules`. When zero, the
/// composite is zero and the action is PASS regardless of how many
/// non-triggered rules were evaluated — they're retained in the result for
/// transparency but never dilute the score.
pub fn score(
    txn_id: &str,
    client_id: &str,
    rule_results: Vec<RuleResult>,
    alert_threshold: f64,
    block_threshold: f64,
) -> EvaluationResult {
    let triggered_weight: f64 = rule_results
        .iter()
        .filter(|r| r.triggered)
        .map(|r| r.risk_weight)
        .sum();

    let composite_score = if triggered_weight <= 0.0 {
        0.0
    } else {
        let weighted_sum: f64 = rule_results
            .iter()
            .filter(|r| r.triggered)
            .map(|r| r.partial_score * r.risk_weight)
            .sum();
        (weighted_sum / triggered_weight).min(100.0)
    };
    let composite_score = (composite_score * 100.0).round() / 100.0;

    let action = if composite_score >= block_threshold {
        Action::Block
    } else if composite_score >= alert_threshold {
        Action::Alert
    } else {
        Action::Pass
    };

    EvaluationResult {
        txn_id: txn_id.to_string(),
        client_id: client_id.to_string(),
        composite_score,
        risk_level: RiskLevel::from_score(composite_score),
        action,
        rule_results,
        evaluated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleType;

    fn result(rule_id: &str, triggered: bool, partial: f64, weight: f64) -> RuleResult {
        RuleResult {
            rule_id: rule_id.to_string(),
            rule_name: rule_id.to_string(),
            rule_type: RuleType::AmountAnomaly,
            triggered,
            deviation_pct: partial,
            partial_score: partial,
            risk_weight: weight,
            reason: "test".into(),
        }
    }

    #[test]
    fn no_triggered_rules_yields_pass_and_zero() {
        let results = vec![result("R1", false, 0.0, 1.0), result("R2", false, 0.0, 2.0)];
        let eval = score("T1", "C1", results, 30.0, 70.0);
        assert_eq!(eval.composite_score, 0.0);
        assert_eq!(eval.action, Action::Pass);
    }

    #[test]
    fn weighted_average_matches_scenario_3() {
        // R1 triggered 60 weight 2; R2 triggered 40 weight 1; R3 not triggered.
        let results = vec![
            result("R1", true, 60.0, 2.0),
            result("R2", true, 40.0, 1.0),
            result("R3", false, 0.0, 5.0),
        ];
        let eval = score("T1", "C1", results, 30.0, 70.0);
        assert_eq!(eval.composite_score, 53.33);
        assert_eq!(eval.action, Action::Alert);
    }

    #[test]
    fn amount_anomaly_scenario_triggers_block() {
        let results = vec![result("R1", true, 100.0, 1.0)];
        let eval = score("T1", "C1", results, 30.0, 70.0);
        assert_eq!(eval.composite_score, 100.0);
        assert_eq!(eval.action, Action::Block);
    }

    #[test]
    fn composite_score_never_exceeds_100() {
        let results = vec![result("R1", true, 100.0, 1.0), result("R2", true, 100.0, 1.0)];
        let eval = score("T1", "C1", results, 30.0, 70.0);
        assert!(eval.composite_score <= 100.0);
    }

    #[test]
    fn non_triggered_rules_do_not_change_score() {
        let with_extra = vec![
            result("R1", true, 50.0, 1.0),
            result("R2", false, 999.0, 999.0),
        ];
        let without_extra = vec![result("R1", true, 50.0, 1.0)];
        let a = score("T1", "C1", with_extra, 30.0, 70.0);
        let b = score("T1", "C1", without_extra, 30.0, 70.0);
        assert_eq!(a.composite_score, b.composite_score);
    }
}
