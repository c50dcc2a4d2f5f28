// =============================================================================
// Weight-Adjustment Loop — rule weights driven by review feedback precision
// =============================================================================
//
// A periodic worker, not a synchronous callback from `submit_feedback` — the
// feedback -> weight change -> next evaluation path is a control dependency,
// never a call back into the evaluation pipeline (per design note in §9).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::review::queue::{FeedbackStatus, ReviewQueue};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleWeightChange {
    pub rule_id: String,
    pub old_weight: f64,
    pub new_weight: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only audit log of every weight change the loop has made.
#[derive(Default)]
pub struct WeightChangeLog {
    entries: RwLock<Vec<RuleWeightChange>>,
}

impl WeightChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&self, change: RuleWeightChange) {
        info!(rule_id = %change.rule_id, old = change.old_weight, new = change.new_weight, reason = %change.reason, "rule weight changed");
        self.entries.write().push(change);
    }

    pub fn history(&self, rule_id: Option<&str>) -> Vec<RuleWeightChange> {
        self.entries
            .read()
            .iter()
            .filter(|c| rule_id.map(|r| c.rule_id == r).unwrap_or(true))
            .cloned()
            .collect()
    }
}

/// `precision = TP / (TP + FP)` per rule, computed over every terminal
/// review item whose triggered-rule list includes that rule.
pub fn compute_precision_by_rule(
    queue: &ReviewQueue,
    since: DateTime<Utc>,
) -> HashMap<String, (u64, u64)> {
    let mut counts: HashMap<String, (u64, u64)> = HashMap::new();
    for item in queue.terminal_items_since(since) {
        let (tp, fp) = match item.feedback_status {
            FeedbackStatus::TruePositive => (1, 0),
            FeedbackStatus::FalsePositive => (0, 1),
            _ => continue, // AUTO_ACCEPTED is excluded from precision per glossary
        };
        for rule_id in &item.triggered_rule_ids {
            let entry = counts.entry(rule_id.clone()).or_insert((0, 0));
            entry.0 += tp;
            entry.1 += fp;
        }
    }
    counts
}

/// Apply one adjustment pass. Returns the rule ids whose weight changed, so
/// the caller can invalidate the rule cache for exactly those rules (or, in
/// this implementation, invalidate the whole cache — see `rule_cache`).
pub fn adjust_weights(
    weights: &mut HashMap<String, f64>,
    precision_by_rule: &HashMap<String, (u64, u64)>,
    log: &WeightChangeLog,
    min_samples: u64,
    high_precision: f64,
    low_precision: f64,
    up_factor: f64,
    down_factor: f64,
    weight_min: f64,
    weight_max: f64,
    epsilon: f64,
) -> Vec<String> {
    let mut changed = Vec::new();

    for (rule_id, &(tp, fp)) in precision_by_rule {
        let total = tp + fp;
        if total < min_samples {
            continue;
        }
        let precision = tp as f64 / total as f64;
        let Some(&old_weight) = weights.get(rule_id) else {
            continue;
        };

        let new_weight = if precision >= high_precision {
            (old_weight * up_factor).min(weight_max)
        } else if precision <= low_precision {
            (old_weight * down_factor).max(weight_min)
        } else {
            old_weight
        };

        if (new_weight - old_weight).abs() >= epsilon {
            weights.insert(rule_id.clone(), new_weight);
            log.append(RuleWeightChange {
                rule_id: rule_id.clone(),
                old_weight,
                new_weight,
                reason: format!("precision {precision:.2} over {total} samples"),
                timestamp: Utc::now(),
            });
            changed.push(rule_id.clone());
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_uplift_matches_scenario_5() {
        let mut weights = HashMap::new();
        weights.insert("R1".to_string(), 1.0);
        let mut precision = HashMap::new();
        precision.insert("R1".to_string(), (8u64, 1u64));
        let log = WeightChangeLog::new();

        let changed = adjust_weights(&mut weights, &precision, &log, 5, 0.8, 0.3, 1.2, 0.8, 0.1, 5.0, 0.01);

        assert_eq!(changed, vec!["R1".to_string()]);
        assert!((weights["R1"] - 1.2).abs() < 1e-9);
        assert_eq!(log.history(None).len(), 1);
    }

    #[test]
    fn low_precision_decreases_weight() {
        let mut weights = HashMap::new();
        weights.insert("R1".to_string(), 1.0);
        let mut precision = HashMap::new();
        precision.insert("R1".to_string(), (1u64, 9u64));
        let log = WeightChangeLog::new();

        adjust_weights(&mut weights, &precision, &log, 5, 0.8, 0.3, 1.2, 0.8, 0.1, 5.0, 0.01);
        assert!((weights["R1"] - 0.8).abs() < 1e-9);
    }

    #[test]
    fn below_min_samples_no_change() {
        let mut weights = HashMap::new();
        weights.insert("R1".to_string(), 1.0);
        let mut precision = HashMap::new();
        precision.insert("R1".to_string(), (1u64, 0u64));
        let log = WeightChangeLog::new();

        let changed = adjust_weights(&mut weights, &precision, &log, 5, 0.8, 0.3, 1.2, 0.8, 0.1, 5.0, 0.01);
        assert!(changed.is_empty());
        assert_eq!(weights["R1"], 1.0);
    }

    #[test]
    fn change_below_epsilon_is_not_logged() {
        let mut weights = HashMap::new();
        weights.insert("R1".to_string(), 4.999);
        let mut precision = HashMap::new();
        precision.insert("R1".to_string(), (10u64, 0u64));
        let log = WeightChangeLog::new();

        adjust_weights(&mut weights, &precision, &log, 5, 0.8, 0.3, 1.2, 0.8, 0.1, 5.0, 0.01);
        assert!(log.history(None).is_empty());
    }
}
