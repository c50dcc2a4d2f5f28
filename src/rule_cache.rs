// =============================================================================
// Rule Cache — active rule set, periodically refreshed
// =============================================================================
//
// The evaluation pipeline reads the active rule list on every transaction, so
// it is cached rather than hitting the rule store each time. Refreshed on a
// timer and explicitly invalidated whenever the weight-adjustment loop
// changes a rule's weight, using the same atomic swap as the beneficiary
// graph.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::rules::AnomalyRule;

pub struct RuleCache {
    rules: RwLock<Vec<AnomalyRule>>,
}

impl RuleCache {
    pub fn new(initial: Vec<AnomalyRule>) -> Self {
        Self {
            rules: RwLock::new(initial),
        }
    }

    pub fn active_rules(&self) -> Vec<AnomalyRule> {
        self.rules.read().iter().filter(|r| r.active).cloned().collect()
    }

    pub fn all_rules(&self) -> Vec<AnomalyRule> {
        self.rules.read().clone()
    }

    /// Swap in a freshly-loaded rule list (e.g. read from the rule store on
    /// the refresh timer).
    pub fn replace(&self, rules: Vec<AnomalyRule>) {
        *self.rules.write() = rules;
    }

    /// Apply updated weights in place, keyed by rule id. Called after the
    /// weight-adjustment loop computes new weights.
    pub fn apply_weight_changes(&self, new_weights: &std::collections::HashMap<String, f64>) {
        if new_weights.is_empty() {
            return;
        }
        let mut rules = self.rules.write();
        for rule in rules.iter_mut() {
            if let Some(&weight) = new_weights.get(&rule.rule_id) {
                rule.risk_weight = weight;
            }
        }
        info!(count = new_weights.len(), "rule cache applied weight changes");
    }

    pub fn upsert(&self, rule: AnomalyRule) {
        let mut rules = self.rules.write();
        if let Some(existing) = rules.iter_mut().find(|r| r.rule_id == rule.rule_id) {
            *existing = rule;
        } else {
            rules.push(rule);
        }
    }

    pub fn remove(&self, rule_id: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.rule_id != rule_id);
        rules.len() != before
    }

    pub fn get(&self, rule_id: &str) -> Option<AnomalyRule> {
        self.rules.read().iter().find(|r| r.rule_id == rule_id).cloned()
    }
}

pub type SharedRuleCache = Arc<RuleCache>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleType;
    use std::collections::HashMap;

    fn rule(id: &str, weight: f64, active: bool) -> AnomalyRule {
        AnomalyRule {
            rule_id: id.to_string(),
            name: id.to_string(),
            rule_type: RuleType::AmountAnomaly,
            risk_weight: weight,
            variance_pct: 0.0,
            params: HashMap::new(),
            active,
        }
    }

    #[test]
    fn active_rules_excludes_inactive() {
        let cache = RuleCache::new(vec![rule("R1", 1.0, true), rule("R2", 1.0, false)]);
        assert_eq!(cache.active_rules().len(), 1);
        assert_eq!(cache.all_rules().len(), 2);
    }

    #[test]
    fn apply_weight_changes_updates_matching_rules_only() {
        let cache = RuleCache::new(vec![rule("R1", 1.0, true), rule("R2", 1.0, true)]);
        let mut changes = HashMap::new();
        changes.insert("R1".to_string(), 1.2);
        cache.apply_weight_changes(&changes);
        assert_eq!(cache.get("R1").unwrap().risk_weight, 1.2);
        assert_eq!(cache.get("R2").unwrap().risk_weight, 1.0);
    }

    #[test]
    fn upsert_replaces_existing_rule() {
        let cache = RuleCache::new(vec![rule("R1", 1.0, true)]);
        cache.upsert(rule("R1", 2.0, false));
        assert_eq!(cache.all_rules().len(), 1);
        assert_eq!(cache.get("R1").unwrap().risk_weight, 2.0);
        assert!(!cache.get("R1").unwrap().active);
    }

    #[test]
    fn remove_reports_whether_rule_existed() {
        let cache = RuleCache::new(vec![rule("R1", 1.0, true)]);
        assert!(cache.remove("R1"));
        assert!(!cache.remove("R1"));
    }
}
