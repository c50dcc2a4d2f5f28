// =============================================================================
// Statistical Evaluators — one pure function per rule type
// =============================================================================
//
// Every evaluator is a pure function of `(txn, profile, context, rule)`. None
// of them mutate state or perform I/O, so a failing evaluator can only ever
// fail by returning `Err`, never by panicking on shared state — dispatch in
// `rules::evaluate_all` isolates each call regardless.

use anyhow::Result;

use crate::config::{resolve_variance_pct, RuleDefaults};
use crate::profile::ClientProfile;
use crate::rules::{AnomalyRule, RuleContext, RuleResult};
use crate::types::Transaction;

/// Deviation-ratio helper shared by every "observed exceeds expected by v%"
/// rule: `excess / (expected · v/100) · 100`, capped at 100.
fn deviation_ratio(observed: f64, expected: f64, variance_pct: f64) -> Option<f64> {
    if expected <= 0.0 || variance_pct <= 0.0 {
        return None;
    }
    let threshold = expected * (1.0 + variance_pct / 100.0);
    if observed <= threshold {
        return None;
    }
    let excess = observed - threshold;
    let denom = expected * variance_pct / 100.0;
    if denom <= 0.0 {
        return None;
    }
    Some((excess / denom * 100.0).min(100.0))
}

pub fn amount_anomaly(
    txn: &Transaction,
    profile: &ClientProfile,
    rule: &AnomalyRule,
    defaults: &RuleDefaults,
) -> Result<RuleResult> {
    if profile.total_txn_count < 2 {
        return Ok(RuleResult::not_triggered(rule, "insufficient history"));
    }
    let v = resolve_variance_pct(rule.variance_pct, defaults.variance_pct);
    let ewma = profile.ewma_amount.value();
    match deviation_ratio(txn.amount, ewma, v) {
        Some(dev) => Ok(RuleResult::triggered(
            rule,
            dev,
            format!(
                "amount {:.2} exceeds ewma {:.2} by more than {v:.0}%",
                txn.amount, ewma
            ),
        )),
        None => Ok(RuleResult::not_triggered(
            rule,
            format!("amount {:.2} within ewma {:.2} envelope", txn.amount, ewma),
        )),
    }
}

pub fn amount_per_type(
    txn: &Transaction,
    profile: &ClientProfile,
    rule: &AnomalyRule,
    defaults: &RuleDefaults,
) -> Result<RuleResult> {
    let min_samples = rule.param("min_type_samples", defaults.min_type_samples as f64) as u64;
    let count = *profile.amount_count_by_type.get(&txn.txn_type).unwrap_or(&0);
    if count < min_samples {
        return Ok(RuleResult::not_triggered(rule, "insufficient per-type history"));
    }
    let v = resolve_variance_pct(rule.variance_pct, defaults.variance_pct);
    let ewma = profile
        .avg_amount_by_type
        .get(&txn.txn_type)
        .map(|e| e.value())
        .unwrap_or(0.0);
    match deviation_ratio(txn.amount, ewma, v) {
        Some(dev) => Ok(RuleResult::triggered(
            rule,
            dev,
            format!(
                "{} amount {:.2} exceeds type-ewma {:.2} by more than {v:.0}%",
                txn.txn_type, txn.amount, ewma
            ),
        )),
        None => Ok(RuleResult::not_triggered(
            rule,
            format!("{} amount within type-ewma envelope", txn.txn_type),
        )),
    }
}

pub fn hourly_amount(
    _txn: &Transaction,
    profile: &ClientProfile,
    ctx: &RuleContext,
    rule: &AnomalyRule,
    defaults: &RuleDefaults,
) -> Result<RuleResult> {
    let v = resolve_variance_pct(rule.variance_pct, defaults.variance_pct);
    let ewma = profile.ewma_hourly_amount.value();
    let observed = ctx.counters.current_hourly_amount;
    match deviation_ratio(observed, ewma, v) {
        Some(dev) => Ok(RuleResult::triggered(
            rule,
            dev,
            format!(
                "hourly amount {:.2} exceeds ewma {:.2} by more than {v:.0}%",
                observed, ewma
            ),
        )),
        None => Ok(RuleResult::not_triggered(rule, "hourly amount within envelope")),
    }
}

pub fn tps_spike(
    _txn: &Transaction,
    profile: &ClientProfile,
    ctx: &RuleContext,
    rule: &AnomalyRule,
    defaults: &RuleDefaults,
) -> Result<RuleResult> {
    let v = resolve_variance_pct(rule.variance_pct, defaults.variance_pct);
    let ewma = profile.ewma_hourly_tps.value();
    let observed = ctx.counters.current_hourly_txn_count as f64;
    match deviation_ratio(observed, ewma, v) {
        Some(dev) => Ok(RuleResult::triggered(
            rule,
            dev,
            format!(
                "hourly txn count {:.0} exceeds ewma tps {:.2} by more than {v:.0}%",
                observed, ewma
            ),
        )),
        None => Ok(RuleResult::not_triggered(rule, "transaction rate within envelope")),
    }
}

pub fn transaction_type(
    txn: &Transaction,
    profile: &ClientProfile,
    rule: &AnomalyRule,
    defaults: &RuleDefaults,
) -> Result<RuleResult> {
    let min_repeat = rule.param("min_repeat_count", defaults.min_repeat_count as f64) as u64;
    if profile.total_txn_count < min_repeat {
        return Ok(RuleResult::not_triggered(rule, "insufficient transaction history"));
    }
    let min_freq_pct = rule.param(
        "min_type_frequency_pct",
        defaults.min_type_frequency_pct,
    );
    let min_freq = min_freq_pct / 100.0;
    let freq = profile.type_frequency(txn.txn_type);
    if freq >= min_freq || min_freq <= 0.0 {
        return Ok(RuleResult::not_triggered(
            rule,
            format!("{} frequency {:.4} meets expected minimum", txn.txn_type, freq),
        ));
    }
    let partial = (100.0 * (1.0 - freq / min_freq)).clamp(0.0, 100.0);
    Ok(RuleResult::triggered(
        rule,
        partial,
        format!(
            "{} frequency {:.4} below expected minimum {:.4}",
            txn.txn_type, freq, min_freq
        ),
    ))
}

pub fn beneficiary_concentration(
    txn: &Transaction,
    profile: &ClientProfile,
    ctx: &RuleContext,
    rule: &AnomalyRule,
    defaults: &RuleDefaults,
) -> Result<RuleResult> {
    let Some(bene_key) = ctx.current_beneficiary_key else {
        return Ok(RuleResult::not_triggered(rule, "no beneficiary on transaction"));
    };
    let min_distinct = rule.param(
        "min_distinct_beneficiaries",
        defaults.min_distinct_beneficiaries as f64,
    ) as u64;
    if profile.distinct_beneficiary_count < min_distinct {
        return Ok(RuleResult::not_triggered(rule, "insufficient beneficiary history"));
    }
    let bene_txns = profile
        .beneficiary_stats
        .get(bene_key)
        .map(|s| s.txn_count)
        .unwrap_or(0) as f64;
    let total = profile.total_txn_count as f64;
    if total <= 0.0 {
        return Ok(RuleResult::not_triggered(rule, "no transaction history"));
    }
    let concentration = bene_txns / total;
    let v = resolve_variance_pct(rule.variance_pct, defaults.variance_pct);
    let abs_min_pct = rule.param(
        "abs_min_concentration_pct",
        defaults.abs_min_concentration_pct,
    );
    let baseline = 1.0 / profile.distinct_beneficiary_count.max(1) as f64;
    let threshold = (abs_min_pct / 100.0).max(baseline * (1.0 + v / 100.0));
    if concentration < threshold {
        return Ok(RuleResult::not_triggered(
            rule,
            format!("beneficiary concentration {:.4} below threshold {:.4}", concentration, threshold),
        ));
    }
    let txn_hint = txn.txn_id.as_str();
    Ok(RuleResult::triggered(
        rule,
        100.0 * concentration,
        format!(
            "beneficiary {} receives {:.1}% of {}'s transactions (threshold {:.1}%), txn {}",
            bene_key,
            concentration * 100.0,
            profile.client_id,
            threshold * 100.0,
            txn_hint,
        ),
    ))
}

pub fn daily_cumulative(
    txn: &Transaction,
    profile: &ClientProfile,
    ctx: &RuleContext,
    rule: &AnomalyRule,
    defaults: &RuleDefaults,
) -> Result<RuleResult> {
    let min_days = rule.param(
        "daily_cumulative_min_days",
        defaults.daily_cumulative_min_days as f64,
    ) as u64;
    if profile.completed_days_count < min_days {
        return Ok(RuleResult::not_triggered(rule, "insufficient daily history"));
    }
    let v = resolve_variance_pct(rule.variance_pct, defaults.variance_pct);
    let ewma = profile.ewma_daily_amount.value();
    // The current day's cumulative amount is the live counter's running
    // total plus this transaction, since the live counter has not yet been
    // incremented for it at the point the rule engine runs.
    let observed = ctx.counters.current_daily_amount + txn.amount;
    match deviation_ratio(observed, ewma, v) {
        Some(dev) => Ok(RuleResult::triggered(
            rule,
            dev,
            format!(
                "daily cumulative amount {:.2} exceeds ewma {:.2} by more than {v:.0}%",
                observed, ewma
            ),
        )),
        None => Ok(RuleResult::not_triggered(rule, "daily cumulative amount within envelope")),
    }
}

pub fn new_bene_velocity(
    _txn: &Transaction,
    profile: &ClientProfile,
    ctx: &RuleContext,
    rule: &AnomalyRule,
    defaults: &RuleDefaults,
) -> Result<RuleResult> {
    let min_profile_days = rule.param(
        "new_bene_min_profile_days",
        defaults.new_bene_min_profile_days as f64,
    ) as u64;
    if profile.completed_days_for_bene_count < min_profile_days {
        return Ok(RuleResult::not_triggered(rule, "insufficient beneficiary-velocity history"));
    }
    let v = resolve_variance_pct(rule.variance_pct, defaults.variance_pct);
    let max_per_day = rule.param("new_bene_max_per_day", defaults.new_bene_max_per_day as f64);
    let ewma = profile.ewma_daily_new_beneficiaries.value();
    let threshold = max_per_day.max(ewma * (1.0 + v / 100.0));
    let observed = ctx.counters.new_beneficiaries_today as f64;
    if observed <= threshold {
        return Ok(RuleResult::not_triggered(
            rule,
            format!("new beneficiaries today {observed:.0} within threshold {threshold:.2}"),
        ));
    }
    let partial = (100.0 * (observed - threshold) / threshold.max(1.0)).min(100.0);
    Ok(RuleResult::triggered(
        rule,
        partial,
        format!("new beneficiaries today {observed:.0} exceeds threshold {threshold:.2}"),
    ))
}

pub fn dormancy_break(
    txn: &Transaction,
    profile: &ClientProfile,
    rule: &AnomalyRule,
    defaults: &RuleDefaults,
) -> Result<RuleResult> {
    let dormancy_days = rule.param("dormancy_days", defaults.dormancy_days);
    let gap_secs = (txn.effective_timestamp_ms() - profile.last_updated_ms) as f64 / 1000.0;
    if gap_secs < dormancy_days * 86_400.0 {
        return Ok(RuleResult::not_triggered(rule, "client not dormant"));
    }
    let v = resolve_variance_pct(rule.variance_pct, defaults.variance_pct);
    let ewma = profile.ewma_amount.value();
    if deviation_ratio(txn.amount, ewma, v).is_none() {
        return Ok(RuleResult::not_triggered(
            rule,
            "dormant client resumed with an unremarkable amount",
        ));
    }
    Ok(RuleResult::triggered(
        rule,
        100.0,
        format!(
            "client dormant for {:.1} days resumed with an anomalous amount {:.2}",
            gap_secs / 86_400.0,
            txn.amount
        ),
    ))
}

pub fn cross_channel_bene(
    _txn: &Transaction,
    profile: &ClientProfile,
    ctx: &RuleContext,
    rule: &AnomalyRule,
    defaults: &RuleDefaults,
) -> Result<RuleResult> {
    let Some(bene_key) = ctx.current_beneficiary_key else {
        return Ok(RuleResult::not_triggered(rule, "no beneficiary on transaction"));
    };
    let Some(stats) = profile.beneficiary_stats.get(bene_key) else {
        return Ok(RuleResult::not_triggered(rule, "unknown beneficiary"));
    };
    let v = resolve_variance_pct(rule.variance_pct, defaults.variance_pct);
    let distinct_types = stats.txn_types_used.len() as f64;
    let threshold = 1.0 * (1.0 + v / 100.0);
    if distinct_types <= threshold {
        return Ok(RuleResult::not_triggered(
            rule,
            format!("beneficiary {bene_key} used across {distinct_types:.0} channel(s)"),
        ));
    }
    let partial = (100.0 * (distinct_types - threshold) / threshold).min(100.0);
    Ok(RuleResult::triggered(
        rule,
        partial,
        format!(
            "beneficiary {bene_key} used across {distinct_types:.0} transaction types, exceeding baseline by more than {v:.0}%"
        ),
    ))
}

pub fn seasonal_deviation(
    txn: &Transaction,
    profile: &ClientProfile,
    rule: &AnomalyRule,
    defaults: &RuleDefaults,
) -> Result<RuleResult> {
    let min_samples = rule.param("seasonal_min_samples", defaults.seasonal_min_samples as f64) as u64;
    let hour_key = crate::profile::model::hour_of_day_key(txn.effective_timestamp_ms());
    let Some(slot) = profile.seasonal_hourly.get(&hour_key) else {
        return Ok(RuleResult::not_triggered(rule, "no seasonal history for this hour"));
    };
    if slot.sample_count() < min_samples {
        return Ok(RuleResult::not_triggered(rule, "insufficient seasonal samples"));
    }
    let v = resolve_variance_pct(rule.variance_pct, defaults.variance_pct);
    let floor = rule.param("stddev_floor", defaults.stddev_floor);
    let zscore = slot.welford.zscore(txn.amount, floor);
    let z_threshold = (v / 100.0) * 3.0;
    if zscore <= z_threshold {
        return Ok(RuleResult::not_triggered(
            rule,
            format!("hour-{hour_key} amount z-score {zscore:.2} within {z_threshold:.2}"),
        ));
    }
    let partial = (zscore / z_threshold * 100.0).min(100.0);
    Ok(RuleResult::triggered(
        rule,
        partial,
        format!(
            "hour-{hour_key} amount z-score {zscore:.2} exceeds threshold {z_threshold:.2} (variance {v:.0}%)"
        ),
    ))
}

/// The rule is defined per-beneficiary but dispatch is per-transaction; we
/// scan every beneficiary on the profile and surface the worst offender,
/// since any one of them exceeding the CV ceiling is reason enough to flag
/// this transaction for review.
pub fn cv_stability(
    _txn: &Transaction,
    profile: &ClientProfile,
    rule: &AnomalyRule,
    defaults: &RuleDefaults,
) -> Result<RuleResult> {
    let min_txns = rule.param("min_beneficiary_txns", defaults.min_beneficiary_txns as f64) as u64;
    let max_cv_pct = rule.param("max_cv_pct", defaults.max_cv_pct);

    let mut worst: Option<(&String, f64)> = None;
    for (key, stats) in profile.beneficiary_stats.iter() {
        if stats.txn_count < min_txns {
            continue;
        }
        let cv = stats.cv_pct();
        if cv > max_cv_pct && worst.map(|(_, w)| cv > w).unwrap_or(true) {
            worst = Some((key, cv));
        }
    }

    match worst {
        Some((key, cv)) => {
            let partial = (100.0 * (cv - max_cv_pct) / max_cv_pct).min(100.0);
            Ok(RuleResult::triggered(
                rule,
                partial,
                format!("beneficiary {key} coefficient of variation {cv:.1}% exceeds max {max_cv_pct:.1}%"),
            ))
        }
        None => Ok(RuleResult::not_triggered(rule, "no beneficiary exceeds cv threshold")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ClientProfile;
    use crate::rules::RuleType;
    use crate::types::TxnType;
    use std::collections::HashMap;

    fn rule(rule_type: RuleType, variance_pct: f64, weight: f64) -> AnomalyRule {
        AnomalyRule {
            rule_id: "R1".into(),
            name: "test rule".into(),
            rule_type,
            risk_weight: weight,
            variance_pct,
            params: HashMap::new(),
            active: true,
        }
    }

    fn txn(amount: f64) -> Transaction {
        Transaction {
            txn_id: "TXN-1".into(),
            client_id: "C-NEW".into(),
            txn_type: TxnType::Neft,
            amount,
            timestamp: Some(0),
            beneficiary_ifsc: None,
            beneficiary_account: None,
        }
    }

    #[test]
    fn amount_anomaly_matches_scenario_2() {
        let mut profile = ClientProfile::new("C1", 0.01, 0);
        profile.total_txn_count = 100;
        profile.ewma_amount = crate::stats::Ewma::with_value(0.01, 50_000.0);
        let r = rule(RuleType::AmountAnomaly, 100.0, 1.0);
        let defaults = RuleDefaults::default();
        let result = amount_anomaly(&txn(150_000.0), &profile, &r, &defaults).unwrap();
        assert!(result.triggered);
        assert_eq!(result.deviation_pct, 100.0);
        assert_eq!(result.partial_score, 100.0);
    }

    #[test]
    fn amount_anomaly_not_triggered_below_threshold() {
        let mut profile = ClientProfile::new("C1", 0.01, 0);
        profile.total_txn_count = 100;
        profile.ewma_amount = crate::stats::Ewma::with_value(0.01, 50_000.0);
        let r = rule(RuleType::AmountAnomaly, 100.0, 1.0);
        let defaults = RuleDefaults::default();
        let result = amount_anomaly(&txn(90_000.0), &profile, &r, &defaults).unwrap();
        assert!(!result.triggered);
        assert_eq!(result.partial_score, 0.0);
    }

    #[test]
    fn amount_anomaly_skips_below_min_history() {
        let profile = ClientProfile::new("C1", 0.01, 0);
        let r = rule(RuleType::AmountAnomaly, 100.0, 1.0);
        let defaults = RuleDefaults::default();
        let result = amount_anomaly(&txn(150_000.0), &profile, &r, &defaults).unwrap();
        assert!(!result.triggered);
    }
}
