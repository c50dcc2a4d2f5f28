// =============================================================================
// ClientProfile — behavioral aggregate updated on every transaction
// =============================================================================

use std::collections::HashMap;

use chrono::{Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::stats::{Ewma, WelfordStats};
use crate::types::{Transaction, TxnType};

const SECS_PER_HOUR: i64 = 3600;
const SECS_PER_DAY: i64 = 86_400;

/// Running stats for a single beneficiary a client has paid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeneficiaryStats {
    pub ewma_amount: Ewma,
    pub welford: WelfordStats,
    pub txn_count: u64,
    #[serde(default)]
    pub txn_types_used: Vec<TxnType>,
    pub first_seen_ms: i64,
}

impl BeneficiaryStats {
    fn new(ts_ms: i64) -> Self {
        Self {
            ewma_amount: Ewma::new(0.2),
            welford: WelfordStats::new(),
            txn_count: 0,
            txn_types_used: Vec::new(),
            first_seen_ms: ts_ms,
        }
    }

    /// Coefficient of variation as a percentage; 0 when stddev can't be
    /// estimated yet.
    pub fn cv_pct(&self) -> f64 {
        if self.welford.count() < 2 || self.welford.mean() == 0.0 {
            return 0.0;
        }
        100.0 * self.welford.stddev(0.0) / self.welford.mean()
    }
}

/// Running stats for one seasonal slot (an hour-of-day or day-of-week).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeasonalSlot {
    pub ewma: Ewma,
    pub welford: WelfordStats,
}

impl SeasonalSlot {
    pub fn sample_count(&self) -> u64 {
        self.welford.count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientProfile {
    pub client_id: String,
    pub ewma_alpha: f64,

    pub total_txn_count: u64,
    pub txn_type_counts: HashMap<TxnType, u64>,
    pub amount_count_by_type: HashMap<TxnType, u64>,
    pub avg_amount_by_type: HashMap<TxnType, Ewma>,

    pub ewma_amount: Ewma,
    pub amount_welford: WelfordStats,

    pub ewma_hourly_tps: Ewma,
    pub ewma_hourly_amount: Ewma,
    pub ewma_daily_amount: Ewma,
    pub ewma_daily_new_beneficiaries: Ewma,

    pub last_hour_bucket: Option<i64>,
    pub last_day_bucket: Option<i64>,
    pub completed_hours_count: u64,
    pub completed_days_count: u64,
    pub completed_days_for_bene_count: u64,

    pub seasonal_hourly: HashMap<String, SeasonalSlot>,
    pub seasonal_daily: HashMap<String, SeasonalSlot>,

    pub beneficiary_stats: HashMap<String, BeneficiaryStats>,
    pub distinct_beneficiary_count: u64,

    pub last_updated_ms: i64,
    pub created_at_ms: i64,
}

impl ClientProfile {
    pub fn new(client_id: impl Into<String>, ewma_alpha: f64, now_ms: i64) -> Self {
        Self {
            client_id: client_id.into(),
            ewma_alpha,
            total_txn_count: 0,
            txn_type_counts: HashMap::new(),
            amount_count_by_type: HashMap::new(),
            avg_amount_by_type: HashMap::new(),
            ewma_amount: Ewma::new(ewma_alpha),
            amount_welford: WelfordStats::new(),
            ewma_hourly_tps: Ewma::new(ewma_alpha),
            ewma_hourly_amount: Ewma::new(ewma_alpha),
            ewma_daily_amount: Ewma::new(ewma_alpha),
            ewma_daily_new_beneficiaries: Ewma::new(ewma_alpha),
            last_hour_bucket: None,
            last_day_bucket: None,
            completed_hours_count: 0,
            completed_days_count: 0,
            completed_days_for_bene_count: 0,
            seasonal_hourly: HashMap::new(),
            seasonal_daily: HashMap::new(),
            beneficiary_stats: HashMap::new(),
            distinct_beneficiary_count: 0,
            last_updated_ms: now_ms,
            created_at_ms: now_ms,
        }
    }

    pub fn amount_std_dev(&self) -> f64 {
        if self.total_txn_count < 2 {
            0.0
        } else {
            self.amount_welford.variance().sqrt()
        }
    }

    pub fn type_frequency(&self, txn_type: TxnType) -> f64 {
        if self.total_txn_count == 0 {
            return 0.0;
        }
        let count = *self.txn_type_counts.get(&txn_type).unwrap_or(&0);
        count as f64 / self.total_txn_count as f64
    }

    fn hour_key(dt: &chrono::DateTime<Utc>) -> String {
        format!("{:02}", dt.hour())
    }

    /// ISO weekday with Monday = 1.
    fn day_key(dt: &chrono::DateTime<Utc>) -> String {
        (dt.weekday().number_from_monday()).to_string()
    }

    /// Fold `txn` into every statistic this profile tracks. Mirrors the
    /// update algorithm: EWMA/Welford on amount (overall, per-type, per
    /// beneficiary), hour/day bucket rollover, seasonal slots, then the
    /// plain counters.
    ///
    /// `current_window_beneficiary_txn_count` is the live count closed out
    /// by the hour/day rollover below — it is the *live counter store's*
    /// pre-update snapshot, folded in as a single Welford sample per closed
    /// bucket, exactly as specified in §4.1 step 2.
    pub fn update(
        &mut self,
        txn: &Transaction,
        closed_hour_live_tps: Option<u64>,
        closed_hour_live_amount: Option<f64>,
        closed_day_live_amount: Option<f64>,
        closed_day_new_beneficiaries: Option<u64>,
    ) {
        let ts_ms = txn.effective_timestamp_ms();
        let ts_secs = ts_ms / 1000;
        let dt = txn.effective_time();

        // 1. EWMA + Welford on amount, per-type, per-beneficiary.
        self.ewma_amount.update(txn.amount);
        self.amount_welford.update(txn.amount);

        let alpha = self.ewma_alpha;
        let type_ewma = self
            .avg_amount_by_type
            .entry(txn.txn_type)
            .or_insert_with(|| Ewma::new(alpha));
        type_ewma.update(txn.amount);

        if let Some(bene_key) = txn.beneficiary_key() {
            let is_new = !self.beneficiary_stats.contains_key(&bene_key);
            let stats = self
                .beneficiary_stats
                .entry(bene_key)
                .or_insert_with(|| BeneficiaryStats::new(ts_ms));
            stats.ewma_amount.update(txn.amount);
            stats.welford.update(txn.amount);
            stats.txn_count += 1;
            if !stats.txn_types_used.contains(&txn.txn_type) {
                stats.txn_types_used.push(txn.txn_type);
            }
            if is_new {
                self.distinct_beneficiary_count += 1;
            }
        }

        // 2. Hour/day bucket rollover.
        let hour_bucket = ts_secs / SECS_PER_HOUR;
        if self.last_hour_bucket != Some(hour_bucket) {
            if self.last_hour_bucket.is_some() {
                if let Some(tps) = closed_hour_live_tps {
                    self.ewma_hourly_tps.update(tps as f64);
                }
                if let Some(amount) = closed_hour_live_amount {
                    self.ewma_hourly_amount.update(amount);
                }
                self.completed_hours_count += 1;
            }
            self.last_hour_bucket = Some(hour_bucket);
        }

        let day_bucket = ts_secs / SECS_PER_DAY;
        if self.last_day_bucket != Some(day_bucket) {
            if self.last_day_bucket.is_some() {
                if let Some(amount) = closed_day_live_amount {
                    self.ewma_daily_amount.update(amount);
                    self.completed_days_count += 1;
                }
                if let Some(new_bene) = closed_day_new_beneficiaries {
                    self.ewma_daily_new_beneficiaries.update(new_bene as f64);
                    self.completed_days_for_bene_count += 1;
                }
            }
            self.last_day_bucket = Some(day_bucket);
        }

        // 3. Seasonal slots.
        let hour_key = Self::hour_key(&dt);
        let hour_slot = self.seasonal_hourly.entry(hour_key).or_default();
        hour_slot.ewma.update(txn.amount);
        hour_slot.welford.update(txn.amount);

        let day_key = Self::day_key(&dt);
        let day_slot = self.seasonal_daily.entry(day_key).or_default();
        day_slot.ewma.update(txn.amount);
        day_slot.welford.update(txn.amount);

        // 4. Plain counters.
        self.total_txn_count += 1;
        *self.txn_type_counts.entry(txn.txn_type).or_insert(0) += 1;
        *self.amount_count_by_type.entry(txn.txn_type).or_insert(0) += 1;

        // 5. Bookkeeping.
        self.last_updated_ms = ts_ms;
    }

}

/// Truncate an epoch-ms timestamp to the start of its UTC hour, used by
/// callers that need to compute a bucket key outside of `update`.
pub fn hour_bucket_start(ts_ms: i64) -> i64 {
    (ts_ms / 1000 / SECS_PER_HOUR) * SECS_PER_HOUR
}

pub fn day_bucket_start(ts_ms: i64) -> i64 {
    (ts_ms / 1000 / SECS_PER_DAY) * SECS_PER_DAY
}

/// Render an epoch-ms timestamp's UTC hour-of-day key, `"00"`..`"23"`.
pub fn hour_of_day_key(ts_ms: i64) -> String {
    let dt = Utc.timestamp_millis_opt(ts_ms).single().unwrap_or_else(Utc::now);
    format!("{:02}", dt.hour())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxnType;

    fn txn(amount: f64, ts_ms: i64, bene: Option<(&str, &str)>) -> Transaction {
        Transaction {
            txn_id: "T1".into(),
            client_id: "C1".into(),
            txn_type: TxnType::Upi,
            amount,
            timestamp: Some(ts_ms),
            beneficiary_ifsc: bene.map(|(i, _)| i.to_string()),
            beneficiary_account: bene.map(|(_, a)| a.to_string()),
        }
    }

    #[test]
    fn total_txn_count_matches_sum_of_type_counts() {
        let mut profile = ClientProfile::new("C1", 0.01, 0);
        for i in 0..10 {
            profile.update(&txn(1000.0, i * 1000, None), None, None, None, None);
        }
        assert_eq!(profile.total_txn_count, 10);
        let sum: u64 = profile.txn_type_counts.values().sum();
        assert_eq!(sum, 10);
    }

    #[test]
    fn amount_std_dev_is_zero_below_two_samples() {
        let mut profile = ClientProfile::new("C1", 0.01, 0);
        assert_eq!(profile.amount_std_dev(), 0.0);
        profile.update(&txn(1000.0, 0, None), None, None, None, None);
        assert_eq!(profile.amount_std_dev(), 0.0);
    }

    #[test]
    fn first_sample_seeds_ewma_directly() {
        let mut profile = ClientProfile::new("C1", 0.01, 0);
        profile.update(&txn(5000.0, 0, None), None, None, None, None);
        assert_eq!(profile.ewma_amount.value(), 5000.0);
    }

    #[test]
    fn beneficiary_stats_track_distinct_count() {
        let mut profile = ClientProfile::new("C1", 0.01, 0);
        profile.update(
            &txn(1000.0, 0, Some(("HDFC0001", "111"))),
            None,
            None,
            None,
            None,
        );
        profile.update(
            &txn(2000.0, 1000, Some(("HDFC0001", "111"))),
            None,
            None,
            None,
            None,
        );
        profile.update(
            &txn(3000.0, 2000, Some(("HDFC0001", "222"))),
            None,
            None,
            None,
            None,
        );
        assert_eq!(profile.distinct_beneficiary_count, 2);
        let stats = profile.beneficiary_stats.get("HDFC0001:111").unwrap();
        assert_eq!(stats.txn_count, 2);
    }

    #[test]
    fn hour_rollover_folds_closed_bucket_into_hourly_ewma() {
        let mut profile = ClientProfile::new("C1", 0.5, 0);
        profile.update(&txn(100.0, 0, None), None, None, None, None);
        // cross into next hour bucket; supply the closed bucket's live stats
        profile.update(
            &txn(200.0, 3_700_000, None),
            Some(3),
            Some(9000.0),
            None,
            None,
        );
        assert_eq!(profile.completed_hours_count, 1);
        assert_eq!(profile.ewma_hourly_tps.value(), 3.0);
        assert_eq!(profile.ewma_hourly_amount.value(), 9000.0);
    }
}
