// =============================================================================
// Live Counter Store — current-hour/current-day rolling counters
// =============================================================================
//
// Increment-on-transaction, read-at-evaluation, rotate-on-bucket-change, per
// §4.2. Counters are read by the pipeline *before* the triggering
// transaction is folded in, so a transaction never sees itself in its own
// context window; they are incremented only after the evaluation result has
// been persisted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

const SECS_PER_HOUR: i64 = 3600;
const SECS_PER_DAY: i64 = 86_400;

fn hour_bucket(ts_ms: i64) -> i64 {
    ts_ms / 1000 / SECS_PER_HOUR
}

fn day_bucket(ts_ms: i64) -> i64 {
    ts_ms / 1000 / SECS_PER_DAY
}

#[derive(Debug, Clone, Default)]
struct BeneficiaryCounters {
    hour_bucket: i64,
    hour_txn_count: u64,
    hour_amount: f64,
    day_bucket: i64,
    day_txn_count: u64,
    day_amount: f64,
}

#[derive(Debug, Clone, Default)]
struct ClientCounters {
    hour_bucket: i64,
    hour_txn_count: u64,
    hour_amount: f64,
    day_bucket: i64,
    day_amount: f64,
    /// beneficiaries newly seen within the current day bucket.
    new_beneficiaries_today: HashSet<String>,
    new_beneficiaries_day_bucket: i64,
    beneficiaries: HashMap<String, BeneficiaryCounters>,
}

/// Snapshot of a client's live counters, taken before a transaction is
/// folded in — the context every rule evaluator sees.
#[derive(Debug, Clone, Default)]
pub struct CounterSnapshot {
    pub current_hourly_txn_count: u64,
    pub current_hourly_amount: f64,
    pub current_window_beneficiary_txn_count: u64,
    pub current_window_beneficiary_amount: f64,
    pub current_daily_amount: f64,
    pub new_beneficiaries_today: u64,
}

/// Live-counter values a closed bucket carries into `ClientProfile::update`.
#[derive(Debug, Clone, Default)]
pub struct BucketClose {
    pub closed_hour_tps: Option<u64>,
    pub closed_hour_amount: Option<f64>,
    pub closed_day_amount: Option<f64>,
    pub closed_day_new_beneficiaries: Option<u64>,
}

#[derive(Default)]
pub struct LiveCounterStore {
    clients: RwLock<HashMap<String, ClientCounters>>,
}

impl LiveCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the current window's counters without mutating anything. Must be
    /// called after the profile load and before rule dispatch.
    pub fn snapshot(&self, client_id: &str, beneficiary_key: Option<&str>, now_ms: i64) -> CounterSnapshot {
        let hb = hour_bucket(now_ms);
        let db = day_bucket(now_ms);
        let clients = self.clients.read();
        let Some(c) = clients.get(client_id) else {
            return CounterSnapshot::default();
        };

        let (hourly_txn, hourly_amt) = if c.hour_bucket == hb {
            (c.hour_txn_count, c.hour_amount)
        } else {
            (0, 0.0)
        };

        let daily_amt = if c.day_bucket == db { c.day_amount } else { 0.0 };

        let new_bene_today = if c.new_beneficiaries_day_bucket == db {
            c.new_beneficiaries_today.len() as u64
        } else {
            0
        };

        let (bene_txn, bene_amt) = match beneficiary_key.and_then(|k| c.beneficiaries.get(k)) {
            Some(bc) if bc.hour_bucket == hb => (bc.hour_txn_count, bc.hour_amount),
            _ => (0, 0.0),
        };

        CounterSnapshot {
            current_hourly_txn_count: hourly_txn,
            current_hourly_amount: hourly_amt,
            current_window_beneficiary_txn_count: bene_txn,
            current_window_beneficiary_amount: bene_amt,
            current_daily_amount: daily_amt,
            new_beneficiaries_today: new_bene_today,
        }
    }

    /// Increment counters for a just-evaluated transaction, rotating any
    /// stale bucket first and reporting what was closed so the caller can
    /// fold it into the client's profile.
    pub fn record(
        &self,
        client_id: &str,
        beneficiary_key: Option<&str>,
        amount: f64,
        ts_ms: i64,
        is_new_beneficiary: bool,
    ) -> BucketClose {
        let hb = hour_bucket(ts_ms);
        let db = day_bucket(ts_ms);

        let mut clients = self.clients.write();
        let c = clients.entry(client_id.to_string()).or_default();

        let mut close = BucketClose::default();

        if c.hour_bucket != hb {
            if c.hour_txn_count > 0 || c.hour_bucket != 0 {
                close.closed_hour_tps = Some(c.hour_txn_count);
                close.closed_hour_amount = Some(c.hour_amount);
            }
            c.hour_bucket = hb;
            c.hour_txn_count = 0;
            c.hour_amount = 0.0;
        }
        if c.day_bucket != db {
            if c.day_amount > 0.0 || c.day_bucket != 0 {
                close.closed_day_amount = Some(c.day_amount);
            }
            c.day_bucket = db;
            c.day_amount = 0.0;
        }
        if c.new_beneficiaries_day_bucket != db {
            if !c.new_beneficiaries_today.is_empty() || c.new_beneficiaries_day_bucket != 0 {
                close.closed_day_new_beneficiaries = Some(c.new_beneficiaries_today.len() as u64);
            }
            c.new_beneficiaries_today.clear();
            c.new_beneficiaries_day_bucket = db;
        }

        c.hour_txn_count += 1;
        c.hour_amount += amount;
        c.day_amount += amount;

        if let Some(key) = beneficiary_key {
            if is_new_beneficiary {
                c.new_beneficiaries_today.insert(key.to_string());
            }
            let bc = c.beneficiaries.entry(key.to_string()).or_default();
            if bc.hour_bucket != hb {
                bc.hour_bucket = hb;
                bc.hour_txn_count = 0;
                bc.hour_amount = 0.0;
            }
            if bc.day_bucket != db {
                bc.day_bucket = db;
                bc.day_txn_count = 0;
                bc.day_amount = 0.0;
            }
            bc.hour_txn_count += 1;
            bc.hour_amount += amount;
            bc.day_txn_count += 1;
            bc.day_amount += amount;
        }

        close
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }
}

pub type SharedLiveCounterStore = Arc<LiveCounterStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_excludes_transaction_not_yet_recorded() {
        let store = LiveCounterStore::new();
        let t0 = 0i64;
        let snap = store.snapshot("C1", None, t0);
        assert_eq!(snap.current_hourly_txn_count, 0);
        store.record("C1", None, 100.0, t0, false);
        // the just-recorded txn is not visible in a snapshot taken before it
        let snap2 = store.snapshot("C1", None, t0);
        assert_eq!(snap2.current_hourly_txn_count, 1);
    }

    #[test]
    fn hour_rollover_reports_closed_bucket() {
        let store = LiveCounterStore::new();
        store.record("C1", None, 100.0, 0, false);
        store.record("C1", None, 200.0, 0, false);
        let close = store.record("C1", None, 50.0, 3_700_000, false);
        assert_eq!(close.closed_hour_tps, Some(2));
        assert_eq!(close.closed_hour_amount, Some(300.0));
    }

    #[test]
    fn new_beneficiary_tracked_within_day_bucket() {
        let store = LiveCounterStore::new();
        store.record("C1", Some("B1"), 100.0, 0, true);
        store.record("C1", Some("B2"), 100.0, 1000, true);
        let snap = store.snapshot("C1", None, 2000);
        assert_eq!(snap.new_beneficiaries_today, 2);
    }
}
