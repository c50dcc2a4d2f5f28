// =============================================================================
// Transaction & Result Store — in-memory persistence
// =============================================================================
//
// Mirrors the position manager's `RwLock<Vec<T>>` shape. A real deployment
// would back this with an actual key-value store; this crate only specifies
// the interface (see `PersistenceAdapter`) and ships the in-memory default.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::scoring::EvaluationResult;
use crate::types::Transaction;

/// Abstraction over whatever key-value store backs this engine in
/// production. The in-memory implementation below is what this crate ships;
/// a production deployment swaps this for a real adapter.
pub trait PersistenceAdapter: Send + Sync {
    fn save_transaction(&self, txn: Transaction);
    fn save_result(&self, result: EvaluationResult);
    fn transaction_history(&self) -> Vec<Transaction>;
    fn result(&self, txn_id: &str) -> Option<EvaluationResult>;
    fn results_for_client(&self, client_id: &str, limit: usize) -> Vec<EvaluationResult>;
}

#[derive(Default)]
pub struct InMemoryStore {
    transactions: RwLock<Vec<Transaction>>,
    results: RwLock<Vec<EvaluationResult>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceAdapter for InMemoryStore {
    fn save_transaction(&self, txn: Transaction) {
        self.transactions.write().push(txn);
    }

    fn save_result(&self, result: EvaluationResult) {
        self.results.write().push(result);
    }

    fn transaction_history(&self) -> Vec<Transaction> {
        self.transactions.read().clone()
    }

    fn result(&self, txn_id: &str) -> Option<EvaluationResult> {
        self.results
            .read()
            .iter()
            .rev()
            .find(|r| r.txn_id == txn_id)
            .cloned()
    }

    fn results_for_client(&self, client_id: &str, limit: usize) -> Vec<EvaluationResult> {
        self.results
            .read()
            .iter()
            .rev()
            .filter(|r| r.client_id == client_id)
            .take(limit)
            .cloned()
            .collect()
    }
}

pub type SharedStore = Arc<dyn PersistenceAdapter>;

/// Convenience constructor used by `main` so swapping the backing adapter
/// later is a one-line change.
pub fn new_shared_store() -> SharedStore {
    Arc::new(InMemoryStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleType;
    use crate::scoring::score;
    use crate::types::{RiskLevel, TxnType};

    fn txn(id: &str, client: &str) -> Transaction {
        Transaction {
            txn_id: id.to_string(),
            client_id: client.to_string(),
            txn_type: TxnType::Upi,
            amount: 1000.0,
            timestamp: Some(Utc::now().timestamp_millis()),
            beneficiary_ifsc: None,
            beneficiary_account: None,
        }
    }

    #[test]
    fn result_lookup_returns_most_recent_for_same_id() {
        let store = InMemoryStore::new();
        let eval1 = score("T1", "C1", vec![], 30.0, 70.0);
        store.save_result(eval1);
        assert_eq!(store.result("T1").unwrap().client_id, "C1");
        assert!(store.result("GHOST").is_none());
        let _ = RiskLevel::Low; // used indirectly via score()
        let _ = RuleType::AmountAnomaly;
    }

    #[test]
    fn results_for_client_filters_and_limits() {
        let store = InMemoryStore::new();
        store.save_result(score("T1", "C1", vec![], 30.0, 70.0));
        store.save_result(score("T2", "C1", vec![], 30.0, 70.0));
        store.save_result(score("T3", "C2", vec![], 30.0, 70.0));
        let results = store.results_for_client("C1", 10);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn transaction_history_preserves_insertion_order() {
        let store = InMemoryStore::new();
        store.save_transaction(txn("T1", "C1"));
        store.save_transaction(txn("T2", "C1"));
        let history = store.transaction_history();
        assert_eq!(history[0].txn_id, "T1");
        assert_eq!(history[1].txn_id, "T2");
    }
}
