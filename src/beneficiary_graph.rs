// =============================================================================
// Beneficiary Graph — bidirectional client/beneficiary index
// =============================================================================
//
// Rebuilt periodically from the full transaction history and swapped in
// atomically, mirroring the regime detector's `RwLock<Option<T>>` snapshot
// swap: a partially-rebuilt index is never exposed to readers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::types::Transaction;

#[derive(Debug, Clone, Default)]
struct GraphIndex {
    beneficiary_to_clients: HashMap<String, HashSet<String>>,
    client_to_beneficiaries: HashMap<String, HashSet<String>>,
    built_at: Option<DateTime<Utc>>,
}

impl GraphIndex {
    fn build(transactions: &[Transaction]) -> Self {
        let mut beneficiary_to_clients: HashMap<String, HashSet<String>> = HashMap::new();
        let mut client_to_beneficiaries: HashMap<String, HashSet<String>> = HashMap::new();

        for txn in transactions {
            let Some(bene_key) = txn.beneficiary_key() else {
                continue;
            };
            beneficiary_to_clients
                .entry(bene_key.clone())
                .or_default()
                .insert(txn.client_id.clone());
            client_to_beneficiaries
                .entry(txn.client_id.clone())
                .or_default()
                .insert(bene_key);
        }

        Self {
            beneficiary_to_clients,
            client_to_beneficiaries,
            built_at: Some(Utc::now()),
        }
    }
}

pub struct BeneficiaryGraph {
    index: RwLock<Option<GraphIndex>>,
}

impl BeneficiaryGraph {
    pub fn new() -> Self {
        Self {
            index: RwLock::new(None),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.index.read().is_some()
    }

    /// Rebuild the index from scratch and swap it in atomically. Readers
    /// either see the fully-old or fully-new index, never a mix.
    pub fn refresh(&self, transactions: &[Transaction]) {
        let new_index = GraphIndex::build(transactions);
        *self.index.write() = Some(new_index);
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.index.read().as_ref().and_then(|i| i.built_at)
    }

    pub fn get_other_senders(&self, bene_key: &str, exclude_client_id: &str) -> HashSet<String> {
        let guard = self.index.read();
        let Some(index) = guard.as_ref() else {
            return HashSet::new();
        };
        index
            .beneficiary_to_clients
            .get(bene_key)
            .map(|set| set.iter().filter(|c| c.as_str() != exclude_client_id).cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_fan_in_count(&self, bene_key: &str) -> usize {
        let guard = self.index.read();
        guard
            .as_ref()
            .and_then(|i| i.beneficiary_to_clients.get(bene_key))
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub fn get_total_beneficiary_count(&self, client_id: &str) -> usize {
        let guard = self.index.read();
        guard
            .as_ref()
            .and_then(|i| i.client_to_beneficiaries.get(client_id))
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Count of `client_id`'s beneficiaries that are also paid by at least
    /// one other client.
    pub fn get_shared_beneficiary_count(&self, client_id: &str) -> usize {
        let guard = self.index.read();
        let Some(index) = guard.as_ref() else {
            return 0;
        };
        let Some(benes) = index.client_to_beneficiaries.get(client_id) else {
            return 0;
        };
        benes
            .iter()
            .filter(|b| {
                index
                    .beneficiary_to_clients
                    .get(*b)
                    .map(|senders| senders.iter().any(|c| c != client_id))
                    .unwrap_or(false)
            })
            .count()
    }

    /// `sharedBeneficiaries(c) / max(1, totalBeneficiaries(c))`.
    pub fn get_network_density(&self, client_id: &str) -> f64 {
        let total = self.get_total_beneficiary_count(client_id);
        let shared = self.get_shared_beneficiary_count(client_id);
        shared as f64 / total.max(1) as f64
    }
}

impl Default for BeneficiaryGraph {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedBeneficiaryGraph = Arc<BeneficiaryGraph>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxnType;

    fn txn(client: &str, ifsc: &str, account: &str) -> Transaction {
        Transaction {
            txn_id: format!("{client}-{ifsc}-{account}"),
            client_id: client.into(),
            txn_type: TxnType::Upi,
            amount: 1000.0,
            timestamp: Some(0),
            beneficiary_ifsc: Some(ifsc.into()),
            beneficiary_account: Some(account.into()),
        }
    }

    #[test]
    fn not_ready_before_first_refresh() {
        let graph = BeneficiaryGraph::new();
        assert!(!graph.is_ready());
        assert_eq!(graph.get_fan_in_count("X"), 0);
    }

    #[test]
    fn fan_in_counts_distinct_senders() {
        let graph = BeneficiaryGraph::new();
        let txns = vec![
            txn("C1", "IFSC1", "A1"),
            txn("C2", "IFSC1", "A1"),
            txn("C3", "IFSC1", "A1"),
        ];
        graph.refresh(&txns);
        assert_eq!(graph.get_fan_in_count("IFSC1:A1"), 3);
        assert_eq!(graph.get_other_senders("IFSC1:A1", "C1").len(), 2);
    }

    #[test]
    fn network_density_reflects_shared_beneficiaries() {
        let graph = BeneficiaryGraph::new();
        let txns = vec![
            txn("C1", "IFSC1", "A1"),
            txn("C2", "IFSC1", "A1"),
            txn("C1", "IFSC2", "A2"),
        ];
        graph.refresh(&txns);
        // C1 has 2 beneficiaries, 1 of which (IFSC1:A1) is shared with C2.
        assert_eq!(graph.get_total_beneficiary_count("C1"), 2);
        assert_eq!(graph.get_shared_beneficiary_count("C1"), 1);
        assert_eq!(graph.get_network_density("C1"), 0.5);
    }

    #[test]
    fn network_density_zero_with_no_beneficiaries() {
        let graph = BeneficiaryGraph::new();
        graph.refresh(&[]);
        assert_eq!(graph.get_network_density("ghost"), 0.0);
    }
}
