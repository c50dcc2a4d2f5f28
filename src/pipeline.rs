// =============================================================================
// Evaluation Pipeline — per-transaction orchestration
// =============================================================================
//
// ingress -> validate -> load profile -> snapshot live counters -> dispatch
// rule set -> score -> persist result -> update profile -> update live
// counters -> enqueue for review (if ALERT/BLOCK) -> notify (if BLOCK).
//
// A client below the grace-period threshold (`total_txn_count <
// min_profile_txns`) skips rule dispatch entirely and always scores PASS,
// but its profile and counters still update — the engine is always learning,
// even while it withholds judgment.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::config::RiskEngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::live_counters::LiveCounterStore;
use crate::notifier::{BlockNotification, Notifier};
use crate::profile::store::ProfileStore;
use crate::review::queue::{ReviewQueue, ReviewQueueItem};
use crate::rule_cache::RuleCache;
use crate::rules::isolation_forest::ModelStore;
use crate::rules::{evaluate_all, RuleContext};
use crate::scoring::{score, EvaluationResult};
use crate::store::PersistenceAdapter;
use crate::types::{Action, Transaction};

pub struct Pipeline {
    pub profiles: Arc<ProfileStore>,
    pub counters: Arc<LiveCounterStore>,
    pub rule_cache: Arc<RuleCache>,
    pub review_queue: Arc<ReviewQueue>,
    pub model_store: Arc<dyn ModelStore>,
    pub persistence: Arc<dyn PersistenceAdapter>,
    pub notifier: Arc<Notifier>,
    /// Shared with `AppState.config` — the same lock, not a frozen copy, so a
    /// config update reaches the evaluation path immediately.
    pub config: Arc<RwLock<RiskEngineConfig>>,
}

impl Pipeline {
    fn validate(&self, txn: &Transaction) -> EngineResult<()> {
        if txn.txn_id.trim().is_empty() {
            return Err(EngineError::InvalidTransaction("txnId must not be empty".into()));
        }
        if txn.client_id.trim().is_empty() {
            return Err(EngineError::InvalidTransaction("clientId must not be empty".into()));
        }
        if !txn.amount.is_finite() || txn.amount < 0.0 {
            return Err(EngineError::InvalidTransaction(format!(
                "amount must be a non-negative finite number, got {}",
                txn.amount
            )));
        }
        Ok(())
    }

    pub async fn evaluate(&self, txn: Transaction) -> EngineResult<EvaluationResult> {
        self.validate(&txn)?;

        // Snapshot the config once per evaluation so every step below sees a
        // consistent view even if a concurrent request updates it mid-flight.
        let config = self.config.read().clone();

        let now_ms = txn.effective_timestamp_ms();
        let bene_key = txn.beneficiary_key();

        let mut profile = self.profiles.get_or_create(&txn.client_id, config.ewma_alpha);

        let rule_results = if profile.total_txn_count < config.min_profile_txns {
            Vec::new()
        } else {
            let counters = self
                .counters
                .snapshot(&txn.client_id, bene_key.as_deref(), now_ms);
            let ctx = RuleContext {
                counters: &counters,
                current_beneficiary_key: bene_key.as_deref(),
                now_ms,
            };
            let active_rules = self.rule_cache.active_rules();
            let forest = self.model_store.load(&txn.client_id);
            evaluate_all(
                &txn,
                &profile,
                &ctx,
                &config.rule_defaults,
                &active_rules,
                forest.as_ref(),
            )
        };

        let evaluation = score(
            &txn.txn_id,
            &txn.client_id,
            rule_results,
            config.alert_threshold,
            config.block_threshold,
        );

        self.persistence.save_result(evaluation.clone());
        self.persistence.save_transaction(txn.clone());

        let is_new_beneficiary = bene_key
            .as_deref()
            .map(|k| !profile.beneficiary_stats.contains_key(k))
            .unwrap_or(false);

        let close = self.counters.record(
            &txn.client_id,
            bene_key.as_deref(),
            txn.amount,
            now_ms,
            is_new_beneficiary,
        );

        profile.update(
            &txn,
            close.closed_hour_tps,
            close.closed_hour_amount,
            close.closed_day_amount,
            close.closed_day_new_beneficiaries,
        );
        self.profiles.put(profile);

        if matches!(evaluation.action, Action::Alert | Action::Block) {
            let triggered_rule_ids: Vec<String> = evaluation
                .rule_results
                .iter()
                .filter(|r| r.triggered)
                .map(|r| r.rule_id.clone())
                .collect();
            self.review_queue.enqueue(ReviewQueueItem::new(
                evaluation.txn_id.clone(),
                evaluation.client_id.clone(),
                evaluation.action,
                evaluation.composite_score,
                evaluation.risk_level,
                triggered_rule_ids.clone(),
                config.feedback.auto_accept_timeout_secs,
            ));

            if evaluation.action == Action::Block {
                self.notifier
                    .notify_block(BlockNotification {
                        txn_id: &evaluation.txn_id,
                        client_id: &evaluation.client_id,
                        composite_score: evaluation.composite_score,
                        triggered_rule_ids: &triggered_rule_ids,
                    })
                    .await;
            }
        }

        info!(
            txn_id = %evaluation.txn_id,
            client_id = %evaluation.client_id,
            composite_score = evaluation.composite_score,
            action = %evaluation.action,
            "transaction evaluated"
        );

        Ok(evaluation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskEngineConfig;
    use crate::rules::isolation_forest::InMemoryModelStore;
    use crate::store::InMemoryStore;
    use crate::types::TxnType;

    fn pipeline() -> Pipeline {
        Pipeline {
            profiles: Arc::new(ProfileStore::new()),
            counters: Arc::new(LiveCounterStore::new()),
            rule_cache: Arc::new(RuleCache::new(Vec::new())),
            review_queue: Arc::new(ReviewQueue::new()),
            model_store: Arc::new(InMemoryModelStore::new()),
            persistence: Arc::new(InMemoryStore::new()),
            notifier: Arc::new(Notifier::logging()),
            config: Arc::new(RwLock::new(RiskEngineConfig::default())),
        }
    }

    fn txn(id: &str, client: &str, amount: f64) -> Transaction {
        Transaction {
            txn_id: id.into(),
            client_id: client.into(),
            txn_type: TxnType::Upi,
            amount,
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
            beneficiary_ifsc: None,
            beneficiary_account: None,
        }
    }

    #[tokio::test]
    async fn grace_period_client_always_passes_with_no_rule_results() {
        let pipeline = pipeline();
        let result = pipeline.evaluate(txn("T1", "NEW-CLIENT", 5000.0)).await.unwrap();
        assert_eq!(result.action, Action::Pass);
        assert!(result.rule_results.is_empty());
        let profile = pipeline.profiles.get("NEW-CLIENT").unwrap();
        assert_eq!(profile.total_txn_count, 1);
    }

    #[tokio::test]
    async fn invalid_amount_is_rejected() {
        let pipeline = pipeline();
        let result = pipeline.evaluate(txn("T1", "C1", -5.0)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn profile_updates_even_when_rules_not_dispatched() {
        let pipeline = pipeline();
        for i in 0..3 {
            pipeline
                .evaluate(txn(&format!("T{i}"), "C1", 1000.0))
                .await
                .unwrap();
        }
        let profile = pipeline.profiles.get("C1").unwrap();
        assert_eq!(profile.total_txn_count, 3);
    }
}
