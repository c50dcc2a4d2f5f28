// =============================================================================
// Review Queue — pending/terminal feedback state machine
// =============================================================================
//
// Life-cycle: PENDING -> {TRUE_POSITIVE, FALSE_POSITIVE, AUTO_ACCEPTED}.
// Once terminal, an item never transitions again. Mirrors the position
// manager's two-list shape, but a single `Vec` is enough here since items
// are looked up by id far more often than partitioned by state.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::types::{Action, RiskLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedbackStatus {
    Pending,
    TruePositive,
    FalsePositive,
    AutoAccepted,
}

impl FeedbackStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for FeedbackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::TruePositive => write!(f, "TRUE_POSITIVE"),
            Self::FalsePositive => write!(f, "FALSE_POSITIVE"),
            Self::AutoAccepted => write!(f, "AUTO_ACCEPTED"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewQueueItem {
    pub txn_id: String,
    pub client_id: String,
    pub action: Action,
    pub composite_score: f64,
    pub risk_level: RiskLevel,
    pub triggered_rule_ids: Vec<String>,
    pub enqueued_at: DateTime<Utc>,
    pub feedback_status: FeedbackStatus,
    pub feedback_at: Option<DateTime<Utc>>,
    pub feedback_by: Option<String>,
    pub auto_accept_deadline: DateTime<Utc>,
}

impl ReviewQueueItem {
    pub fn new(
        txn_id: impl Into<String>,
        client_id: impl Into<String>,
        action: Action,
        composite_score: f64,
        risk_level: RiskLevel,
        triggered_rule_ids: Vec<String>,
        auto_accept_timeout_secs: i64,
    ) -> Self {
        let enqueued_at = Utc::now();
        Self {
            txn_id: txn_id.into(),
            client_id: client_id.into(),
            action,
            composite_score,
            risk_level,
            triggered_rule_ids,
            enqueued_at,
            feedback_status: FeedbackStatus::Pending,
            feedback_at: None,
            feedback_by: None,
            auto_accept_deadline: enqueued_at + Duration::seconds(auto_accept_timeout_secs),
        }
    }
}

#[derive(Default)]
pub struct ReviewQueue {
    items: RwLock<Vec<ReviewQueueItem>>,
}

impl ReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an ALERT/BLOCK evaluation result. PASS actions never reach
    /// this method — the pipeline only calls it for the two actions that
    /// require human review.
    pub fn enqueue(&self, item: ReviewQueueItem) {
        info!(txn_id = %item.txn_id, client_id = %item.client_id, action = %item.action, "enqueued for review");
        self.items.write().push(item);
    }

    pub fn get(&self, txn_id: &str) -> Option<ReviewQueueItem> {
        self.items.read().iter().find(|i| i.txn_id == txn_id).cloned()
    }

    /// `submitFeedback`. Idempotent on terminal states — a second call
    /// against an already-resolved item is a no-op that returns the current
    /// item rather than erroring.
    pub fn submit_feedback(
        &self,
        txn_id: &str,
        status: FeedbackStatus,
        by: impl Into<String>,
    ) -> EngineResult<ReviewQueueItem> {
        if matches!(status, FeedbackStatus::Pending | FeedbackStatus::AutoAccepted) {
            return Err(EngineError::InvalidTransaction(format!(
                "feedback status must be TRUE_POSITIVE or FALSE_POSITIVE, got {status}"
            )));
        }

        let mut items = self.items.write();
        let item = items
            .iter_mut()
            .find(|i| i.txn_id == txn_id)
            .ok_or_else(|| EngineError::ReviewItemNotFound(txn_id.to_string()))?;

        if item.feedback_status.is_terminal() {
            return Ok(item.clone());
        }

        item.feedback_status = status;
        item.feedback_at = Some(Utc::now());
        item.feedback_by = Some(by.into());
        Ok(item.clone())
    }

    /// Bulk feedback: applies `submit_feedback` to each id independently;
    /// one failing id does not abort the rest of the batch.
    pub fn submit_bulk_feedback(
        &self,
        txn_ids: &[String],
        status: FeedbackStatus,
        by: &str,
    ) -> (usize, usize) {
        let requested = txn_ids.len();
        let mut updated = 0;
        for txn_id in txn_ids {
            match self.submit_feedback(txn_id, status, by) {
                Ok(_) => updated += 1,
                Err(err) => warn!(txn_id = %txn_id, error = %err, "bulk feedback item failed"),
            }
        }
        (requested, updated)
    }

    /// Periodic auto-accept sweep: every PENDING item whose deadline has
    /// passed transitions to AUTO_ACCEPTED. Returns the count transitioned.
    pub fn auto_accept_sweep(&self, now: DateTime<Utc>) -> usize {
        let mut items = self.items.write();
        let mut count = 0;
        for item in items.iter_mut() {
            if item.feedback_status == FeedbackStatus::Pending && item.auto_accept_deadline <= now {
                item.feedback_status = FeedbackStatus::AutoAccepted;
                item.feedback_at = Some(now);
                count += 1;
            }
        }
        if count > 0 {
            info!(count, "auto-accept sweep transitioned pending items");
        }
        count
    }

    pub fn terminal_items_since(&self, since: DateTime<Utc>) -> Vec<ReviewQueueItem> {
        self.items
            .read()
            .iter()
            .filter(|i| i.feedback_status.is_terminal() && i.feedback_at.map(|t| t >= since).unwrap_or(false))
            .cloned()
            .collect()
    }

    pub fn list(
        &self,
        client_id: Option<&str>,
        action: Option<Action>,
        status: Option<FeedbackStatus>,
        limit: usize,
    ) -> Vec<ReviewQueueItem> {
        self.items
            .read()
            .iter()
            .filter(|i| client_id.map(|c| i.client_id == c).unwrap_or(true))
            .filter(|i| action.map(|a| i.action == a).unwrap_or(true))
            .filter(|i| status.map(|s| i.feedback_status == s).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(txn_id: &str, timeout_secs: i64) -> ReviewQueueItem {
        ReviewQueueItem::new(
            txn_id,
            "C1",
            Action::Alert,
            55.0,
            RiskLevel::Medium,
            vec!["R1".into()],
            timeout_secs,
        )
    }

    #[test]
    fn submit_feedback_rejects_pending_and_auto_accepted_as_input() {
        let q = ReviewQueue::new();
        q.enqueue(item("T1", 3600));
        assert!(q.submit_feedback("T1", FeedbackStatus::Pending, "op").is_err());
        assert!(q.submit_feedback("T1", FeedbackStatus::AutoAccepted, "op").is_err());
    }

    #[test]
    fn submit_feedback_is_idempotent_on_terminal_state() {
        let q = ReviewQueue::new();
        q.enqueue(item("T1", 3600));
        let first = q.submit_feedback("T1", FeedbackStatus::TruePositive, "op1").unwrap();
        let second = q.submit_feedback("T1", FeedbackStatus::FalsePositive, "op2").unwrap();
        assert_eq!(first.feedback_status, FeedbackStatus::TruePositive);
        assert_eq!(second.feedback_status, FeedbackStatus::TruePositive);
        assert_eq!(second.feedback_by.as_deref(), Some("op1"));
    }

    #[test]
    fn bulk_feedback_partial_failure_does_not_abort_batch() {
        let q = ReviewQueue::new();
        q.enqueue(item("T1", 3600));
        let ids = vec!["T1".to_string(), "GHOST".to_string()];
        let (requested, updated) = q.submit_bulk_feedback(&ids, FeedbackStatus::TruePositive, "op");
        assert_eq!(requested, 2);
        assert_eq!(updated, 1);
    }

    #[test]
    fn auto_accept_sweep_matches_scenario_4() {
        let q = ReviewQueue::new();
        let t0 = Utc::now();
        let mut it = item("T1", 3600);
        it.enqueued_at = t0;
        it.auto_accept_deadline = t0 + Duration::seconds(3600);
        q.enqueue(it);
        let before_deadline = q.auto_accept_sweep(t0 + Duration::seconds(3599));
        assert_eq!(before_deadline, 0);
        let at_t3601 = q.auto_accept_sweep(t0 + Duration::seconds(3601));
        assert_eq!(at_t3601, 1);
        assert_eq!(q.get("T1").unwrap().feedback_status, FeedbackStatus::AutoAccepted);
    }

    #[test]
    fn terminal_state_never_transitions_again() {
        let q = ReviewQueue::new();
        q.enqueue(item("T1", 0));
        q.auto_accept_sweep(Utc::now());
        assert_eq!(q.get("T1").unwrap().feedback_status, FeedbackStatus::AutoAccepted);
        let result = q.submit_feedback("T1", FeedbackStatus::TruePositive, "op");
        assert_eq!(result.unwrap().feedback_status, FeedbackStatus::AutoAccepted);
    }
}
