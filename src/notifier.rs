// =============================================================================
// Notifier — fire-and-forget BLOCK notification
// =============================================================================
//
// Shaped after the REST client's reqwest usage: a thin `reqwest::Client`
// wrapper with a timeout and `#[instrument]` logging. Unlike a signed
// exchange request, a notification failure must never propagate back into
// the evaluation pipeline — it is logged and swallowed. Dispatch is a plain
// enum rather than a trait object, since the only variants are "log it" and
// "POST it to a webhook".

use serde::Serialize;
use tracing::{instrument, warn};

#[derive(Debug, Clone, Serialize)]
pub struct BlockNotification<'a> {
    pub txn_id: &'a str,
    pub client_id: &'a str,
    pub composite_score: f64,
    pub triggered_rule_ids: &'a [String],
}

pub enum Notifier {
    /// Logs the block at `warn` level. Used when no external alerting
    /// endpoint is configured.
    Logging,
    Webhook { url: String, client: reqwest::Client },
}

impl Notifier {
    pub fn logging() -> Self {
        Self::Logging
    }

    pub fn webhook(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("failed to build reqwest client");
        Self::Webhook { url: url.into(), client }
    }

    #[instrument(skip(self, notification), fields(txn_id = notification.txn_id))]
    pub async fn notify_block(&self, notification: BlockNotification<'_>) {
        match self {
            Self::Logging => {
                warn!(
                    txn_id = notification.txn_id,
                    client_id = notification.client_id,
                    composite_score = notification.composite_score,
                    rule_ids = ?notification.triggered_rule_ids,
                    "transaction blocked"
                );
            }
            Self::Webhook { url, client } => {
                if let Err(err) = client.post(url).json(&notification).send().await {
                    warn!(error = %err, url = %url, "block notification webhook failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logging_notifier_does_not_panic() {
        let notifier = Notifier::logging();
        let rule_ids = vec!["R1".to_string()];
        notifier
            .notify_block(BlockNotification {
                txn_id: "T1",
                client_id: "C1",
                composite_score: 95.0,
                triggered_rule_ids: &rule_ids,
            })
            .await;
    }
}
