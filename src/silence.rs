// =============================================================================
// Silence Detector — flags clients that have gone quiet
// =============================================================================
//
// Runs as a periodic background task, the same shape as the exit monitor's
// tick loop: wake on an interval, sweep every client profile, compare actual
// inter-transaction gap against an EWMA-derived expectation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::SilenceConfig;
use crate::profile::store::ProfileStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilenceAlert {
    pub client_id: String,
    pub expected_gap_secs: f64,
    pub actual_gap_secs: f64,
    pub silence_multiplier: f64,
    pub last_updated_ms: i64,
}

/// Tracks which clients currently have an open silence alert, so a resumed
/// client is reported exactly once (as a resume) rather than re-alerting
/// every sweep.
#[derive(Default)]
pub struct SilenceDetector {
    alerted: RwLock<HashSet<String>>,
}

impl SilenceDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_alerted(&self, client_id: &str) -> bool {
        self.alerted.read().contains(client_id)
    }

    pub fn alerted_clients(&self) -> Vec<String> {
        self.alerted.read().iter().cloned().collect()
    }

    /// One sweep over every known client profile. Returns the clients that
    /// newly crossed into silence this sweep (already-alerted clients are
    /// not repeated) and separately updates resumed clients out of the
    /// alerted set.
    pub fn sweep(
        &self,
        profiles: &ProfileStore,
        config: &SilenceConfig,
        now: DateTime<Utc>,
    ) -> Vec<SilenceAlert> {
        if !config.enabled {
            return Vec::new();
        }
        let now_ms = now.timestamp_millis();
        let mut new_alerts = Vec::new();
        let mut resumed = Vec::new();

        for client_id in profiles.client_ids() {
            let Some(profile) = profiles.get(&client_id) else {
                continue;
            };

            if (profile.completed_hours_count as f64) < config.min_completed_hours as f64 {
                continue;
            }

            let tps = profile.ewma_hourly_tps.value();
            if tps < config.min_expected_tps {
                continue;
            }

            let expected_gap_secs = 3600.0 / tps;
            let actual_gap_secs = ((now_ms - profile.last_updated_ms).max(0) as f64) / 1000.0;
            let threshold = config.silence_multiplier * expected_gap_secs;

            let currently_alerted = self.alerted.read().contains(&client_id);

            if actual_gap_secs > threshold {
                if !currently_alerted {
                    self.alerted.write().insert(client_id.clone());
                    new_alerts.push(SilenceAlert {
                        client_id: client_id.clone(),
                        expected_gap_secs,
                        actual_gap_secs,
                        silence_multiplier: config.silence_multiplier,
                        last_updated_ms: profile.last_updated_ms,
                    });
                }
            } else if currently_alerted {
                self.alerted.write().remove(&client_id);
                resumed.push(client_id);
            }
        }

        if !new_alerts.is_empty() {
            info!(count = new_alerts.len(), "silence sweep raised new alerts");
        }
        if !resumed.is_empty() {
            info!(?resumed, "silence sweep cleared resumed clients");
        }

        new_alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::model::ClientProfile;

    fn config() -> SilenceConfig {
        SilenceConfig {
            enabled: true,
            check_interval_minutes: 5,
            silence_multiplier: 3.0,
            min_expected_tps: 0.01,
            min_completed_hours: 48,
        }
    }

    #[test]
    fn disabled_config_never_alerts() {
        let detector = SilenceDetector::new();
        let profiles = ProfileStore::new();
        let mut cfg = config();
        cfg.enabled = false;
        let alerts = detector.sweep(&profiles, &cfg, Utc::now());
        assert!(alerts.is_empty());
    }

    #[test]
    fn silence_alert_matches_scenario_6() {
        let detector = SilenceDetector::new();
        let profiles = ProfileStore::new();
        let now = Utc::now();

        let mut profile = ClientProfile::new("C1", 0.01, now.timestamp_millis());
        profile.completed_hours_count = 100;
        profile.ewma_hourly_tps.update(6.0); // expectedGap = 3600/6 = 600s
        profile.last_updated_ms = now.timestamp_millis() - 2_400_000; // 2400s ago
        profiles.put(profile);

        let alerts = detector.sweep(&profiles, &config(), now);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].client_id, "C1");
        assert!((alerts[0].expected_gap_secs - 600.0).abs() < 1e-6);
        assert!(detector.is_alerted("C1"));
    }

    #[test]
    fn resumed_client_clears_alert_without_rereporting() {
        let detector = SilenceDetector::new();
        let profiles = ProfileStore::new();
        let now = Utc::now();

        let mut profile = ClientProfile::new("C1", 0.01, now.timestamp_millis());
        profile.completed_hours_count = 100;
        profile.ewma_hourly_tps.update(6.0);
        profile.last_updated_ms = now.timestamp_millis() - 2_400_000;
        profiles.put(profile);

        let first = detector.sweep(&profiles, &config(), now);
        assert_eq!(first.len(), 1);

        let mut resumed_profile = profiles.get("C1").unwrap();
        resumed_profile.last_updated_ms = now.timestamp_millis();
        profiles.put(resumed_profile);

        let second = detector.sweep(&profiles, &config(), now);
        assert!(second.is_empty());
        assert!(!detector.is_alerted("C1"));
    }

    #[test]
    fn below_min_completed_hours_never_alerts() {
        let detector = SilenceDetector::new();
        let profiles = ProfileStore::new();
        let now = Utc::now();

        let mut profile = ClientProfile::new("C1", 0.01, now.timestamp_millis());
        profile.completed_hours_count = 1;
        profile.ewma_hourly_tps.update(6.0);
        profile.last_updated_ms = now.timestamp_millis() - 10_000_000;
        profiles.put(profile);

        let alerts = detector.sweep(&profiles, &config(), now);
        assert!(alerts.is_empty());
    }
}
