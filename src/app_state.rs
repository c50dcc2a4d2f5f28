// =============================================================================
// Central Application State — Transaction Risk Scoring Engine
// =============================================================================
//
// The single source of truth tying every subsystem together. All subsystems
// hold their own interior mutability (RwLock, atomics); AppState just wires
// Arc handles to each other and to the pipeline that drives a transaction
// through all of them.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking.
//   - parking_lot::RwLock inside each subsystem for its own mutable state.
//   - Arc wrappers so every background task and request handler shares the
//     same instances.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::beneficiary_graph::BeneficiaryGraph;
use crate::config::RiskEngineConfig;
use crate::live_counters::LiveCounterStore;
use crate::notifier::Notifier;
use crate::pipeline::Pipeline;
use crate::profile::store::ProfileStore;
use crate::review::queue::ReviewQueue;
use crate::review::weight_adjust::WeightChangeLog;
use crate::rule_cache::RuleCache;
use crate::rules::isolation_forest::{InMemoryModelStore, ModelStore};
use crate::rules::AnomalyRule;
use crate::silence::SilenceDetector;
use crate::store::{InMemoryStore, PersistenceAdapter};

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version counter, bumped on every meaningful
    /// mutation (config change, weight adjustment, rule edit).
    pub state_version: AtomicU64,

    pub config: Arc<RwLock<RiskEngineConfig>>,

    pub profiles: Arc<ProfileStore>,
    pub counters: Arc<LiveCounterStore>,
    pub rule_cache: Arc<RuleCache>,
    pub review_queue: Arc<ReviewQueue>,
    pub weight_log: Arc<WeightChangeLog>,
    pub beneficiary_graph: Arc<BeneficiaryGraph>,
    pub silence_detector: Arc<SilenceDetector>,
    pub model_store: Arc<dyn ModelStore>,
    pub persistence: Arc<dyn PersistenceAdapter>,
    pub notifier: Arc<Notifier>,

    pub pipeline: Pipeline,

    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: RiskEngineConfig, initial_rules: Vec<AnomalyRule>) -> Self {
        let profiles = Arc::new(ProfileStore::new());
        let counters = Arc::new(LiveCounterStore::new());
        let rule_cache = Arc::new(RuleCache::new(initial_rules));
        let review_queue = Arc::new(ReviewQueue::new());
        let weight_log = Arc::new(WeightChangeLog::new());
        let beneficiary_graph = Arc::new(BeneficiaryGraph::new());
        let silence_detector = Arc::new(SilenceDetector::new());
        let model_store: Arc<dyn ModelStore> = Arc::new(InMemoryModelStore::new());
        let persistence: Arc<dyn PersistenceAdapter> = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(Notifier::logging());
        let config = Arc::new(RwLock::new(config));

        let pipeline = Pipeline {
            profiles: profiles.clone(),
            counters: counters.clone(),
            rule_cache: rule_cache.clone(),
            review_queue: review_queue.clone(),
            model_store: model_store.clone(),
            persistence: persistence.clone(),
            notifier: notifier.clone(),
            config: config.clone(),
        };

        Self {
            state_version: AtomicU64::new(1),
            config,
            profiles,
            counters,
            rule_cache,
            review_queue,
            weight_log,
            beneficiary_graph,
            silence_detector,
            model_store,
            persistence,
            notifier,
            pipeline,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::Relaxed)
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_increments_monotonically() {
        let state = AppState::new(RiskEngineConfig::default(), Vec::new());
        let v1 = state.current_state_version();
        let v2 = state.increment_version();
        assert_eq!(v2, v1 + 1);
        assert_eq!(state.current_state_version(), v2);
    }
}
