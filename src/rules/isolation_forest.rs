// =============================================================================
// Isolation Forest Evaluator — per-client ML anomaly detector
// =============================================================================
//
// Models are trained offline and loaded; this module never trains in the
// request path (per the non-goal that this isn't a training pipeline). The
// tree-building and scoring routines below exist so tests, and any offline
// batch-retraining job, can produce a model in the same format this module
// reads.

use std::collections::HashMap;

use anyhow::Result;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{resolve_variance_pct, RuleDefaults};
use crate::live_counters::CounterSnapshot;
use crate::profile::ClientProfile;
use crate::rules::{AnomalyRule, RuleContext, RuleResult};
use crate::types::Transaction;

const FEATURE_NAMES: [&str; 6] = [
    "amount_z",
    "inverse_type_frequency",
    "hourly_tps_ratio",
    "hourly_amount_ratio",
    "type_amount_z",
    "hour_of_day_norm",
];

/// Deterministically ordered 6-feature vector per §4.5. A neutral value (0
/// or 1, matching what a "no anomaly" reading would produce) is substituted
/// whenever the natural denominator is zero.
pub fn extract_features(txn: &Transaction, profile: &ClientProfile, counters: &CounterSnapshot) -> [f64; 6] {
    let amount_z = if profile.total_txn_count >= 2 {
        profile.amount_welford.zscore(txn.amount, 1.0)
    } else {
        0.0
    };

    let type_freq = profile.type_frequency(txn.txn_type);
    let inverse_type_frequency = 1.0 - type_freq;

    let ewma_tps = profile.ewma_hourly_tps.value();
    let hourly_tps_ratio = if ewma_tps > 0.0 {
        counters.current_hourly_txn_count as f64 / ewma_tps
    } else {
        1.0
    };

    let ewma_hourly_amount = profile.ewma_hourly_amount.value();
    let hourly_amount_ratio = if ewma_hourly_amount > 0.0 {
        counters.current_hourly_amount / ewma_hourly_amount
    } else {
        1.0
    };

    let type_amount_z = match profile.avg_amount_by_type.get(&txn.txn_type) {
        Some(ewma) if profile.amount_count_by_type.get(&txn.txn_type).copied().unwrap_or(0) >= 2 => {
            let floor = 1.0;
            (txn.amount - ewma.value()) / floor
        }
        _ => 0.0,
    };

    let hour_of_day_norm = {
        let hour_key = crate::profile::model::hour_of_day_key(txn.effective_timestamp_ms());
        hour_key.parse::<f64>().unwrap_or(0.0) / 24.0
    };

    [
        amount_z,
        inverse_type_frequency,
        hourly_tps_ratio,
        hourly_amount_ratio,
        type_amount_z,
        hour_of_day_norm,
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum IsolationNode {
    #[serde(rename = "i")]
    Internal {
        #[serde(rename = "f")]
        split_feature: usize,
        #[serde(rename = "v")]
        split_value: f64,
        #[serde(rename = "l")]
        left: Box<IsolationNode>,
        #[serde(rename = "r")]
        right: Box<IsolationNode>,
    },
    #[serde(rename = "e")]
    Leaf {
        #[serde(rename = "s")]
        size: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationTree {
    pub root: IsolationNode,
}

impl IsolationTree {
    /// Path length to isolate `x`, including the average path-length
    /// correction for the sample count held at the leaf reached.
    pub fn path_length(&self, x: &[f64]) -> f64 {
        Self::path_length_rec(&self.root, x, 0)
    }

    fn path_length_rec(node: &IsolationNode, x: &[f64], depth: u32) -> f64 {
        match node {
            IsolationNode::Leaf { size } => depth as f64 + c_factor(*size as f64),
            IsolationNode::Internal {
                split_feature,
                split_value,
                left,
                right,
            } => {
                if x[*split_feature] < *split_value {
                    Self::path_length_rec(left, x, depth + 1)
                } else {
                    Self::path_length_rec(right, x, depth + 1)
                }
            }
        }
    }

    fn build(data: &[Vec<f64>], depth: u32, max_depth: u32, rng: &mut impl Rng) -> IsolationNode {
        if data.len() <= 1 || depth >= max_depth {
            return IsolationNode::Leaf { size: data.len() };
        }

        let num_features = data[0].len();
        let feature = rng.gen_range(0..num_features);

        let (min_v, max_v) = data.iter().fold((f64::MAX, f64::MIN), |(lo, hi), row| {
            (lo.min(row[feature]), hi.max(row[feature]))
        });
        if (max_v - min_v).abs() < f64::EPSILON {
            return IsolationNode::Leaf { size: data.len() };
        }
        let split_value = rng.gen_range(min_v..max_v);

        let (left, right): (Vec<Vec<f64>>, Vec<Vec<f64>>) =
            data.iter().cloned().partition(|row| row[feature] < split_value);

        if left.is_empty() || right.is_empty() {
            return IsolationNode::Leaf { size: data.len() };
        }

        IsolationNode::Internal {
            split_feature: feature,
            split_value,
            left: Box::new(Self::build(&left, depth + 1, max_depth, rng)),
            right: Box::new(Self::build(&right, depth + 1, max_depth, rng)),
        }
    }
}

/// `c(n)` — average path length of an unsuccessful BST search, used to
/// normalise path length into the `(0,1]` anomaly score.
fn c_factor(n: f64) -> f64 {
    if n <= 1.0 {
        0.0
    } else if n == 2.0 {
        1.0
    } else {
        2.0 * ((n - 1.0).ln() + 0.5772156649) - 2.0 * (n - 1.0) / n
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    pub client_id: String,
    pub trees: Vec<IsolationTree>,
    pub sample_size: usize,
}

impl IsolationForest {
    /// Train a new forest from `data`, offline. Never called from the
    /// request path.
    pub fn train(client_id: impl Into<String>, data: &[Vec<f64>], num_trees: usize, sample_size: usize) -> Self {
        let mut rng = rand::thread_rng();
        let n = data.len().min(sample_size).max(1);
        let max_depth = (n as f64).log2().ceil() as u32;

        let trees = (0..num_trees)
            .map(|_| {
                let mut indices: Vec<usize> = (0..data.len()).collect();
                indices.shuffle(&mut rng);
                let sample: Vec<Vec<f64>> = indices.into_iter().take(n).map(|i| data[i].clone()).collect();
                IsolationTree {
                    root: IsolationTree::build(&sample, 0, max_depth, &mut rng),
                }
            })
            .collect();

        Self {
            client_id: client_id.into(),
            trees,
            sample_size: n,
        }
    }

    /// `s(x) = 2^(-E[h(x)]/c(sampleSize))`, in `(0,1]`. `None` when the
    /// forest has no trees — there is no in-range score to report.
    pub fn anomaly_score(&self, x: &[f64]) -> Option<f64> {
        if self.trees.is_empty() {
            return None;
        }
        let avg_path: f64 = self.trees.iter().map(|t| t.path_length(x)).sum::<f64>() / self.trees.len() as f64;
        let c = c_factor(self.sample_size as f64);
        if c <= 0.0 {
            return Some(1.0);
        }
        Some(2f64.powf(-avg_path / c))
    }

    /// Top-3 contributing features: replace each feature with its
    /// client-mean and measure the score drop.
    pub fn feature_contributions(&self, x: &[f64], client_means: &[f64]) -> Vec<(usize, f64)> {
        let Some(base_score) = self.anomaly_score(x) else {
            return Vec::new();
        };
        let mut contributions: Vec<(usize, f64)> = (0..x.len())
            .map(|i| {
                let mut perturbed = x.to_vec();
                perturbed[i] = client_means.get(i).copied().unwrap_or(x[i]);
                let score = self.anomaly_score(&perturbed).unwrap_or(base_score);
                (i, (base_score - score).max(0.0))
            })
            .collect();
        contributions.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        contributions.truncate(3);
        contributions
    }
}

/// `load(clientId) → IsolationForest | absent`. Models are trained and
/// uploaded externally; this store never trains on the hot path.
pub trait ModelStore: Send + Sync {
    fn load(&self, client_id: &str) -> Option<IsolationForest>;
    fn store(&self, forest: IsolationForest);
}

#[derive(Default)]
pub struct InMemoryModelStore {
    models: parking_lot::RwLock<HashMap<String, IsolationForest>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelStore for InMemoryModelStore {
    fn load(&self, client_id: &str) -> Option<IsolationForest> {
        self.models.read().get(client_id).cloned()
    }

    fn store(&self, forest: IsolationForest) {
        self.models.write().insert(forest.client_id.clone(), forest);
    }
}

pub fn evaluate(
    txn: &Transaction,
    profile: &ClientProfile,
    ctx: &RuleContext,
    rule: &AnomalyRule,
    defaults: &RuleDefaults,
    forest: &IsolationForest,
) -> Result<RuleResult> {
    let features = extract_features(txn, profile, ctx.counters);
    let Some(score) = forest.anomaly_score(&features) else {
        return Ok(RuleResult::not_triggered(rule, "isolation forest has no trees; skipping"));
    };

    let v = resolve_variance_pct(rule.variance_pct, defaults.if_variance_pct);
    let threshold = (v / 100.0).clamp(0.0, 0.999);

    if score <= threshold {
        return Ok(RuleResult::not_triggered(
            rule,
            format!("anomaly score {score:.4} within threshold {threshold:.4}"),
        ));
    }

    let client_means = [
        0.0,
        1.0 - profile.type_frequency(txn.txn_type),
        1.0,
        1.0,
        0.0,
        features[5],
    ];
    let contributions = forest.feature_contributions(&features, &client_means);
    let reason_detail: Vec<String> = contributions
        .iter()
        .map(|(i, delta)| format!("{}={:.3} (Δ{:.3})", FEATURE_NAMES[*i], features[*i], delta))
        .collect();

    let partial = (100.0 * (score - threshold) / (1.0 - threshold)).clamp(0.0, 100.0);
    Ok(RuleResult::triggered(
        rule,
        partial,
        format!(
            "isolation forest score {score:.4} exceeds threshold {threshold:.4}; top features: {}",
            reason_detail.join(", ")
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_forest() -> IsolationForest {
        let mut data = Vec::new();
        for i in 0..200 {
            data.push(vec![
                (i % 10) as f64 * 0.1,
                0.1,
                1.0,
                1.0,
                0.0,
                (i % 24) as f64 / 24.0,
            ]);
        }
        IsolationForest::train("C1", &data, 50, 64)
    }

    #[test]
    fn anomaly_score_is_in_unit_interval() {
        let forest = synthetic_forest();
        for x in [
            vec![0.0, 0.1, 1.0, 1.0, 0.0, 0.1],
            vec![50.0, 0.9, 10.0, 12.0, 5.0, 0.9],
        ] {
            let s = forest.anomaly_score(&x).expect("trained forest always scores");
            assert!(s > 0.0 && s <= 1.0, "score {s} out of (0,1]");
        }
    }

    #[test]
    fn outlier_scores_higher_than_inlier() {
        let forest = synthetic_forest();
        let inlier = vec![0.3, 0.1, 1.0, 1.0, 0.0, 0.2];
        let outlier = vec![500.0, 0.99, 80.0, 90.0, 400.0, 0.99];
        assert!(forest.anomaly_score(&outlier) >= forest.anomaly_score(&inlier));
    }

    #[test]
    fn anomaly_score_is_none_for_untrained_forest() {
        let forest = IsolationForest {
            client_id: "C1".into(),
            trees: Vec::new(),
            sample_size: 0,
        };
        assert!(forest.anomaly_score(&[0.0; 6]).is_none());
    }

    #[test]
    fn tree_serialization_roundtrips_path_length() {
        let forest = synthetic_forest();
        let tree = &forest.trees[0];
        let json = serde_json::to_string(tree).unwrap();
        let restored: IsolationTree = serde_json::from_str(&json).unwrap();
        let x = vec![0.3, 0.1, 1.0, 1.0, 0.0, 0.2];
        assert_eq!(tree.path_length(&x), restored.path_length(&x));
    }

    #[test]
    fn c_factor_matches_known_values() {
        assert_eq!(c_factor(1.0), 0.0);
        assert_eq!(c_factor(2.0), 1.0);
        assert!(c_factor(256.0) > 0.0);
    }

    #[test]
    fn model_store_roundtrips() {
        let store = InMemoryModelStore::new();
        assert!(store.load("C1").is_none());
        store.store(synthetic_forest());
        assert!(store.load("C1").is_some());
    }
}
