//! Isolation forest anomaly filter (Stage 1)

use crate::error::Result;
use crate::feature_extractor::{check_schema, FeatureVector, FEATURE_NAMES};
use crate::models::tree::{DecisionTree, Node, SplitRule};
use crate::models::AnomalyScorer;
use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Label for an inlier.
pub const INLIER: i32 = 1;
/// Label for an outlier.
pub const OUTLIER: i32 = -1;

/// Offset used when the forest was fitted with `contamination = "auto"`.
fn default_offset() -> f64 {
    -0.5
}

#[derive(Debug, Deserialize)]
struct IsolationForestFile {
    feature_names: Vec<String>,
    max_samples: usize,
    #[serde(default = "default_offset")]
    offset: f64,
    trees: Vec<IsolationNodeSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IsolationNodeSpec {
    Split {
        feature: String,
        threshold: f64,
        left: Box<IsolationNodeSpec>,
        right: Box<IsolationNodeSpec>,
    },
    Leaf {
        size: usize,
    },
}

/// Average path length of an unsuccessful BST search among `n` points.
pub fn average_path_length(n: f64) -> f64 {
    if n <= 1.0 {
        0.0
    } else if n <= 2.0 {
        1.0
    } else {
        2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
    }
}

/// Isolation forest with leaf sizes stored as leaf values.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    name: String,
    feature_names: Vec<String>,
    trees: Vec<DecisionTree>,
    max_samples: usize,
    offset: f64,
}

impl IsolationForest {
    pub fn new(
        name: &str,
        feature_names: Vec<String>,
        trees: Vec<DecisionTree>,
        max_samples: usize,
        offset: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            feature_names,
            trees,
            max_samples,
            offset,
        }
    }

    /// Load a forest from its JSON artifact.
    pub fn from_file<P: AsRef<Path>>(path: P, name: &str) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read isolation forest from {:?}", path))?;
        let forest = Self::from_json(&json, name)
            .with_context(|| format!("Invalid isolation forest in {:?}", path))?;

        info!(
            model = %name,
            trees = forest.trees.len(),
            max_samples = forest.max_samples,
            offset = forest.offset,
            "Isolation forest loaded"
        );
        Ok(forest)
    }

    /// Parse a forest from JSON, validating its feature schema.
    pub fn from_json(json: &str, name: &str) -> anyhow::Result<Self> {
        let file: IsolationForestFile = serde_json::from_str(json)?;
        check_schema(name, &file.feature_names)?;

        if file.trees.is_empty() {
            bail!("forest has no trees");
        }
        if file.max_samples == 0 {
            bail!("max_samples must be positive");
        }

        let trees = file
            .trees
            .iter()
            .map(|spec| {
                let mut nodes = Vec::new();
                flatten(spec, &mut nodes)?;
                DecisionTree::new(nodes, SplitRule::LessOrEqual)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self::new(
            name,
            file.feature_names,
            trees,
            file.max_samples,
            file.offset,
        ))
    }

    /// Anomaly score in `[-1, 0)`; lower is more anomalous.
    pub fn score_samples(&self, features: &FeatureVector) -> f64 {
        let x = features.as_slice();
        let total_path: f64 = self
            .trees
            .iter()
            .map(|tree| {
                let (leaf, depth) = tree.leaf_for(x);
                let size = match tree.node(leaf) {
                    Node::Leaf { value, .. } => *value,
                    Node::Split { .. } => 0.0,
                };
                depth as f64 + average_path_length(size)
            })
            .sum();

        let mean_path = total_path / self.trees.len() as f64;
        -(2f64.powf(-mean_path / average_path_length(self.max_samples as f64)))
    }

    /// Score shifted by the fitted offset; negative means outlier.
    pub fn decision_function(&self, features: &FeatureVector) -> f64 {
        self.score_samples(features) - self.offset
    }
}

impl AnomalyScorer for IsolationForest {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, features: &FeatureVector) -> Result<i32> {
        check_schema(&self.name, &self.feature_names)?;
        if self.decision_function(features) >= 0.0 {
            Ok(INLIER)
        } else {
            Ok(OUTLIER)
        }
    }
}

fn feature_index(name: &str) -> anyhow::Result<usize> {
    FEATURE_NAMES
        .iter()
        .position(|&n| n == name)
        .ok_or_else(|| anyhow!("unknown split feature '{}'", name))
}

/// Append `spec` and its subtree in preorder; returns the subtree size.
fn flatten(spec: &IsolationNodeSpec, nodes: &mut Vec<Node>) -> anyhow::Result<f64> {
    match spec {
        IsolationNodeSpec::Leaf { size } => {
            let size = *size as f64;
            nodes.push(Node::Leaf {
                value: size,
                cover: size,
            });
            Ok(size)
        }
        IsolationNodeSpec::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            let feature = feature_index(feature)?;
            let index = nodes.len();
            nodes.push(Node::Leaf {
                value: 0.0,
                cover: 0.0,
            });

            let yes = nodes.len();
            let left_size = flatten(left, nodes)?;
            let no = nodes.len();
            let right_size = flatten(right, nodes)?;

            let cover = left_size + right_size;
            nodes[index] = Node::Split {
                feature,
                threshold: *threshold,
                yes,
                no,
                missing: yes,
                cover,
            };
            Ok(cover)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScoringError;
    use crate::feature_extractor::FeatureExtractor;
    use crate::types::RawTransaction;

    fn forest_json() -> String {
        serde_json::json!({
            "feature_names": FEATURE_NAMES,
            "max_samples": 4,
            "trees": [
                {
                    "feature": "amount",
                    "threshold": 5000.0,
                    "left": {"size": 3},
                    "right": {"size": 1}
                }
            ]
        })
        .to_string()
    }

    fn features(amount: f64) -> FeatureVector {
        let tx = RawTransaction::new(10, amount, 2_000_000.0, 2_000_000.0 - amount);
        FeatureExtractor::new().extract(&tx).unwrap()
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(0.0), 0.0);
        assert_eq!(average_path_length(1.0), 0.0);
        assert_eq!(average_path_length(2.0), 1.0);
        let expected = 2.0 * (2f64.ln() + EULER_GAMMA) - 4.0 / 3.0;
        assert!((average_path_length(3.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_score_samples_matches_formula() {
        let forest = IsolationForest::from_json(&forest_json(), "isolation_forest").unwrap();

        let path = 1.0 + average_path_length(3.0);
        let expected = -(2f64.powf(-path / average_path_length(4.0)));
        assert!((forest.score_samples(&features(1000.0)) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_predict_labels() {
        let forest = IsolationForest::from_json(&forest_json(), "isolation_forest").unwrap();

        assert_eq!(forest.predict(&features(1000.0)), Ok(INLIER));
        assert_eq!(forest.predict(&features(1_000_000.0)), Ok(OUTLIER));
    }

    #[test]
    fn test_default_offset_applied() {
        let forest = IsolationForest::from_json(&forest_json(), "isolation_forest").unwrap();
        let v = features(1000.0);
        assert!((forest.decision_function(&v) - (forest.score_samples(&v) + 0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_zero_decision_is_inlier() {
        // a lone root leaf holding every sample scores exactly -0.5
        let json = serde_json::json!({
            "feature_names": FEATURE_NAMES,
            "max_samples": 4,
            "trees": [{"size": 4}]
        })
        .to_string();
        let forest = IsolationForest::from_json(&json, "isolation_forest").unwrap();
        let v = features(1000.0);

        assert_eq!(forest.score_samples(&v), -0.5);
        assert_eq!(forest.decision_function(&v), 0.0);
        assert_eq!(forest.predict(&v), Ok(INLIER));
    }

    #[test]
    fn test_schema_mismatch_rejected_at_load() {
        let mut names: Vec<String> = FEATURE_NAMES.iter().map(|s| s.to_string()).collect();
        names.reverse();
        let json = serde_json::json!({
            "feature_names": names,
            "max_samples": 4,
            "trees": [{"size": 4}]
        })
        .to_string();

        let err = IsolationForest::from_json(&json, "isolation_forest").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ScoringError>(),
            Some(ScoringError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_schema_mismatch_rejected_at_predict() {
        let forest = IsolationForest::from_json(&forest_json(), "isolation_forest").unwrap();
        let drifted = IsolationForest::new(
            "isolation_forest",
            vec!["amount".to_string()],
            forest.trees.clone(),
            4,
            -0.5,
        );

        assert!(matches!(
            drifted.predict(&features(1000.0)),
            Err(ScoringError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_split_feature_rejected() {
        let json = serde_json::json!({
            "feature_names": FEATURE_NAMES,
            "max_samples": 4,
            "trees": [{
                "feature": "velocity",
                "threshold": 1.0,
                "left": {"size": 2},
                "right": {"size": 2}
            }]
        })
        .to_string();

        assert!(IsolationForest::from_json(&json, "isolation_forest").is_err());
    }
}
