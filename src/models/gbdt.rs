//! Gradient boosted tree classifier (Stage 2), read from an XGBoost JSON dump

use crate::error::Result;
use crate::feature_extractor::{check_schema, FeatureVector, FEATURE_NAMES};
use crate::models::tree::{DecisionTree, Node, SplitRule};
use crate::models::FraudClassifier;
use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

const BINARY_LOGISTIC: &str = "binary:logistic";

fn default_base_score() -> f64 {
    0.5
}

fn default_threshold() -> f64 {
    0.5
}

fn default_objective() -> String {
    BINARY_LOGISTIC.to_string()
}

#[derive(Debug, Deserialize)]
struct TreeEnsembleFile {
    feature_names: Vec<String>,
    /// Global bias as a probability, as XGBoost stores it
    #[serde(default = "default_base_score")]
    base_score: f64,
    /// Decision threshold on the fraud probability
    #[serde(default = "default_threshold")]
    threshold: f64,
    #[serde(default = "default_objective")]
    objective: String,
    /// One entry per booster round, `get_dump(dump_format="json", with_stats=True)`
    trees: Vec<DumpNode>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DumpNode {
    Split {
        nodeid: u32,
        split: String,
        split_condition: f64,
        yes: u32,
        no: u32,
        #[serde(default)]
        missing: Option<u32>,
        #[serde(default)]
        cover: f64,
        children: Vec<DumpNode>,
    },
    Leaf {
        nodeid: u32,
        leaf: f64,
        #[serde(default)]
        cover: f64,
    },
}

impl DumpNode {
    fn nodeid(&self) -> u32 {
        match self {
            DumpNode::Split { nodeid, .. } | DumpNode::Leaf { nodeid, .. } => *nodeid,
        }
    }
}

/// Binary gradient boosted tree ensemble with a logistic link.
#[derive(Debug, Clone)]
pub struct TreeEnsemble {
    name: String,
    feature_names: Vec<String>,
    trees: Vec<DecisionTree>,
    base_margin: f64,
    threshold: f64,
}

impl TreeEnsemble {
    pub fn new(
        name: &str,
        feature_names: Vec<String>,
        trees: Vec<DecisionTree>,
        base_margin: f64,
        threshold: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            feature_names,
            trees,
            base_margin,
            threshold,
        }
    }

    /// Load an ensemble from its JSON artifact.
    pub fn from_file<P: AsRef<Path>>(path: P, name: &str) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read tree ensemble from {:?}", path))?;
        let ensemble = Self::from_json(&json, name)
            .with_context(|| format!("Invalid tree ensemble in {:?}", path))?;

        info!(
            model = %name,
            trees = ensemble.trees.len(),
            base_margin = ensemble.base_margin,
            threshold = ensemble.threshold,
            "Tree ensemble loaded"
        );
        Ok(ensemble)
    }

    /// Parse an ensemble from JSON, validating its feature schema.
    pub fn from_json(json: &str, name: &str) -> anyhow::Result<Self> {
        let file: TreeEnsembleFile = serde_json::from_str(json)?;
        check_schema(name, &file.feature_names)?;

        if file.objective != BINARY_LOGISTIC {
            bail!("unsupported objective '{}'", file.objective);
        }
        if !(file.base_score > 0.0 && file.base_score < 1.0) {
            bail!("base_score must be a probability in (0, 1), got {}", file.base_score);
        }
        if !(0.0..=1.0).contains(&file.threshold) {
            bail!("threshold must be in [0, 1], got {}", file.threshold);
        }

        let trees = file
            .trees
            .iter()
            .enumerate()
            .map(|(i, root)| flatten_tree(root).with_context(|| format!("tree {}", i)))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let base_margin = (file.base_score / (1.0 - file.base_score)).ln();

        Ok(Self::new(
            name,
            file.feature_names,
            trees,
            base_margin,
            file.threshold,
        ))
    }

    /// Raw log-odds output: base margin plus the leaf of every tree.
    pub fn raw_score(&self, features: &FeatureVector) -> f64 {
        let x = features.as_slice();
        self.trees
            .iter()
            .fold(self.base_margin, |acc, tree| acc + tree.predict(x))
    }

    /// Fraud probability.
    pub fn predict_proba(&self, features: &FeatureVector) -> f64 {
        sigmoid(self.raw_score(features))
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    pub fn base_margin(&self) -> f64 {
        self.base_margin
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }
}

impl FraudClassifier for TreeEnsemble {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, features: &FeatureVector) -> Result<u8> {
        check_schema(&self.name, &self.feature_names)?;
        Ok(u8::from(self.predict_proba(features) >= self.threshold))
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn feature_index(name: &str) -> anyhow::Result<usize> {
    FEATURE_NAMES
        .iter()
        .position(|&n| n == name)
        .ok_or_else(|| anyhow!("unknown split feature '{}'", name))
}

/// Re-index a nested dump tree into a preorder node arena.
fn flatten_tree(root: &DumpNode) -> anyhow::Result<DecisionTree> {
    let mut nodes = Vec::new();
    flatten(root, &mut nodes)?;
    DecisionTree::new(nodes, SplitRule::LessThan)
}

fn flatten(node: &DumpNode, nodes: &mut Vec<Node>) -> anyhow::Result<usize> {
    let index = nodes.len();
    match node {
        DumpNode::Leaf { leaf, cover, .. } => {
            nodes.push(Node::Leaf {
                value: *leaf,
                cover: *cover,
            });
        }
        DumpNode::Split {
            nodeid,
            split,
            split_condition,
            yes,
            no,
            missing,
            cover,
            children,
        } => {
            let feature = feature_index(split)?;
            nodes.push(Node::Leaf {
                value: 0.0,
                cover: 0.0,
            });

            let by_id: HashMap<u32, &DumpNode> =
                children.iter().map(|c| (c.nodeid(), c)).collect();
            let child = |id: u32| {
                by_id
                    .get(&id)
                    .copied()
                    .ok_or_else(|| anyhow!("node {} has no child with id {}", nodeid, id))
            };

            let yes_index = flatten(child(*yes)?, nodes)?;
            let no_index = flatten(child(*no)?, nodes)?;
            let missing_index = match missing {
                Some(id) if id == no => no_index,
                _ => yes_index,
            };

            nodes[index] = Node::Split {
                feature,
                threshold: *split_condition,
                yes: yes_index,
                no: no_index,
                missing: missing_index,
                cover: *cover,
            };
        }
    }
    Ok(index)
}
