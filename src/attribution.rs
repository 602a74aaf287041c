//! Per-feature attribution for Stage-2 verdicts.
//!
//! [`TreeExplainer`] computes exact path-dependent TreeSHAP values over the
//! classifier's trees. Contributions are in raw log-odds units and satisfy
//! `base_value + Σ contributions == raw_score` for every input.

use crate::error::{Result, ScoringError};
use crate::feature_extractor::{FeatureVector, FEATURE_COUNT};
use crate::models::gbdt::TreeEnsemble;
use crate::models::loader::EXPLAINER_MODEL;
use crate::models::tree::{DecisionTree, Node};
use crate::types::verdict::{Attribution, AttributionMap};
use std::sync::Arc;

/// Explains a Stage-2 score for one feature vector.
pub trait Explainer: Send + Sync {
    fn explain(&self, features: &FeatureVector) -> Result<Attribution>;
}

/// TreeSHAP explainer bound to one tree ensemble.
pub struct TreeExplainer {
    model: Arc<TreeEnsemble>,
    base_value: f64,
}

impl TreeExplainer {
    /// Bind an explainer to `model`. Fails if the trees carry no cover
    /// statistics (a dump written without `with_stats`).
    pub fn new(model: Arc<TreeEnsemble>) -> Result<Self> {
        if !model.trees().iter().all(DecisionTree::has_covers) {
            return Err(ScoringError::ModelUnavailable {
                model: EXPLAINER_MODEL.to_string(),
                reason: "classifier trees carry no cover statistics".to_string(),
            });
        }

        let base_value = model
            .trees()
            .iter()
            .fold(model.base_margin(), |acc, tree| acc + tree.expected_value());

        Ok(Self { model, base_value })
    }

    /// Expected raw output over the training population.
    pub fn base_value(&self) -> f64 {
        self.base_value
    }
}

impl Explainer for TreeExplainer {
    fn explain(&self, features: &FeatureVector) -> Result<Attribution> {
        let x = features.as_slice();
        let mut phi = [0.0; FEATURE_COUNT];

        for tree in self.model.trees() {
            tree_shap(tree, x, &mut phi);
        }

        Ok(Attribution {
            base_value: self.base_value,
            contributions: AttributionMap::from_values(phi),
        })
    }
}

/// One element of the unique feature path from the root to the current node.
#[derive(Debug, Clone, Copy)]
struct PathElement {
    /// Split feature, `None` for the root placeholder
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    pweight: f64,
}

impl Default for PathElement {
    fn default() -> Self {
        Self {
            feature: None,
            zero_fraction: 0.0,
            one_fraction: 0.0,
            pweight: 0.0,
        }
    }
}

/// Add the SHAP values of one tree for input `x` into `phi`.
fn tree_shap(tree: &DecisionTree, x: &[f64], phi: &mut [f64; FEATURE_COUNT]) {
    recurse(tree, 0, x, phi, &[], 1.0, 1.0, None);
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    tree: &DecisionTree,
    index: usize,
    x: &[f64],
    phi: &mut [f64; FEATURE_COUNT],
    parent_path: &[PathElement],
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    let mut path = Vec::with_capacity(parent_path.len() + 1);
    path.extend_from_slice(parent_path);
    path.push(PathElement::default());
    let mut depth = parent_path.len();
    extend_path(&mut path, depth, zero_fraction, one_fraction, feature);

    match *tree.node(index) {
        Node::Leaf { value, .. } => {
            for i in 1..=depth {
                let weight = unwound_path_sum(&path, depth, i);
                let element = path[i];
                if let Some(f) = element.feature {
                    phi[f] += weight * (element.one_fraction - element.zero_fraction) * value;
                }
            }
        }
        Node::Split {
            feature: split_feature,
            threshold,
            yes,
            no,
            missing,
            cover,
        } => {
            let hot = tree.branch(x[split_feature], threshold, yes, no, missing);
            let cold = if hot == yes { no } else { yes };
            let hot_zero_fraction = tree.node(hot).cover() / cover;
            let cold_zero_fraction = tree.node(cold).cover() / cover;

            let mut incoming_zero_fraction = 1.0;
            let mut incoming_one_fraction = 1.0;

            // Undo an earlier split on the same feature so it is counted once.
            if let Some(k) = (0..=depth).find(|&k| path[k].feature == Some(split_feature)) {
                incoming_zero_fraction = path[k].zero_fraction;
                incoming_one_fraction = path[k].one_fraction;
                unwind_path(&mut path, depth, k);
                depth -= 1;
            }

            let path = &path[..=depth];
            recurse(
                tree,
                hot,
                x,
                phi,
                path,
                hot_zero_fraction * incoming_zero_fraction,
                incoming_one_fraction,
                Some(split_feature),
            );
            recurse(
                tree,
                cold,
                x,
                phi,
                path,
                cold_zero_fraction * incoming_zero_fraction,
                0.0,
                Some(split_feature),
            );
        }
    }
}

fn extend_path(
    path: &mut [PathElement],
    depth: usize,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    path[depth] = PathElement {
        feature,
        zero_fraction,
        one_fraction,
        pweight: if depth == 0 { 1.0 } else { 0.0 },
    };

    let d = depth as f64;
    for i in (0..depth).rev() {
        let fi = i as f64;
        path[i + 1].pweight += one_fraction * path[i].pweight * (fi + 1.0) / (d + 1.0);
        path[i].pweight = zero_fraction * path[i].pweight * (d - fi) / (d + 1.0);
    }
}

fn unwind_path(path: &mut [PathElement], depth: usize, index: usize) {
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let mut next_one_portion = path[depth].pweight;
    let d = depth as f64;

    for i in (0..depth).rev() {
        let fi = i as f64;
        if one_fraction != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * (d + 1.0) / ((fi + 1.0) * one_fraction);
            next_one_portion = tmp - path[i].pweight * zero_fraction * (d - fi) / (d + 1.0);
        } else {
            path[i].pweight = path[i].pweight * (d + 1.0) / (zero_fraction * (d - fi));
        }
    }

    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
}

fn unwound_path_sum(path: &[PathElement], depth: usize, index: usize) -> f64 {
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let mut next_one_portion = path[depth].pweight;
    let d = depth as f64;
    let mut total = 0.0;

    for i in (0..depth).rev() {
        let fi = i as f64;
        if one_fraction != 0.0 {
            let tmp = next_one_portion * (d + 1.0) / ((fi + 1.0) * one_fraction);
            total += tmp;
            next_one_portion = path[i].pweight - tmp * zero_fraction * ((d - fi) / (d + 1.0));
        } else if zero_fraction != 0.0 {
            total += (path[i].pweight / zero_fraction) / ((d - fi) / (d + 1.0));
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_extractor::{FeatureExtractor, FEATURE_NAMES};
    use crate::types::{RawTransaction, TransactionType};

    fn names() -> Vec<String> {
        FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
    }

    fn leaf(value: f64, cover: f64) -> Node {
        Node::Leaf { value, cover }
    }

    fn split(feature: usize, threshold: f64, yes: usize, no: usize, cover: f64) -> Node {
        Node::Split {
            feature,
            threshold,
            yes,
            no,
            missing: yes,
            cover,
        }
    }

    fn tree(nodes: Vec<Node>) -> DecisionTree {
        DecisionTree::new(nodes, crate::models::tree::SplitRule::LessThan).unwrap()
    }

    /// amount(0), isOrigAccountEmpty(1), senderBalanceError(2), type_TRANSFER(9)
    fn ensemble() -> Arc<TreeEnsemble> {
        let t1 = tree(vec![
            split(1, 0.5, 1, 4, 100.0),
            split(2, 100.0, 2, 3, 80.0),
            leaf(-1.5, 60.0),
            leaf(0.4, 20.0),
            split(0, 200_000.0, 5, 6, 20.0),
            leaf(0.2, 5.0),
            leaf(2.1, 15.0),
        ]);
        // Splits on amount twice along one path.
        let t2 = tree(vec![
            split(0, 10_000.0, 1, 2, 100.0),
            leaf(-0.6, 70.0),
            split(9, 0.5, 3, 4, 30.0),
            leaf(0.1, 10.0),
            split(0, 500_000.0, 5, 6, 20.0),
            leaf(0.5, 12.0),
            leaf(1.3, 8.0),
        ]);
        Arc::new(TreeEnsemble::new("xgboost", names(), vec![t1, t2], -0.3, 0.5))
    }

    fn vectors() -> Vec<FeatureVector> {
        let extractor = FeatureExtractor::new();
        [
            RawTransaction::debit(2, 1_500_000.0, 1_500_000.0, TransactionType::Transfer),
            RawTransaction::debit(10, 2000.0, 80000.0, TransactionType::CashOut),
            RawTransaction::debit(14, 25000.0, 85000.0, TransactionType::CashOut),
            RawTransaction::new(5, 300_000.0, 0.0, 0.0).with_type(TransactionType::Transfer),
        ]
        .iter()
        .map(|tx| extractor.extract(tx).unwrap())
        .collect()
    }

    #[test]
    fn test_contributions_reconstruct_raw_score() {
        let model = ensemble();
        let explainer = TreeExplainer::new(model.clone()).unwrap();

        for v in vectors() {
            let attribution = explainer.explain(&v).unwrap();
            let raw = model.raw_score(&v);
            assert!(
                (attribution.reconstructed_score() - raw).abs() < 1e-9,
                "reconstructed {} != raw {}",
                attribution.reconstructed_score(),
                raw
            );
        }
    }

    #[test]
    fn test_map_covers_every_feature() {
        let explainer = TreeExplainer::new(ensemble()).unwrap();
        let attribution = explainer.explain(&vectors()[0]).unwrap();

        let names: Vec<&str> = attribution.contributions.iter().map(|(n, _)| n).collect();
        assert_eq!(names, FEATURE_NAMES.to_vec());
    }

    #[test]
    fn test_unused_features_get_zero() {
        let explainer = TreeExplainer::new(ensemble()).unwrap();
        let attribution = explainer.explain(&vectors()[1]).unwrap();

        for name in ["hour_of_day", "day_of_week", "is_new_recipient", "type_CASH_OUT"] {
            assert_eq!(attribution.contributions.get(name), Some(0.0));
        }
    }

    #[test]
    fn test_single_split_matches_closed_form() {
        // For a stump, phi = f(x) - E[f].
        let stump = tree(vec![
            split(0, 1000.0, 1, 2, 10.0),
            leaf(-1.0, 8.0),
            leaf(3.0, 2.0),
        ]);
        let model = Arc::new(TreeEnsemble::new("stump", names(), vec![stump], 0.0, 0.5));
        let explainer = TreeExplainer::new(model).unwrap();

        let expected_value = (8.0 * -1.0 + 2.0 * 3.0) / 10.0;
        assert!((explainer.base_value() - expected_value).abs() < 1e-12);

        let v = vectors()[0]; // amount 1.5M takes the `no` leaf
        let attribution = explainer.explain(&v).unwrap();
        let amount = attribution.contributions.get("amount").unwrap();
        assert!((amount - (3.0 - expected_value)).abs() < 1e-12);
    }

    #[test]
    fn test_explain_is_bit_stable() {
        let explainer = TreeExplainer::new(ensemble()).unwrap();
        let v = vectors()[2];

        let first = explainer.explain(&v).unwrap();
        for _ in 0..10 {
            let again = explainer.explain(&v).unwrap();
            for ((_, a), (_, b)) in first.contributions.iter().zip(again.contributions.iter()) {
                assert_eq!(a.to_bits(), b.to_bits());
            }
            assert_eq!(first.base_value.to_bits(), again.base_value.to_bits());
        }
    }

    #[test]
    fn test_requires_cover_statistics() {
        let bare = tree(vec![
            split(0, 1000.0, 1, 2, 0.0),
            leaf(-1.0, 0.0),
            leaf(3.0, 0.0),
        ]);
        let model = Arc::new(TreeEnsemble::new("bare", names(), vec![bare], 0.0, 0.5));

        match TreeExplainer::new(model) {
            Err(ScoringError::ModelUnavailable { model, .. }) => {
                assert_eq!(model, EXPLAINER_MODEL)
            }
            _ => panic!("expected ModelUnavailable"),
        }
    }
}
