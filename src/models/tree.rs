//! Flat binary decision tree shared by the isolation forest and the
//! gradient boosted classifier.

use anyhow::{bail, Result};

/// How a split threshold is compared against a feature value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitRule {
    /// `(f32) x < (f32) threshold` takes the `yes` branch (XGBoost)
    LessThan,
    /// `(f32) x <= threshold` takes the `yes` branch (scikit-learn)
    LessOrEqual,
}

/// A tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        yes: usize,
        no: usize,
        /// Branch taken when the feature value is NaN
        missing: usize,
        cover: f64,
    },
    Leaf {
        value: f64,
        cover: f64,
    },
}

impl Node {
    pub fn cover(&self) -> f64 {
        match self {
            Node::Split { cover, .. } | Node::Leaf { cover, .. } => *cover,
        }
    }
}

/// Decision tree stored as a node arena; node 0 is the root.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    rule: SplitRule,
}

impl DecisionTree {
    /// Build a tree, checking that every child index is in range and that
    /// each node is reachable exactly once from the root.
    pub fn new(nodes: Vec<Node>, rule: SplitRule) -> Result<Self> {
        if nodes.is_empty() {
            bail!("tree has no nodes");
        }

        let mut seen = vec![false; nodes.len()];
        let mut stack = vec![0usize];
        while let Some(index) = stack.pop() {
            if index >= nodes.len() {
                bail!("child index {} out of range ({} nodes)", index, nodes.len());
            }
            if seen[index] {
                bail!("node {} reachable more than once", index);
            }
            seen[index] = true;

            if let Node::Split {
                yes, no, missing, ..
            } = nodes[index]
            {
                if missing != yes && missing != no {
                    bail!("node {} missing branch is neither child", index);
                }
                stack.push(yes);
                stack.push(no);
            }
        }

        if let Some(orphan) = seen.iter().position(|&s| !s) {
            bail!("node {} unreachable from root", orphan);
        }

        Ok(Self { nodes, rule })
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    /// Child of split node `(feature, threshold, yes, no, missing)` taken by `x`.
    ///
    /// Both libraries compare in single precision: XGBoost stores `f32`
    /// thresholds, scikit-learn keeps `f64` thresholds but casts inputs to
    /// `f32` first.
    pub fn branch(&self, value: f64, threshold: f64, yes: usize, no: usize, missing: usize) -> usize {
        if value.is_nan() {
            return missing;
        }
        let goes_yes = match self.rule {
            SplitRule::LessThan => (value as f32) < (threshold as f32),
            SplitRule::LessOrEqual => (value as f32 as f64) <= threshold,
        };
        if goes_yes {
            yes
        } else {
            no
        }
    }

    /// Walk to the leaf reached by `x`, returning `(leaf index, depth)`.
    pub fn leaf_for(&self, x: &[f64]) -> (usize, usize) {
        let mut index = 0;
        let mut depth = 0;
        loop {
            match self.nodes[index] {
                Node::Split {
                    feature,
                    threshold,
                    yes,
                    no,
                    missing,
                    ..
                } => {
                    index = self.branch(x[feature], threshold, yes, no, missing);
                    depth += 1;
                }
                Node::Leaf { .. } => return (index, depth),
            }
        }
    }

    /// Leaf value reached by `x`.
    pub fn predict(&self, x: &[f64]) -> f64 {
        let (leaf, _) = self.leaf_for(x);
        match self.nodes[leaf] {
            Node::Leaf { value, .. } => value,
            Node::Split { .. } => unreachable!("leaf_for stops at leaves"),
        }
    }

    /// Cover-weighted mean leaf value, i.e. the tree's expected output over
    /// the population it was fitted on.
    pub fn expected_value(&self) -> f64 {
        self.expected_from(0)
    }

    fn expected_from(&self, index: usize) -> f64 {
        match self.nodes[index] {
            Node::Leaf { value, .. } => value,
            Node::Split { yes, no, cover, .. } => {
                let yes_cover = self.nodes[yes].cover();
                let no_cover = self.nodes[no].cover();
                (yes_cover * self.expected_from(yes) + no_cover * self.expected_from(no)) / cover
            }
        }
    }

    /// True if every split node has positive cover, which attribution needs.
    pub fn has_covers(&self) -> bool {
        self.nodes.iter().all(|n| match n {
            Node::Split { cover, .. } => *cover > 0.0,
            Node::Leaf { .. } => true,
        })
    }
}
