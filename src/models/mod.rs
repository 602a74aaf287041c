//! Scoring models for both pipeline stages

pub mod gbdt;
pub mod isolation_forest;
pub mod loader;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod tree;

use crate::error::Result;
use crate::feature_extractor::FeatureVector;

pub use gbdt::TreeEnsemble;
pub use isolation_forest::IsolationForest;
pub use loader::{LoadedModels, ModelLoader};

/// Stage-1 label for a transaction that passes the anomaly scan. Any other
/// label escalates to Stage 2.
pub const NORMAL_LABEL: i32 = 1;

/// Stage 1: novelty detector over the feature vector.
pub trait AnomalyScorer: Send + Sync {
    fn name(&self) -> &str;

    /// Detector label, `1` for normal. Not a probability.
    fn predict(&self, features: &FeatureVector) -> Result<i32>;
}

/// Stage 2: supervised binary fraud classifier.
pub trait FraudClassifier: Send + Sync {
    fn name(&self) -> &str;

    /// Fraud label, `0` or `1`.
    fn predict(&self, features: &FeatureVector) -> Result<u8>;
}
