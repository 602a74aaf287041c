//! Fraud Scoring Pipeline Library
//!
//! Two-stage transaction scoring: an isolation-forest anomaly filter gates a
//! gradient-boosted fraud classifier, and Stage 2 verdicts can carry exact
//! per-feature TreeSHAP attributions.

pub mod attribution;
pub mod config;
pub mod consumer;
pub mod error;
pub mod feature_extractor;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod producer;
pub mod service;
pub mod types;
pub mod velocity;

pub use attribution::{Explainer, TreeExplainer};
pub use config::AppConfig;
pub use error::{Result, ScoringError};
pub use feature_extractor::{FeatureExtractor, FeatureVector, FEATURE_NAMES};
pub use models::{AnomalyScorer, FraudClassifier};
pub use pipeline::ScoringPipeline;
pub use service::{ScoringResponse, TransactionService};
pub use types::{RawTransaction, TransactionType, Verdict};
