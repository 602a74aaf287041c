//! Error taxonomy for the scoring pipeline

use thiserror::Error;

/// Errors raised while deriving features, loading models or scoring.
///
/// Every variant is fatal for the request that produced it; the pipeline
/// never substitutes a default verdict.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScoringError {
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Feature schema mismatch for {model}: expected {expected:?}, found {found:?}")]
    SchemaMismatch {
        model: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Model unavailable: {model} ({reason})")]
    ModelUnavailable { model: String, reason: String },

    #[error("Inference failed for {model}: {reason}")]
    Inference { model: String, reason: String },

    #[error("Transaction amount {amount:.2} exceeds current balance {balance:.2}")]
    AmountExceedsBalance { amount: f64, balance: f64 },
}

impl ScoringError {
    /// Short machine-readable code used in service responses.
    pub fn code(&self) -> &'static str {
        match self {
            ScoringError::MissingField { .. } => "missing_field",
            ScoringError::SchemaMismatch { .. } => "schema_mismatch",
            ScoringError::ModelUnavailable { .. } => "model_unavailable",
            ScoringError::Inference { .. } => "inference_failed",
            ScoringError::AmountExceedsBalance { .. } => "amount_exceeds_balance",
        }
    }
}

pub type Result<T> = std::result::Result<T, ScoringError>;
