//! Request handling around the scoring pipeline.
//!
//! Turns one wire payload into one [`ScoringResponse`]. Validation that only
//! makes sense for interactive callers (amount against balance) and velocity
//! tracking live here, outside the pipeline.

use crate::error::{Result, ScoringError};
use crate::metrics::PipelineMetrics;
use crate::pipeline::ScoringPipeline;
use crate::types::transaction::RawTransaction;
use crate::types::verdict::Verdict;
use crate::velocity::{VelocityReport, VelocityTracker};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Error code for payloads that are not a transaction at all
pub const INVALID_PAYLOAD: &str = "invalid_payload";

/// Reply for one scoring request. Exactly one of `verdict` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringResponse {
    pub request_id: String,
    /// Sender account (`nameOrig`), empty when unknown
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<VelocityReport>,
    /// Largest attributions by magnitude, when the verdict carries them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_features: Vec<FeatureContribution>,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&ScoringError> for ErrorBody {
    fn from(err: &ScoringError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub value: f64,
}

impl ScoringResponse {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    fn rejected(request_id: String, user: String, error: ErrorBody) -> Self {
        Self {
            request_id,
            user,
            verdict: None,
            error: Some(error),
            velocity: None,
            top_features: Vec::new(),
            processed_at: Utc::now(),
        }
    }
}

/// Scores wire payloads and tracks per-user velocity.
pub struct TransactionService {
    pipeline: Arc<ScoringPipeline>,
    velocity: Arc<VelocityTracker>,
    metrics: Arc<PipelineMetrics>,
    top_features: usize,
}

impl TransactionService {
    pub fn new(
        pipeline: Arc<ScoringPipeline>,
        velocity: Arc<VelocityTracker>,
        metrics: Arc<PipelineMetrics>,
        top_features: usize,
    ) -> Self {
        Self {
            pipeline,
            velocity,
            metrics,
            top_features,
        }
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Handle one JSON payload. Never panics; every failure becomes an
    /// error response.
    pub fn handle(&self, payload: &[u8]) -> ScoringResponse {
        let request_id = Uuid::new_v4().to_string();

        let tx: RawTransaction = match serde_json::from_slice(payload) {
            Ok(tx) => tx,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Failed to deserialize transaction");
                self.metrics.record_rejection();
                return ScoringResponse::rejected(
                    request_id,
                    String::new(),
                    ErrorBody {
                        code: INVALID_PAYLOAD.to_string(),
                        message: e.to_string(),
                    },
                );
            }
        };

        self.handle_transaction(request_id, &tx)
    }

    /// Handle an already-decoded transaction.
    pub fn handle_transaction(&self, request_id: String, tx: &RawTransaction) -> ScoringResponse {
        let start = Instant::now();
        let user = tx.name_orig.clone();

        if let Err(e) = validate_balance(tx) {
            warn!(request_id = %request_id, user = %user, error = %e, "Transaction rejected");
            self.metrics.record_rejection();
            return ScoringResponse::rejected(request_id, user, ErrorBody::from(&e));
        }

        match self.pipeline.score(tx) {
            Ok(verdict) => {
                let processing_time = start.elapsed();
                self.metrics.record_verdict(&verdict, processing_time);

                // only scored transactions count toward the rate
                let velocity = if user.is_empty() {
                    None
                } else {
                    let report = self.velocity.record(&user, Utc::now());
                    if report.alert {
                        self.metrics.record_velocity_alert();
                    }
                    Some(report)
                };

                let top_features = verdict
                    .attribution
                    .as_ref()
                    .map(|a| {
                        a.top_k(self.top_features)
                            .into_iter()
                            .map(|(feature, value)| FeatureContribution {
                                feature: feature.to_string(),
                                value,
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                if verdict.is_fraud() {
                    info!(
                        request_id = %request_id,
                        user = %user,
                        stage = u8::from(verdict.stage),
                        processing_time_us = processing_time.as_micros() as u64,
                        "Fraud verdict"
                    );
                } else {
                    debug!(
                        request_id = %request_id,
                        user = %user,
                        stage = u8::from(verdict.stage),
                        processing_time_us = processing_time.as_micros() as u64,
                        "Transaction cleared"
                    );
                }

                ScoringResponse {
                    request_id,
                    user,
                    verdict: Some(verdict),
                    error: None,
                    velocity,
                    top_features,
                    processed_at: Utc::now(),
                }
            }
            Err(e) => {
                error!(
                    request_id = %request_id,
                    user = %user,
                    code = e.code(),
                    error = %e,
                    "Scoring failed"
                );
                self.metrics.record_rejection();
                ScoringResponse::rejected(request_id, user, ErrorBody::from(&e))
            }
        }
    }
}

/// Reject debits larger than the sender's balance. Missing fields are left
/// for the feature extractor to report.
pub fn validate_balance(tx: &RawTransaction) -> Result<()> {
    if let (Some(amount), Some(balance)) = (tx.amount, tx.old_balance_orig) {
        if amount > balance {
            return Err(ScoringError::AmountExceedsBalance { amount, balance });
        }
    }
    Ok(())
}
