//! Feature extraction for the two-stage scoring models.
//!
//! Both models were fitted on the same 10-column frame; the column set and
//! order below are that frame. Changing either silently corrupts predictions,
//! so every model artifact is checked against [`FEATURE_NAMES`] when loaded
//! and again before scoring.

use crate::error::{Result, ScoringError};
use crate::types::transaction::RawTransaction;
use tracing::debug;

/// Number of features in a [`FeatureVector`].
pub const FEATURE_COUNT: usize = 10;

/// Feature names in the exact order the models consume them.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "amount",
    "isOrigAccountEmpty",
    "senderBalanceError",
    "hour_of_day",
    "day_of_week",
    "amount_deviation_from_avg",
    "is_new_recipient",
    "time_since_last_transaction",
    "type_CASH_OUT",
    "type_TRANSFER",
];

// Defaults for fields a caller may omit.
const DEFAULT_AMOUNT_DEVIATION: f64 = 0.0;
const DEFAULT_IS_NEW_RECIPIENT: u8 = 1;
const DEFAULT_TIME_SINCE_LAST: f64 = 0.0;
const DEFAULT_TX_IN_LAST_HOUR: u32 = 1;
const DEFAULT_TYPE_FLAG: u8 = 0;

/// Fixed-schema numeric encoding of one transaction.
///
/// Immutable once built: values are only readable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    values: [f64; FEATURE_COUNT],
}

impl FeatureVector {
    /// Build a vector from values already in schema order.
    pub fn from_values(values: [f64; FEATURE_COUNT]) -> Self {
        Self { values }
    }

    /// Values in schema order.
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Value by feature name.
    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|&n| n == name)
            .map(|i| self.values[i])
    }

    /// `(name, value)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.values.iter().copied())
    }

    /// Single-precision copy for runtimes that take `f32` tensors.
    pub fn to_f32(&self) -> Vec<f32> {
        self.values.iter().map(|&v| v as f32).collect()
    }
}

/// Check a model's expected input columns against the vector schema.
pub fn check_schema(model: &str, expected: &[String]) -> Result<()> {
    let matches = expected.len() == FEATURE_COUNT
        && expected.iter().zip(FEATURE_NAMES.iter()).all(|(e, f)| e == f);

    if matches {
        Ok(())
    } else {
        Err(ScoringError::SchemaMismatch {
            model: model.to_string(),
            expected: expected.to_vec(),
            found: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        })
    }
}

/// Derives the model feature vector from a raw transaction.
#[derive(Debug, Clone, Copy)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    /// Create a new feature extractor.
    pub fn new() -> Self {
        Self
    }

    /// Extract features from a transaction.
    ///
    /// Fails with [`ScoringError::MissingField`] if `step`, `amount`,
    /// `oldbalanceOrg` or `newbalanceOrig` is absent. Optional fields are
    /// defaulted here and nowhere else.
    pub fn extract(&self, tx: &RawTransaction) -> Result<FeatureVector> {
        let amount = tx
            .amount
            .ok_or(ScoringError::MissingField { field: "amount" })?;
        let old_balance = tx
            .old_balance_orig
            .ok_or(ScoringError::MissingField { field: "oldbalanceOrg" })?;
        let new_balance = tx
            .new_balance_orig
            .ok_or(ScoringError::MissingField { field: "newbalanceOrig" })?;
        let step = tx.step.ok_or(ScoringError::MissingField { field: "step" })?;

        let defaulted = Self::defaulted_fields(tx);
        if !defaulted.is_empty() {
            debug!(fields = ?defaulted, "Optional fields absent, using defaults");
        }

        let sender_balance_error = old_balance + amount - new_balance;
        let is_orig_account_empty = if new_balance == 0.0 { 1.0 } else { 0.0 };
        let hour_of_day = (step % 24) as f64;
        let day_of_week = ((step / 24) % 7) as f64;

        let amount_deviation = tx
            .amount_deviation_from_avg
            .unwrap_or(DEFAULT_AMOUNT_DEVIATION);
        let is_new_recipient = tx.is_new_recipient.unwrap_or(DEFAULT_IS_NEW_RECIPIENT) as f64;
        let time_since_last = tx
            .time_since_last_transaction
            .unwrap_or(DEFAULT_TIME_SINCE_LAST);
        let type_cash_out = tx.type_cash_out.unwrap_or(DEFAULT_TYPE_FLAG) as f64;
        let type_transfer = tx.type_transfer.unwrap_or(DEFAULT_TYPE_FLAG) as f64;

        Ok(FeatureVector::from_values([
            amount,
            is_orig_account_empty,
            sender_balance_error,
            hour_of_day,
            day_of_week,
            amount_deviation,
            is_new_recipient,
            time_since_last,
            type_cash_out,
            type_transfer,
        ]))
    }

    /// Transactions in the last hour, defaulted like the other optional
    /// fields. Not a model feature; carried for velocity reporting.
    pub fn transactions_in_last_hour(&self, tx: &RawTransaction) -> u32 {
        tx.transactions_in_last_hour.unwrap_or(DEFAULT_TX_IN_LAST_HOUR)
    }

    /// Get the number of features produced.
    pub fn feature_count(&self) -> usize {
        FEATURE_COUNT
    }

    /// Get feature names in model order.
    pub fn feature_names(&self) -> &'static [&'static str] {
        &FEATURE_NAMES
    }

    fn defaulted_fields(tx: &RawTransaction) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if tx.amount_deviation_from_avg.is_none() {
            fields.push("amount_deviation_from_avg");
        }
        if tx.is_new_recipient.is_none() {
            fields.push("is_new_recipient");
        }
        if tx.time_since_last_transaction.is_none() {
            fields.push("time_since_last_transaction");
        }
        if tx.transactions_in_last_hour.is_none() {
            fields.push("transactions_in_last_hour");
        }
        if tx.type_cash_out.is_none() {
            fields.push("type_CASH_OUT");
        }
        if tx.type_transfer.is_none() {
            fields.push("type_TRANSFER");
        }
        fields
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}
