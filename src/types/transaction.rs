//! Raw transaction record as received from callers

use serde::{Deserialize, Serialize};

/// A transaction to be scored, in the wire shape callers send.
///
/// The four balance/time fields are required for scoring but optional on the
/// wire so that a missing one is reported by name instead of as a generic
/// deserialization error. Everything else is defaulted by the feature
/// extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    /// Simulation time counter, in hours
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u64>,

    /// Transaction amount
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,

    /// Sender balance before the transaction
    #[serde(
        rename = "oldbalanceOrg",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub old_balance_orig: Option<f64>,

    /// Sender balance after the transaction
    #[serde(
        rename = "newbalanceOrig",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub new_balance_orig: Option<f64>,

    /// 1 if the transaction is a CASH_OUT
    #[serde(
        rename = "type_CASH_OUT",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub type_cash_out: Option<u8>,

    /// 1 if the transaction is a TRANSFER
    #[serde(
        rename = "type_TRANSFER",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub type_transfer: Option<u8>,

    /// Sender account id
    #[serde(rename = "nameOrig", default)]
    pub name_orig: String,

    /// Recipient account id
    #[serde(rename = "nameDest", default)]
    pub name_dest: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_since_last_transaction: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions_in_last_hour: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_deviation_from_avg: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_new_recipient: Option<u8>,
}

/// Transaction type offered by the front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    CashOut,
    Transfer,
}

impl RawTransaction {
    /// Create a transaction with the required fields set.
    pub fn new(step: u64, amount: f64, old_balance_orig: f64, new_balance_orig: f64) -> Self {
        Self {
            step: Some(step),
            amount: Some(amount),
            old_balance_orig: Some(old_balance_orig),
            new_balance_orig: Some(new_balance_orig),
            ..Self::default()
        }
    }

    /// Set the one-hot transaction type flags.
    pub fn with_type(mut self, tx_type: TransactionType) -> Self {
        self.type_cash_out = Some(u8::from(tx_type == TransactionType::CashOut));
        self.type_transfer = Some(u8::from(tx_type == TransactionType::Transfer));
        self
    }

    /// Set sender and recipient account ids.
    pub fn with_parties(mut self, name_orig: &str, name_dest: &str) -> Self {
        self.name_orig = name_orig.to_string();
        self.name_dest = name_dest.to_string();
        self
    }

    /// Set the velocity fields supplied by the caller's history store.
    pub fn with_activity(
        mut self,
        time_since_last_transaction: f64,
        transactions_in_last_hour: u32,
    ) -> Self {
        self.time_since_last_transaction = Some(time_since_last_transaction);
        self.transactions_in_last_hour = Some(transactions_in_last_hour);
        self
    }

    /// Build the record a balance-draining front end would send: the new
    /// balance is the old balance minus the amount, floored at zero.
    pub fn debit(step: u64, amount: f64, old_balance_orig: f64, tx_type: TransactionType) -> Self {
        let new_balance = if old_balance_orig > amount {
            old_balance_orig - amount
        } else {
            0.0
        };
        Self::new(step, amount, old_balance_orig, new_balance)
            .with_type(tx_type)
            .with_activity(0.0, 1)
    }

    /// Transaction type derived from the one-hot flags, if any is set.
    pub fn transaction_type(&self) -> Option<TransactionType> {
        if self.type_cash_out == Some(1) {
            Some(TransactionType::CashOut)
        } else if self.type_transfer == Some(1) {
            Some(TransactionType::Transfer)
        } else {
            None
        }
    }
}
