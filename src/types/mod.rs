//! Type definitions for the scoring pipeline

pub mod transaction;
pub mod verdict;

pub use transaction::{RawTransaction, TransactionType};
pub use verdict::{Attribution, AttributionMap, Stage, Verdict};
