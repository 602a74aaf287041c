//! Verdict and attribution data structures

use crate::feature_extractor::{FEATURE_COUNT, FEATURE_NAMES};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Details text for transactions cleared by the anomaly filter
pub const DETAILS_PASSED: &str = "passed anomaly scan";
/// Details text for transactions escalated to the classifier
pub const DETAILS_ANALYZED: &str = "flagged and analyzed";

/// Pipeline stage that produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Stage {
    /// Cleared by the anomaly filter
    AnomalyScan = 1,
    /// Escalated and decided by the fraud classifier
    DeepAnalysis = 2,
}

impl From<Stage> for u8 {
    fn from(stage: Stage) -> Self {
        stage as u8
    }
}

impl TryFrom<u8> for Stage {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Stage::AnomalyScan),
            2 => Ok(Stage::DeepAnalysis),
            other => Err(format!("invalid stage {}", other)),
        }
    }
}

/// Signed per-feature contributions, one per schema feature.
///
/// Serializes as a JSON object keyed by feature name, in schema order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributionMap {
    values: [f64; FEATURE_COUNT],
}

impl AttributionMap {
    pub fn from_values(values: [f64; FEATURE_COUNT]) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|&n| n == name)
            .map(|i| self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.values.iter().copied())
    }

    pub fn len(&self) -> usize {
        FEATURE_COUNT
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Sum of all contributions.
    pub fn total(&self) -> f64 {
        self.values.iter().sum()
    }

    /// The `k` largest contributions by magnitude, largest first. Ties keep
    /// schema order.
    pub fn top_k(&self, k: usize) -> Vec<(&'static str, f64)> {
        let mut entries: Vec<(&'static str, f64)> = self.iter().collect();
        entries.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        entries.truncate(k);
        entries
    }
}

impl Serialize for AttributionMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FEATURE_COUNT))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for AttributionMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AttributionVisitor;

        impl<'de> Visitor<'de> for AttributionVisitor {
            type Value = AttributionMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a map of the {} feature names to numbers", FEATURE_COUNT)
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut values = [None; FEATURE_COUNT];
                while let Some((key, value)) = access.next_entry::<String, f64>()? {
                    let index = FEATURE_NAMES
                        .iter()
                        .position(|&n| n == key)
                        .ok_or_else(|| de::Error::unknown_field(&key, &FEATURE_NAMES))?;
                    values[index] = Some(value);
                }

                let mut out = [0.0; FEATURE_COUNT];
                for (i, value) in values.iter().enumerate() {
                    out[i] = value.ok_or_else(|| de::Error::missing_field(FEATURE_NAMES[i]))?;
                }
                Ok(AttributionMap::from_values(out))
            }
        }

        deserializer.deserialize_map(AttributionVisitor)
    }
}

/// Attribution for one Stage-2 verdict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attribution {
    /// Expected raw classifier output over the training population
    pub base_value: f64,
    /// Per-feature contributions relative to `base_value`
    pub contributions: AttributionMap,
}

impl Attribution {
    /// Raw classifier output reconstructed from baseline plus contributions.
    pub fn reconstructed_score(&self) -> f64 {
        self.base_value + self.contributions.total()
    }
}

/// Result of scoring one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// 1 if the transaction is judged fraudulent
    #[serde(rename = "isFraud")]
    pub is_fraud: u8,

    /// Stage that produced the verdict
    pub stage: Stage,

    /// Human-readable summary
    pub details: String,

    /// Per-feature attribution (Stage 2 with explainer enabled only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<AttributionMap>,

    /// Baseline the attribution is relative to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_value: Option<f64>,
}

impl Verdict {
    /// Verdict for a transaction cleared by the anomaly filter.
    pub fn passed() -> Self {
        Self {
            is_fraud: 0,
            stage: Stage::AnomalyScan,
            details: DETAILS_PASSED.to_string(),
            attribution: None,
            base_value: None,
        }
    }

    /// Verdict for a transaction decided by the fraud classifier.
    pub fn analyzed(is_fraud: u8, attribution: Option<Attribution>) -> Self {
        Self {
            is_fraud,
            stage: Stage::DeepAnalysis,
            details: DETAILS_ANALYZED.to_string(),
            attribution: attribution.map(|a| a.contributions),
            base_value: attribution.map(|a| a.base_value),
        }
    }

    pub fn is_fraud(&self) -> bool {
        self.is_fraud == 1
    }
}
