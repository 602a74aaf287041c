//! ONNX Runtime adapter for either stage.
//!
//! ONNX graphs carry no feature names, so every `<model>.onnx` must ship with
//! a `<model>.features.json` sidecar listing the columns it was exported with.
//! Exporters disagree on output shape: a label tensor, a probability tensor,
//! or a `seq(map(int64, float))` from ZipMap. All of them are normalized to a
//! label here.

use crate::error::{Result, ScoringError};
use crate::feature_extractor::{check_schema, FeatureVector, FEATURE_COUNT};
use crate::models::isolation_forest::{INLIER, OUTLIER};
use crate::models::{AnomalyScorer, FraudClassifier};
use anyhow::Context;
use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session, SessionOutputs};
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, Tensor};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Probability cut-off for graphs that expose no label output
const PROBABILITY_THRESHOLD: f64 = 0.5;

/// Initialize ONNX Runtime once per process.
pub fn init_runtime() -> anyhow::Result<()> {
    ort::init().commit()?;
    info!("ONNX Runtime initialized");
    Ok(())
}

/// What a graph produced for one row, before mapping to a stage label.
#[derive(Debug, Clone, Copy, PartialEq)]
enum RawOutput {
    Label(i64),
    Probability(f64),
    /// Signed decision score, negative for outliers
    Score(f64),
}

/// One loaded ONNX graph.
pub struct OnnxModel {
    name: String,
    // ONNX Runtime needs exclusive access to run a session
    session: Mutex<Session>,
    input_name: String,
    feature_names: Vec<String>,
}

impl OnnxModel {
    /// Load `path` and its feature sidecar.
    pub fn load<P: AsRef<Path>>(path: P, name: &str, threads: usize) -> anyhow::Result<Self> {
        let path = path.as_ref();
        info!(model = %name, path = %path.display(), threads = threads, "Loading ONNX model");

        let sidecar = path.with_extension("features.json");
        let feature_names: Vec<String> = serde_json::from_str(
            &std::fs::read_to_string(&sidecar)
                .with_context(|| format!("Failed to read feature sidecar {:?}", sidecar))?,
        )
        .with_context(|| format!("Invalid feature sidecar {:?}", sidecar))?;
        check_schema(name, &feature_names)?;

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(threads)?
            .commit_from_file(path)
            .context(format!("Failed to load model from {:?}", path))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        info!(model = %name, input = %input_name, "Model loaded successfully");

        Ok(Self {
            name: name.to_string(),
            session: Mutex::new(session),
            input_name,
            feature_names,
        })
    }

    fn inference_error(&self, reason: impl std::fmt::Display) -> ScoringError {
        ScoringError::Inference {
            model: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    fn run(&self, features: &FeatureVector) -> Result<RawOutput> {
        check_schema(&self.name, &self.feature_names)?;

        let shape = vec![1_i64, FEATURE_COUNT as i64];
        let input = Tensor::from_array((shape, features.to_f32()))
            .map_err(|e| self.inference_error(e))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| self.inference_error(format!("Lock error: {}", e)))?;
        let outputs = session
            .run(ort::inputs![&self.input_name => input])
            .map_err(|e| self.inference_error(e))?;

        self.extract(&outputs)
    }

    /// Prefer an explicit label, then a probability, then a decision score.
    fn extract(&self, outputs: &SessionOutputs) -> Result<RawOutput> {
        for (name, output) in outputs.iter() {
            if name.contains("label") {
                if let Ok((_, data)) = output.try_extract_tensor::<i64>() {
                    if let Some(&label) = data.first() {
                        return Ok(RawOutput::Label(label));
                    }
                }
            }
        }

        for (name, output) in outputs.iter() {
            if name.contains("label") {
                continue;
            }
            let dtype = output.dtype();

            if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
                let dims: Vec<i64> = shape.iter().copied().collect();
                let value = fraud_prob_from_tensor(&dims, data);
                debug!(model = %self.name, output = %name, value = value, "Extracted from tensor");
                return Ok(if name.contains("prob") {
                    RawOutput::Probability(value)
                } else {
                    RawOutput::Score(value)
                });
            }

            if DynSequenceValueType::can_downcast(&dtype) {
                if let Ok(prob) = self.extract_from_sequence_map(&output) {
                    return Ok(RawOutput::Probability(prob));
                }
            }
        }

        Err(self.inference_error("no label, probability or score output"))
    }

    /// Class-1 probability from `seq(map(int64, float))`.
    fn extract_from_sequence_map(&self, output: &ort::value::DynValue) -> anyhow::Result<f64> {
        let allocator = Allocator::default();

        let sequence = output
            .downcast_ref::<DynSequenceValueType>()
            .map_err(|e| anyhow::anyhow!("Failed to downcast to sequence: {}", e))?;
        let maps = sequence.try_extract_sequence::<DynMapValueType>(&allocator)?;
        let map_value = maps
            .first()
            .ok_or_else(|| anyhow::anyhow!("Empty sequence"))?;
        let kv_pairs = map_value.try_extract_key_values::<i64, f32>()?;

        if let Some((_, prob)) = kv_pairs.iter().find(|(class, _)| *class == 1) {
            return Ok(*prob as f64);
        }
        if let Some((_, prob)) = kv_pairs.iter().find(|(class, _)| *class == 0) {
            return Ok(1.0 - *prob as f64);
        }
        Err(anyhow::anyhow!("No probability found in map"))
    }
}

/// Fraud-class value from a `[batch, classes]` or `[classes]` tensor.
fn fraud_prob_from_tensor(dims: &[i64], data: &[f32]) -> f64 {
    let classes = dims.last().copied().unwrap_or(0);
    if classes >= 2 {
        data.get(1).map(|&v| v as f64).unwrap_or(0.0)
    } else {
        data.first().map(|&v| v as f64).unwrap_or(0.0)
    }
}

impl AnomalyScorer for OnnxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, features: &FeatureVector) -> Result<i32> {
        match self.run(features)? {
            RawOutput::Label(label) => Ok(label as i32),
            RawOutput::Score(score) => Ok(if score >= 0.0 { INLIER } else { OUTLIER }),
            RawOutput::Probability(_) => Err(self.inference_error(
                "anomaly filter returned a probability; expected a label or decision score",
            )),
        }
    }
}

impl FraudClassifier for OnnxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, features: &FeatureVector) -> Result<u8> {
        match self.run(features)? {
            RawOutput::Label(label) => Ok(u8::from(label == 1)),
            RawOutput::Probability(p) => Ok(u8::from(p >= PROBABILITY_THRESHOLD)),
            RawOutput::Score(_) => Err(self.inference_error(
                "classifier returned an unlabelled score; expected a label or probability",
            )),
        }
    }
}
