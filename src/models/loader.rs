//! Model artifact loader

use crate::attribution::{Explainer, TreeExplainer};
use crate::config::{ModelFormat, ModelsConfig};
use crate::error::ScoringError;
use crate::models::gbdt::TreeEnsemble;
use crate::models::isolation_forest::IsolationForest;
use crate::models::{AnomalyScorer, FraudClassifier};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Model names used in logs and errors
pub const STAGE1_MODEL: &str = "isolation_forest";
pub const STAGE2_MODEL: &str = "fraud_classifier";
pub const EXPLAINER_MODEL: &str = "tree_explainer";

/// The three capabilities the pipeline is built from. Read-only once loaded.
#[derive(Clone)]
pub struct LoadedModels {
    pub stage1: Arc<dyn AnomalyScorer>,
    pub stage2: Arc<dyn FraudClassifier>,
    pub explainer: Option<Arc<dyn Explainer>>,
}

/// Loader for Stage 1 / Stage 2 artifacts
pub struct ModelLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a new model loader with default settings (1 thread)
    pub fn new() -> Self {
        Self::with_threads(1)
    }

    /// Create a new model loader with specified number of ONNX threads
    pub fn with_threads(onnx_threads: usize) -> Self {
        Self { onnx_threads }
    }

    /// Load both stages (and the explainer if enabled) from `config`.
    ///
    /// Any missing capability is a [`ScoringError::ModelUnavailable`]; the
    /// caller should refuse to serve rather than run with a stage missing.
    pub fn load_all_models(&self, config: &ModelsConfig) -> Result<LoadedModels, ScoringError> {
        let models_dir = Path::new(&config.models_dir);
        let stage1_path = models_dir.join(&config.stage1_file);
        let stage2_path = models_dir.join(&config.stage2_file);

        let models = match config.format {
            ModelFormat::Json => self.load_json(&stage1_path, &stage2_path, config.explain)?,
            ModelFormat::Onnx => self.load_onnx(&stage1_path, &stage2_path, config.explain)?,
        };

        info!(
            format = ?config.format,
            stage1 = %models.stage1.name(),
            stage2 = %models.stage2.name(),
            explain = models.explainer.is_some(),
            "Loaded models from {}",
            models_dir.display()
        );

        Ok(models)
    }

    fn load_json(
        &self,
        stage1_path: &Path,
        stage2_path: &Path,
        explain: bool,
    ) -> Result<LoadedModels, ScoringError> {
        let stage1 = IsolationForest::from_file(stage1_path, STAGE1_MODEL)
            .map_err(|e| unavailable(STAGE1_MODEL, e))?;
        let stage2 = Arc::new(
            TreeEnsemble::from_file(stage2_path, STAGE2_MODEL)
                .map_err(|e| unavailable(STAGE2_MODEL, e))?,
        );

        let explainer = if explain {
            let explainer: Arc<dyn Explainer> = Arc::new(TreeExplainer::new(stage2.clone())?);
            Some(explainer)
        } else {
            None
        };

        Ok(LoadedModels {
            stage1: Arc::new(stage1),
            stage2,
            explainer,
        })
    }

    #[cfg(feature = "onnx")]
    fn load_onnx(
        &self,
        stage1_path: &Path,
        stage2_path: &Path,
        explain: bool,
    ) -> Result<LoadedModels, ScoringError> {
        use crate::models::onnx::OnnxModel;

        if explain {
            return Err(ScoringError::ModelUnavailable {
                model: EXPLAINER_MODEL.to_string(),
                reason: "attribution needs a JSON tree ensemble; ONNX graphs cannot be introspected"
                    .to_string(),
            });
        }

        crate::models::onnx::init_runtime().map_err(|e| unavailable("onnx_runtime", e))?;
        let stage1 = OnnxModel::load(stage1_path, STAGE1_MODEL, self.onnx_threads)
            .map_err(|e| unavailable(STAGE1_MODEL, e))?;
        let stage2 = OnnxModel::load(stage2_path, STAGE2_MODEL, self.onnx_threads)
            .map_err(|e| unavailable(STAGE2_MODEL, e))?;

        Ok(LoadedModels {
            stage1: Arc::new(stage1),
            stage2: Arc::new(stage2),
            explainer: None,
        })
    }

    #[cfg(not(feature = "onnx"))]
    fn load_onnx(
        &self,
        _stage1_path: &Path,
        _stage2_path: &Path,
        _explain: bool,
    ) -> Result<LoadedModels, ScoringError> {
        tracing::warn!(
            onnx_threads = self.onnx_threads,
            "ONNX model format requested but the onnx feature is not compiled in"
        );
        Err(ScoringError::ModelUnavailable {
            model: "onnx_runtime".to_string(),
            reason: "built without the `onnx` feature".to_string(),
        })
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep typed scoring errors (schema drift) and wrap everything else.
fn unavailable(model: &str, err: anyhow::Error) -> ScoringError {
    match err.downcast_ref::<ScoringError>() {
        Some(scoring) => scoring.clone(),
        None => ScoringError::ModelUnavailable {
            model: model.to_string(),
            reason: format!("{:#}", err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_extractor::FEATURE_NAMES;

    fn write_models(dir: &Path) {
        let forest = serde_json::json!({
            "feature_names": FEATURE_NAMES,
            "max_samples": 4,
            "trees": [{"feature": "amount", "threshold": 5000.0,
                       "left": {"size": 3}, "right": {"size": 1}}]
        });
        let classifier = serde_json::json!({
            "feature_names": FEATURE_NAMES,
            "trees": [{"nodeid": 0, "split": "isOrigAccountEmpty", "split_condition": 0.5,
                       "yes": 1, "no": 2, "missing": 1, "cover": 10.0,
                       "children": [{"nodeid": 1, "leaf": -1.0, "cover": 9.0},
                                    {"nodeid": 2, "leaf": 1.0, "cover": 1.0}]}]
        });
        std::fs::write(dir.join("isolation_forest.json"), forest.to_string()).unwrap();
        std::fs::write(dir.join("fraud_classifier.json"), classifier.to_string()).unwrap();
    }

    fn models_config(dir: &Path) -> ModelsConfig {
        ModelsConfig {
            models_dir: dir.to_string_lossy().to_string(),
            format: ModelFormat::Json,
            stage1_file: "isolation_forest.json".to_string(),
            stage2_file: "fraud_classifier.json".to_string(),
            explain: true,
            onnx_threads: 1,
        }
    }

    #[test]
    fn test_load_json_models() {
        let dir = tempfile::tempdir().unwrap();
        write_models(dir.path());

        let models = ModelLoader::new()
            .load_all_models(&models_config(dir.path()))
            .unwrap();

        assert_eq!(models.stage1.name(), STAGE1_MODEL);
        assert_eq!(models.stage2.name(), STAGE2_MODEL);
        assert!(models.explainer.is_some());
    }

    #[test]
    fn test_explainer_disabled() {
        let dir = tempfile::tempdir().unwrap();
        write_models(dir.path());
        let mut config = models_config(dir.path());
        config.explain = false;

        let models = ModelLoader::new().load_all_models(&config).unwrap();
        assert!(models.explainer.is_none());
    }

    #[test]
    fn test_missing_file_is_model_unavailable() {
        let dir = tempfile::tempdir().unwrap();

        let err = ModelLoader::new()
            .load_all_models(&models_config(dir.path()))
            .err()
            .unwrap();

        match err {
            ScoringError::ModelUnavailable { model, .. } => assert_eq!(model, STAGE1_MODEL),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_schema_drift_surfaces_as_schema_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_models(dir.path());
        let drifted = serde_json::json!({
            "feature_names": ["amount", "hour_of_day"],
            "trees": [{"nodeid": 0, "leaf": 0.0, "cover": 1.0}]
        });
        std::fs::write(dir.path().join("fraud_classifier.json"), drifted.to_string()).unwrap();

        let err = ModelLoader::new()
            .load_all_models(&models_config(dir.path()))
            .err()
            .unwrap();
        assert!(matches!(err, ScoringError::SchemaMismatch { .. }));
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_onnx_without_feature_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = models_config(dir.path());
        config.format = ModelFormat::Onnx;

        let err = ModelLoader::new().load_all_models(&config).err().unwrap();
        assert!(matches!(err, ScoringError::ModelUnavailable { .. }));
    }
}
