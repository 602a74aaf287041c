//! Two-stage scoring pipeline.
//!
//! Stage 1 (anomaly filter) clears most traffic cheaply. Only transactions it
//! flags reach Stage 2 (fraud classifier) and, if enabled, the explainer. Both
//! stages see the same feature vector.

use crate::attribution::Explainer;
use crate::config::ModelsConfig;
use crate::error::Result;
use crate::feature_extractor::{FeatureExtractor, FeatureVector};
use crate::models::{AnomalyScorer, FraudClassifier, LoadedModels, ModelLoader, NORMAL_LABEL};
use crate::types::transaction::RawTransaction;
use crate::types::verdict::Verdict;
use std::sync::Arc;
use tracing::{debug, info};

/// Progress of one scoring call.
#[derive(Debug)]
enum ScoringState {
    AwaitingStage1,
    AwaitingStage2(FeatureVector),
    Done(Verdict),
}

/// Stateless, reentrant scorer. Share it behind an `Arc`; every model it
/// holds is read-only.
#[derive(Clone)]
pub struct ScoringPipeline {
    extractor: FeatureExtractor,
    stage1: Arc<dyn AnomalyScorer>,
    stage2: Arc<dyn FraudClassifier>,
    explainer: Option<Arc<dyn Explainer>>,
}

impl ScoringPipeline {
    pub fn new(
        stage1: Arc<dyn AnomalyScorer>,
        stage2: Arc<dyn FraudClassifier>,
        explainer: Option<Arc<dyn Explainer>>,
    ) -> Self {
        Self {
            extractor: FeatureExtractor::new(),
            stage1,
            stage2,
            explainer,
        }
    }

    pub fn from_models(models: LoadedModels) -> Self {
        Self::new(models.stage1, models.stage2, models.explainer)
    }

    /// Load every model named in `config` and build the pipeline.
    pub fn from_config(config: &ModelsConfig) -> Result<Self> {
        let loader = ModelLoader::with_threads(config.onnx_threads);
        let models = loader.load_all_models(config)?;
        info!(
            stage1 = %models.stage1.name(),
            stage2 = %models.stage2.name(),
            explain = models.explainer.is_some(),
            "Scoring pipeline ready"
        );
        Ok(Self::from_models(models))
    }

    pub fn explains(&self) -> bool {
        self.explainer.is_some()
    }

    /// Score one transaction.
    ///
    /// Any failure is returned as-is; there is no fallback verdict.
    pub fn score(&self, tx: &RawTransaction) -> Result<Verdict> {
        let features = self.extractor.extract(tx)?;
        let mut state = ScoringState::AwaitingStage1;

        loop {
            state = match state {
                ScoringState::AwaitingStage1 => self.run_stage1(features)?,
                ScoringState::AwaitingStage2(features) => self.run_stage2(&features)?,
                ScoringState::Done(verdict) => return Ok(verdict),
            };
        }
    }

    fn run_stage1(&self, features: FeatureVector) -> Result<ScoringState> {
        let label = self.stage1.predict(&features)?;

        if label == NORMAL_LABEL {
            debug!(model = %self.stage1.name(), label = label, "Stage 1 passed");
            Ok(ScoringState::Done(Verdict::passed()))
        } else {
            debug!(model = %self.stage1.name(), label = label, "Stage 1 flagged anomaly");
            Ok(ScoringState::AwaitingStage2(features))
        }
    }

    fn run_stage2(&self, features: &FeatureVector) -> Result<ScoringState> {
        let is_fraud = self.stage2.predict(features)?;

        let attribution = match &self.explainer {
            Some(explainer) => Some(explainer.explain(features)?),
            None => None,
        };

        debug!(
            model = %self.stage2.name(),
            is_fraud = is_fraud,
            explained = attribution.is_some(),
            "Stage 2 complete"
        );

        Ok(ScoringState::Done(Verdict::analyzed(is_fraud, attribution)))
    }
}
