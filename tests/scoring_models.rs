use fraud_scoring_pipeline::config::{ModelFormat, ModelsConfig, VelocityConfig};
use fraud_scoring_pipeline::metrics::PipelineMetrics;
use fraud_scoring_pipeline::models::{IsolationForest, TreeEnsemble};
use fraud_scoring_pipeline::types::Stage;
use fraud_scoring_pipeline::velocity::VelocityTracker;
use fraud_scoring_pipeline::{
    FeatureExtractor, RawTransaction, ScoringError, ScoringPipeline, TransactionService,
    TransactionType, FEATURE_NAMES,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn shipped_models() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("models")
}

/// Copy the shipped artifacts into a scratch directory
fn scratch_models() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for file in ["isolation_forest.json", "fraud_classifier.json"] {
        std::fs::copy(shipped_models().join(file), dir.path().join(file)).unwrap();
    }
    dir
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

fn user_d() -> RawTransaction {
    RawTransaction::debit(2, 1_500_000.0, 1_500_000.0, TransactionType::Transfer)
        .with_parties("USER_D", "M_SIM")
}

#[test]
fn test_everyday_cash_out_passes_stage1() {
    let dir = scratch_models();
    let pipeline = ScoringPipeline::from_config(&models_config(dir.path())).unwrap();

    let tx = RawTransaction::new(10, 1000.0, 50000.0, 49000.0)
        .with_type(TransactionType::CashOut)
        .with_activity(0.0, 1);
    let verdict = pipeline.score(&tx).unwrap();

    assert_eq!(verdict.is_fraud, 0);
    assert_eq!(verdict.stage, Stage::AnomalyScan);
    assert!(verdict.attribution.is_none());
}

#[test]
fn test_account_draining_transfer_is_fraud() {
    let dir = scratch_models();
    let pipeline = ScoringPipeline::from_config(&models_config(dir.path())).unwrap();

    let verdict = pipeline.score(&user_d()).unwrap();

    assert_eq!(verdict.is_fraud, 1);
    assert_eq!(verdict.stage, Stage::DeepAnalysis);
    assert_eq!(verdict.details, "flagged and analyzed");
}

#[test]
fn test_attribution_reconstructs_raw_score() {
    let dir = scratch_models();
    let pipeline = ScoringPipeline::from_config(&models_config(dir.path())).unwrap();
    let classifier =
        TreeEnsemble::from_file(dir.path().join("fraud_classifier.json"), "fraud_classifier")
            .unwrap();

    let tx = user_d();
    let verdict = pipeline.score(&tx).unwrap();
    let attribution = verdict.attribution.unwrap();
    let base_value = verdict.base_value.unwrap();

    let names: Vec<&str> = attribution.iter().map(|(name, _)| name).collect();
    assert_eq!(names, FEATURE_NAMES.to_vec());

    let features = FeatureExtractor::new().extract(&tx).unwrap();
    let raw = classifier.raw_score(&features);
    assert!((raw - 2.7).abs() < 1e-9);
    assert!((base_value - -1.502).abs() < 1e-9);
    assert!((base_value + attribution.total() - raw).abs() < 1e-9);

    // no tree splits on these
    for name in ["day_of_week", "is_new_recipient", "senderBalanceError"] {
        assert_eq!(attribution.get(name), Some(0.0));
    }
    assert!(attribution.get("isOrigAccountEmpty").unwrap() > 0.0);
}

#[test]
fn test_forest_scores_match_fitted_offset() {
    let forest =
        IsolationForest::from_file(shipped_models().join("isolation_forest.json"), "forest")
            .unwrap();
    let extractor = FeatureExtractor::new();

    let normal = extractor
        .extract(&RawTransaction::debit(
            10,
            2000.0,
            80000.0,
            TransactionType::CashOut,
        ))
        .unwrap();
    let drained = extractor.extract(&user_d()).unwrap();

    assert!(forest.decision_function(&normal) > 0.0);
    assert!(forest.decision_function(&drained) < 0.0);
    assert!(forest.score_samples(&drained) < forest.score_samples(&normal));
}

#[test]
fn test_schema_drift_refuses_to_load() {
    let dir = scratch_models();
    let path = dir.path().join("isolation_forest.json");
    let mut forest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    forest["feature_names"]
        .as_array_mut()
        .unwrap()
        .swap(3, 4);
    std::fs::write(&path, forest.to_string()).unwrap();

    let err = ScoringPipeline::from_config(&models_config(dir.path()))
        .err()
        .unwrap();
    assert!(matches!(err, ScoringError::SchemaMismatch { .. }));
}

#[test]
fn test_missing_classifier_refuses_to_load() {
    let dir = scratch_models();
    std::fs::remove_file(dir.path().join("fraud_classifier.json")).unwrap();

    let err = ScoringPipeline::from_config(&models_config(dir.path()))
        .err()
        .unwrap();
    assert_eq!(err.code(), "model_unavailable");
}

#[test]
fn test_comprehensive_simulation() {
    let dir = scratch_models();
    let pipeline = ScoringPipeline::from_config(&models_config(dir.path())).unwrap();
    let service = TransactionService::new(
        Arc::new(pipeline),
        Arc::new(VelocityTracker::new(&VelocityConfig::default())),
        Arc::new(PipelineMetrics::new()),
        3,
    );

    let scenarios = [
        ("USER_A", TransactionType::CashOut, 2000.0, 80000.0, 10),
        ("USER_B", TransactionType::CashOut, 15000.0, 100000.0, 14),
        ("USER_B", TransactionType::CashOut, 25000.0, 85000.0, 14),
        ("USER_B", TransactionType::CashOut, 20000.0, 60000.0, 14),
        ("USER_D", TransactionType::Transfer, 1500000.0, 1500000.0, 2),
    ];

    let responses: Vec<_> = scenarios
        .iter()
        .map(|&(user, tx_type, amount, balance, step)| {
            let tx = RawTransaction::debit(step, amount, balance, tx_type).with_parties(user, "M_SIM");
            service.handle(&serde_json::to_vec(&tx).unwrap())
        })
        .collect();

    let stages: Vec<u8> = responses
        .iter()
        .map(|r| u8::from(r.verdict.as_ref().unwrap().stage))
        .collect();
    assert_eq!(stages, vec![1, 1, 1, 1, 2]);

    let alerts: Vec<bool> = responses
        .iter()
        .map(|r| r.velocity.unwrap().alert)
        .collect();
    assert_eq!(alerts, vec![false, false, false, true, false]);

    let fraud = &responses[4];
    assert!(fraud.verdict.as_ref().unwrap().is_fraud());
    assert_eq!(fraud.top_features.len(), 3);
    assert_eq!(fraud.top_features[0].feature, "isOrigAccountEmpty");
}
