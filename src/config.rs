//! Configuration management for the scoring service

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// On-disk format of the model artifacts
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    /// Native JSON tree dumps - supports attribution
    #[default]
    Json,
    /// ONNX graphs run through ONNX Runtime (requires the `onnx` feature)
    Onnx,
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub models: ModelsConfig,
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub velocity: VelocityConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming transactions
    pub transaction_subject: String,
    /// Subject every verdict is published on
    pub verdict_subject: String,
    /// Queue group shared by service replicas, so each transaction is scored once
    #[serde(default)]
    pub queue_group: Option<String>,
}

/// Model artifacts configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Directory containing the model files
    pub models_dir: String,
    #[serde(default)]
    pub format: ModelFormat,
    /// Stage 1 anomaly filter file, relative to `models_dir`
    #[serde(default = "default_stage1_file")]
    pub stage1_file: String,
    /// Stage 2 classifier file, relative to `models_dir`
    #[serde(default = "default_stage2_file")]
    pub stage2_file: String,
    /// Attach per-feature attribution to Stage 2 verdicts
    #[serde(default = "default_explain")]
    pub explain: bool,
    /// Number of threads for ONNX inference per model
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_stage1_file() -> String {
    "isolation_forest.json".to_string()
}

fn default_stage2_file() -> String {
    "fraud_classifier.json".to_string()
}

fn default_explain() -> bool {
    true
}

fn default_onnx_threads() -> usize {
    1
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum transactions scored concurrently
    pub workers: usize,
    /// Number of attribution entries reported per verdict
    #[serde(default = "default_top_features")]
    pub top_features: usize,
}

fn default_top_features() -> usize {
    5
}

/// Velocity check configuration
#[derive(Debug, Clone, Deserialize)]
pub struct VelocityConfig {
    /// Sliding window length in seconds
    pub window_secs: u64,
    /// Alert when more than this many transactions fall in the window
    pub alert_threshold: usize,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            alert_threshold: 2,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path, with `FRAUD__SECTION__KEY`
    /// environment overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("FRAUD").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                transaction_subject: "transactions".to_string(),
                verdict_subject: "fraud.verdicts".to_string(),
                queue_group: None,
            },
            models: ModelsConfig {
                models_dir: "models".to_string(),
                format: ModelFormat::Json,
                stage1_file: default_stage1_file(),
                stage2_file: default_stage2_file(),
                explain: true,
                onnx_threads: 1,
            },
            pipeline: PipelineConfig {
                workers: 4,
                top_features: 5,
            },
            velocity: VelocityConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
        }
    }
}
