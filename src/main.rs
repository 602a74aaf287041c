//! Fraud Scoring Service - Main Entry Point
//!
//! Consumes transactions from NATS, scores them through the two-stage
//! pipeline, and publishes a response per transaction. Messages are scored in
//! parallel, bounded by `pipeline.workers`.

use anyhow::Result;
use fraud_scoring_pipeline::{
    config::{AppConfig, LoggingConfig},
    consumer::TransactionConsumer,
    feature_extractor::FeatureExtractor,
    metrics::{MetricsReporter, PipelineMetrics},
    pipeline::ScoringPipeline,
    producer::VerdictPublisher,
    service::TransactionService,
    velocity::VelocityTracker,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path =
        std::env::var("FRAUD_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
    let config = AppConfig::load_from_path(&config_path)?;
    init_logging(&config.logging);

    info!("Starting Fraud Scoring Service");
    info!(path = %config_path, "Configuration loaded successfully");

    let extractor = FeatureExtractor::new();
    info!(
        "Feature schema: {} features {:?}",
        extractor.feature_count(),
        extractor.feature_names()
    );

    // A missing model is fatal: never serve with a stage absent
    let pipeline = match ScoringPipeline::from_config(&config.models) {
        Ok(pipeline) => Arc::new(pipeline),
        Err(e) => {
            error!(code = e.code(), error = %e, "Refusing to start");
            return Err(e.into());
        }
    };

    let metrics = Arc::new(PipelineMetrics::new());
    let velocity = Arc::new(VelocityTracker::new(&config.velocity));
    let service = Arc::new(TransactionService::new(
        pipeline.clone(),
        velocity,
        metrics.clone(),
        config.pipeline.top_features,
    ));

    // Connect to NATS
    let client = async_nats::connect(&config.nats.url).await?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = TransactionConsumer::new(client.clone(), &config.nats);
    let publisher = Arc::new(VerdictPublisher::new(
        client.clone(),
        &config.nats.verdict_subject,
    ));

    let num_workers = config.pipeline.workers.max(1);
    info!(
        workers = num_workers,
        explain = pipeline.explains(),
        velocity_window_secs = config.velocity.window_secs,
        "Starting transaction processing loop"
    );
    info!("Listening on subject: {}", consumer.subject());
    info!("Publishing verdicts to: {}", publisher.subject());

    // Semaphore to limit concurrent processing
    let semaphore = Arc::new(Semaphore::new(num_workers));
    let processed_count = Arc::new(AtomicU64::new(0));

    // Print a summary every 30 seconds
    let reporter = MetricsReporter::new(metrics.clone(), 30);
    tokio::spawn(reporter.start());

    let mut subscription = consumer.subscribe().await?;

    while let Some(message) = subscription.next().await {
        let permit = semaphore.clone().acquire_owned().await?;

        let service = service.clone();
        let publisher = publisher.clone();
        let metrics = metrics.clone();
        let processed_count = processed_count.clone();

        tokio::spawn(async move {
            // Scoring is CPU-bound; keep it off the async workers
            let payload = message.payload.clone();
            let response = match tokio::task::spawn_blocking(move || service.handle(&payload)).await
            {
                Ok(response) => response,
                Err(e) => {
                    error!(error = %e, "Scoring task panicked");
                    drop(permit);
                    return;
                }
            };

            if let Err(e) = publisher.publish(&response, message.reply.clone()).await {
                error!(
                    request_id = %response.request_id,
                    error = %e,
                    "Failed to publish scoring response"
                );
            }

            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;

            // Log progress every 100 transactions
            if count % 100 == 0 {
                let processing_stats = metrics.get_processing_stats();
                info!(
                    processed = count,
                    throughput = format!("{:.1} tx/s", metrics.get_throughput()),
                    avg_latency_us = processing_stats.mean_us,
                    "Processing milestone"
                );
            }

            drop(permit);
        });
    }

    info!("Service shutting down...");
    metrics.print_summary();

    Ok(())
}

/// Initialize tracing from `[logging]`. `RUST_LOG` wins over the configured
/// level when set.
fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init();
    }
}
