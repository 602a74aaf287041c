//! Throughput, stage routing and latency tracking for the scoring service.

use crate::types::verdict::{Stage, Verdict};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for the scoring service
pub struct PipelineMetrics {
    /// Transactions that produced a verdict
    pub transactions_processed: AtomicU64,
    /// Verdicts issued by the anomaly filter
    pub stage1_passed: AtomicU64,
    /// Transactions escalated to the classifier
    pub stage2_escalated: AtomicU64,
    /// Stage 2 verdicts with `isFraud = 1`
    pub fraud_confirmed: AtomicU64,
    /// Requests that failed validation or scoring
    pub requests_rejected: AtomicU64,
    /// Velocity alerts raised
    pub velocity_alerts: AtomicU64,
    /// Processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            transactions_processed: AtomicU64::new(0),
            stage1_passed: AtomicU64::new(0),
            stage2_escalated: AtomicU64::new(0),
            fraud_confirmed: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            velocity_alerts: AtomicU64::new(0),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            start_time: Instant::now(),
        }
    }

    /// Record a scored transaction
    pub fn record_verdict(&self, verdict: &Verdict, processing_time: Duration) {
        self.transactions_processed.fetch_add(1, Ordering::Relaxed);

        match verdict.stage {
            Stage::AnomalyScan => {
                self.stage1_passed.fetch_add(1, Ordering::Relaxed);
            }
            Stage::DeepAnalysis => {
                self.stage2_escalated.fetch_add(1, Ordering::Relaxed);
                if verdict.is_fraud() {
                    self.fraud_confirmed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            // Keep only last 10000
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }
    }

    pub fn record_rejection(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_velocity_alert(&self) {
        self.velocity_alerts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let times = match self.processing_times.read() {
            Ok(times) => times,
            Err(_) => return ProcessingStats::default(),
        };
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[(count as f64 * 0.95) as usize],
            p99_us: sorted[(count as f64 * 0.99) as usize],
            max_us: sorted[count - 1],
        }
    }

    /// Get current throughput (transactions per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.transactions_processed.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Share of processed transactions the anomaly filter cleared
    pub fn stage1_pass_rate(&self) -> f64 {
        let processed = self.transactions_processed.load(Ordering::Relaxed);
        if processed == 0 {
            return 0.0;
        }
        self.stage1_passed.load(Ordering::Relaxed) as f64 / processed as f64
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let processed = self.transactions_processed.load(Ordering::Relaxed);
        let escalated = self.stage2_escalated.load(Ordering::Relaxed);
        let fraud = self.fraud_confirmed.load(Ordering::Relaxed);
        let rejected = self.requests_rejected.load(Ordering::Relaxed);
        let velocity = self.velocity_alerts.load(Ordering::Relaxed);
        let confirm_rate = if escalated > 0 {
            (fraud as f64 / escalated as f64) * 100.0
        } else {
            0.0
        };

        let processing = self.get_processing_stats();
        let throughput = self.get_throughput();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║             FRAUD SCORING PIPELINE - METRICS SUMMARY         ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Transactions Scored:    {:>8}  │  Throughput: {:>6.1} tx/s ║",
            processed, throughput
        );
        info!(
            "║ Stage 1 Pass Rate:      {:>7.1}%  │  Rejected:   {:>8}    ║",
            self.stage1_pass_rate() * 100.0,
            rejected
        );
        info!(
            "║ Escalated to Stage 2:   {:>8}  │  Confirmed:  {:>5.1}%     ║",
            escalated, confirm_rate
        );
        info!(
            "║ Fraud Verdicts:         {:>8}  │  Velocity:   {:>8}    ║",
            fraud, velocity
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Processing Time (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Real-time metrics reporter that prints periodic summaries
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_routing_counters() {
        let metrics = PipelineMetrics::new();

        metrics.record_verdict(&Verdict::passed(), Duration::from_micros(100));
        metrics.record_verdict(&Verdict::passed(), Duration::from_micros(120));
        metrics.record_verdict(&Verdict::analyzed(1, None), Duration::from_micros(400));
        metrics.record_verdict(&Verdict::analyzed(0, None), Duration::from_micros(300));
        metrics.record_rejection();

        assert_eq!(metrics.transactions_processed.load(Ordering::Relaxed), 4);
        assert_eq!(metrics.stage1_passed.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.stage2_escalated.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.fraud_confirmed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.requests_rejected.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.stage1_pass_rate(), 0.5);
    }

    #[test]
    fn test_processing_stats() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.get_processing_stats().count, 0);

        for us in [100, 200, 300, 400] {
            metrics.record_verdict(&Verdict::passed(), Duration::from_micros(us));
        }

        let stats = metrics.get_processing_stats();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean_us, 250);
        assert_eq!(stats.p50_us, 300);
        assert_eq!(stats.max_us, 400);
    }
}
