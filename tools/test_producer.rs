//! Test Transaction Producer
//!
//! Replays the fixed simulation scenarios, then publishes random legitimate
//! and suspicious transactions, printing the verdict the service replies with.
//!
//! Usage: test_producer [nats_url] [subject] [count] [fraud_rate] [delay_ms]

use fraud_scoring_pipeline::service::ScoringResponse;
use fraud_scoring_pipeline::{RawTransaction, TransactionType};
use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};

/// One scripted transaction: sender, type, amount, balance, step
struct Scenario {
    user: &'static str,
    tx_type: TransactionType,
    amount: f64,
    old_balance: f64,
    step: u64,
}

/// Normal cash-out, a burst of three cash-outs from one user, and an
/// account-draining transfer at 2am.
const SIMULATION: [Scenario; 5] = [
    Scenario {
        user: "USER_A",
        tx_type: TransactionType::CashOut,
        amount: 2000.0,
        old_balance: 80000.0,
        step: 10,
    },
    Scenario {
        user: "USER_B",
        tx_type: TransactionType::CashOut,
        amount: 15000.0,
        old_balance: 100000.0,
        step: 14,
    },
    Scenario {
        user: "USER_B",
        tx_type: TransactionType::CashOut,
        amount: 25000.0,
        old_balance: 85000.0,
        step: 14,
    },
    Scenario {
        user: "USER_B",
        tx_type: TransactionType::CashOut,
        amount: 20000.0,
        old_balance: 60000.0,
        step: 14,
    },
    Scenario {
        user: "USER_D",
        tx_type: TransactionType::Transfer,
        amount: 1500000.0,
        old_balance: 1500000.0,
        step: 2,
    },
];

impl Scenario {
    fn to_transaction(&self) -> RawTransaction {
        RawTransaction::debit(self.step, self.amount, self.old_balance, self.tx_type)
            .with_parties(self.user, "M_SIM")
    }
}

/// Random transaction generator
struct TransactionGenerator {
    rng: rand::rngs::ThreadRng,
    transaction_counter: u64,
}

impl TransactionGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            transaction_counter: 0,
        }
    }

    fn random_type(&mut self) -> TransactionType {
        if self.rng.gen_bool(0.5) {
            TransactionType::CashOut
        } else {
            TransactionType::Transfer
        }
    }

    /// Daytime, partial debit, known recipient, unhurried
    fn generate_legitimate(&mut self) -> RawTransaction {
        self.transaction_counter += 1;
        let amount: f64 = self.rng.gen_range(10.0..5000.0);
        let old_balance = amount + self.rng.gen_range(1000.0..100000.0);
        let step = self.rng.gen_range(0..30) * 24 + self.rng.gen_range(8..20);
        let tx_type = self.random_type();

        let mut tx = RawTransaction::debit(step, amount, old_balance, tx_type)
            .with_parties(
                &format!("C{:09}", self.rng.gen_range(0..1_000_000_000u64)),
                &format!("M{:09}", self.transaction_counter),
            )
            .with_activity(self.rng.gen_range(600.0..86400.0), self.rng.gen_range(0..3));
        tx.amount_deviation_from_avg = Some(self.rng.gen_range(-200.0..200.0));
        tx.is_new_recipient = Some(0);
        tx
    }

    /// Night-time transfer that empties the account to a new recipient
    fn generate_suspicious(&mut self) -> RawTransaction {
        self.transaction_counter += 1;
        let amount: f64 = self.rng.gen_range(50000.0..2000000.0);
        let step = self.rng.gen_range(0..30) * 24 + self.rng.gen_range(0..6);

        let mut tx = RawTransaction::debit(step, amount, amount, TransactionType::Transfer)
            .with_parties(
                &format!("C{:09}", self.rng.gen_range(0..1_000_000_000u64)),
                &format!("C{:09}", self.transaction_counter),
            )
            .with_activity(self.rng.gen_range(1.0..60.0), self.rng.gen_range(5..15));
        tx.amount_deviation_from_avg = Some(amount * self.rng.gen_range(0.5..0.9));
        tx.is_new_recipient = Some(1);
        tx
    }
}

fn describe(response: &ScoringResponse) -> String {
    match (&response.verdict, &response.error) {
        (Some(verdict), _) => {
            let outcome = if verdict.is_fraud() { "FRAUD" } else { "legitimate" };
            let mut line = format!("stage {} -> {} ({})", u8::from(verdict.stage), outcome, verdict.details);
            if let Some(velocity) = response.velocity.filter(|v| v.alert) {
                line.push_str(&format!(
                    " [velocity alert: {} tx in {}s]",
                    velocity.tx_in_window, velocity.window_secs
                ));
            }
            for feature in &response.top_features {
                line.push_str(&format!("\n    {:>28}: {:+.4}", feature.feature, feature.value));
            }
            line
        }
        (None, Some(error)) => format!("rejected: {} ({})", error.message, error.code),
        (None, None) => "empty response".to_string(),
    }
}

/// Send one transaction and print the service's reply
async fn score(
    client: &async_nats::Client,
    subject: &str,
    label: &str,
    tx: &RawTransaction,
) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(tx)?;
    match client.request(subject.to_string(), payload.into()).await {
        Ok(reply) => match serde_json::from_slice::<ScoringResponse>(&reply.payload) {
            Ok(response) => info!("{} {}: {}", label, tx.name_orig, describe(&response)),
            Err(e) => warn!(error = %e, "Unreadable reply"),
        },
        Err(e) => warn!(error = %e, "No reply from scoring service"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Transaction Producer");

    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("transactions");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let fraud_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.1);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count = count,
        fraud_rate = fraud_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(count, fraud_rate);
        }
    };

    info!("Running comprehensive simulation ({} scenarios)", SIMULATION.len());
    for (i, scenario) in SIMULATION.iter().enumerate() {
        score(&client, subject, &format!("[sim {}]", i + 1), &scenario.to_transaction()).await?;
    }

    let mut generator = TransactionGenerator::new();
    let mut rng = rand::thread_rng();
    let mut legitimate_count = 0;
    let mut suspicious_count = 0;

    info!("Publishing {} random transactions...", count);

    for i in 0..count {
        let (label, tx) = if rng.gen_bool(fraud_rate) {
            suspicious_count += 1;
            ("[suspicious]", generator.generate_suspicious())
        } else {
            legitimate_count += 1;
            ("[legitimate]", generator.generate_legitimate())
        };

        score(&client, subject, label, &tx).await?;

        if (i + 1) % 10 == 0 {
            info!(
                "Sent {}/{} transactions ({} legitimate, {} suspicious)",
                i + 1,
                count,
                legitimate_count,
                suspicious_count
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    info!(
        "Completed! Sent {} transactions ({} legitimate, {} suspicious)",
        count, legitimate_count, suspicious_count
    );

    Ok(())
}

fn run_dry_mode(count: u64, fraud_rate: f64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    for (i, scenario) in SIMULATION.iter().enumerate() {
        let json = serde_json::to_string(&scenario.to_transaction())?;
        info!("Scenario {}: {}", i + 1, json);
    }

    let mut generator = TransactionGenerator::new();
    let mut rng = rand::thread_rng();

    for i in 0..count {
        let transaction = if rng.gen_bool(fraud_rate) {
            generator.generate_suspicious()
        } else {
            generator.generate_legitimate()
        };

        if (i + 1) % 10 == 0 || i == 0 {
            let json = serde_json::to_string_pretty(&transaction)?;
            info!("Sample transaction {}:\n{}", i + 1, json);
        }
    }

    Ok(())
}
