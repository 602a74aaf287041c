//! NATS subscription for incoming transactions

use crate::config::NatsConfig;
use anyhow::Result;
use async_nats::{Client, Subscriber};
use tracing::info;

/// Subscribes the service to the transaction subject
pub struct TransactionConsumer {
    client: Client,
    subject: String,
    queue_group: Option<String>,
}

impl TransactionConsumer {
    pub fn new(client: Client, config: &NatsConfig) -> Self {
        Self {
            client,
            subject: config.transaction_subject.clone(),
            queue_group: config.queue_group.clone(),
        }
    }

    /// Subscribe to the transaction subject, joining the queue group if one
    /// is configured
    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = match &self.queue_group {
            Some(group) => {
                let subscriber = self
                    .client
                    .queue_subscribe(self.subject.clone(), group.clone())
                    .await?;
                info!(subject = %self.subject, queue_group = %group, "Joined transaction queue group");
                subscriber
            }
            None => {
                let subscriber = self.client.subscribe(self.subject.clone()).await?;
                info!(subject = %self.subject, "Subscribed to transaction subject");
                subscriber
            }
        };
        Ok(subscriber)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}
