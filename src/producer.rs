//! NATS publisher for scoring responses

use crate::service::ScoringResponse;
use anyhow::Result;
use async_nats::{Client, Subject};
use tracing::{debug, error};

/// Publishes every response on the verdict subject, and to the requester's
/// reply inbox when there is one
#[derive(Clone)]
pub struct VerdictPublisher {
    client: Client,
    subject: String,
}

impl VerdictPublisher {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    pub async fn publish(&self, response: &ScoringResponse, reply: Option<Subject>) -> Result<()> {
        let payload = encode(response)?;

        if let Some(reply) = reply {
            if let Err(e) = self.client.publish(reply.clone(), payload.clone().into()).await {
                error!(
                    request_id = %response.request_id,
                    reply = %reply,
                    error = %e,
                    "Failed to send reply"
                );
            }
        }

        self.client
            .publish(self.subject.clone(), payload.into())
            .await?;

        debug!(
            request_id = %response.request_id,
            subject = %self.subject,
            is_error = response.is_error(),
            "Published scoring response"
        );

        Ok(())
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Wire encoding shared by the reply and the verdict subject
pub fn encode(response: &ScoringResponse) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(response)?)
}
