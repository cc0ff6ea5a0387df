//! Background queue handoff
//!
//! Long enrichment runs are handed to a queue consumer instead of running in
//! the request's own short-lived context. Delivery is at-least-once, so the
//! consumer ([`EnrichmentRunner::drain`]) must be idempotent.

use crate::services::orchestrator::{EnrichOutcome, EnrichmentRunner, PipelineError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Messages understood by the consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueMessage {
    #[serde(rename = "enrich-collection", rename_all = "camelCase")]
    EnrichCollection {
        user_id: String,
        external_username: String,
    },
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue closed")]
    Closed,

    #[error("Queue message codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn send(&self, message: QueueMessage) -> Result<(), QueueError>;
}

/// In-process queue over a tokio channel
///
/// Messages cross the channel as JSON text, the same shape an external
/// queue would carry.
#[derive(Clone)]
pub struct ChannelQueue {
    tx: mpsc::Sender<String>,
}

pub struct QueueReceiver {
    rx: mpsc::Receiver<String>,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> (Self, QueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, QueueReceiver { rx })
    }
}

#[async_trait]
impl TaskQueue for ChannelQueue {
    async fn send(&self, message: QueueMessage) -> Result<(), QueueError> {
        let body = serde_json::to_string(&message)?;
        self.tx.send(body).await.map_err(|_| QueueError::Closed)
    }
}

impl QueueReceiver {
    /// Next message; `None` once every sender is dropped and the queue is empty
    pub async fn recv(&mut self) -> Option<Result<QueueMessage, QueueError>> {
        let body = self.rx.recv().await?;
        Some(serde_json::from_str(&body).map_err(QueueError::from))
    }

    /// Take whatever is queued right now without waiting
    pub fn try_recv(&mut self) -> Option<Result<QueueMessage, QueueError>> {
        let body = self.rx.try_recv().ok()?;
        Some(serde_json::from_str(&body).map_err(QueueError::from))
    }
}

/// Process one delivered message
///
/// On error, progress up to the failed batch is already persisted and a
/// redelivery resumes from there.
pub async fn handle_message(
    runner: &EnrichmentRunner,
    message: QueueMessage,
) -> Result<EnrichOutcome, PipelineError> {
    match message {
        QueueMessage::EnrichCollection {
            user_id,
            external_username,
        } => {
            info!(user_id = %user_id, username = %external_username, "Queue: enrichment drain starting");
            let outcome = runner.drain(&user_id).await.map_err(|e| {
                error!(user_id = %user_id, error = %e, "Queue: enrichment drain failed");
                e
            })?;
            info!(user_id = %user_id, outcome = outcome_label(&outcome), "Queue: enrichment drain finished");
            Ok(outcome)
        }
    }
}

/// Consume until the queue closes
pub async fn run_consumer(runner: Arc<EnrichmentRunner>, mut receiver: QueueReceiver) {
    while let Some(delivery) = receiver.recv().await {
        match delivery {
            Ok(message) => {
                // Failures are logged in handle_message; keep consuming
                let _ = handle_message(&runner, message).await;
            }
            Err(e) => warn!(error = %e, "Queue: dropping undecodable message"),
        }
    }
    info!("Queue consumer stopped");
}

fn outcome_label(outcome: &EnrichOutcome) -> &'static str {
    match outcome {
        EnrichOutcome::Complete(_) => "complete",
        EnrichOutcome::Batch(_) => "partial",
        EnrichOutcome::Queued => "queued",
        EnrichOutcome::Busy => "busy",
        EnrichOutcome::Superseded => "superseded",
    }
}
