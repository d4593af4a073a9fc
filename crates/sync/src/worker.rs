//! Sync worker: one NATS queue subscription per email topic, each drained
//! by its own Tokio task.

use crate::handler::SyncHandler;
use outreach_core::config::NatsConfig;
use outreach_core::event_bus::{EmailBatchNotification, EmailTopic};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

/// Connect to the first configured NATS server.
pub async fn connect(config: &NatsConfig) -> anyhow::Result<async_nats::Client> {
    let url = config
        .urls
        .first()
        .cloned()
        .unwrap_or_else(|| "nats://localhost:4222".to_string());
    info!(url = %url, "Connecting to NATS");
    let client = async_nats::ConnectOptions::new()
        .max_reconnects(Some(config.max_reconnects))
        .connect(&url)
        .await?;
    info!("NATS connection established");
    Ok(client)
}

pub struct SyncWorker {
    config: NatsConfig,
    handler: Arc<SyncHandler>,
    handles: Vec<JoinHandle<()>>,
}

impl SyncWorker {
    pub fn new(config: NatsConfig, handler: Arc<SyncHandler>) -> Self {
        Self {
            config,
            handler,
            handles: Vec::new(),
        }
    }

    pub async fn start(&mut self, client: async_nats::Client) -> anyhow::Result<()> {
        for topic in [EmailTopic::Send, EmailTopic::Changed] {
            let subject = topic.subject(&self.config.subject_prefix);
            let subscriber = client
                .queue_subscribe(subject.clone(), self.config.queue_group.clone())
                .await?;
            let handler = self.handler.clone();
            self.handles.push(tokio::spawn(async move {
                info!(subject = %subject, "Sync consumer started");
                consume(topic, subscriber, handler).await;
            }));
        }
        info!(
            consumers = self.handles.len(),
            queue_group = %self.config.queue_group,
            "Sync worker started"
        );
        Ok(())
    }

    /// Block until every consumer ends.
    pub async fn wait(&mut self) {
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Sync consumer task panicked");
            }
        }
    }

    pub fn consumer_count(&self) -> usize {
        self.handles.len()
    }
}

async fn consume(topic: EmailTopic, mut subscriber: async_nats::Subscriber, handler: Arc<SyncHandler>) {
    while let Some(msg) = subscriber.next().await {
        let notification: EmailBatchNotification = match serde_json::from_slice(&msg.payload) {
            Ok(n) => n,
            Err(e) => {
                warn!(topic = ?topic, error = %e, "Failed to deserialize email notification");
                metrics::counter!("outreach_sync_deserialize_errors_total").increment(1);
                continue;
            }
        };
        if let Err(e) = handler.handle(topic, &notification).await {
            error!(
                topic = ?topic,
                count = notification.email_ids.len(),
                error = %e,
                "Email notification handling failed"
            );
            metrics::counter!("outreach_sync_errors_total").increment(1);
        }
    }
    warn!(topic = ?topic, "NATS subscription ended");
}
