//! Handle for a running email pipeline.

use std::sync::Arc;

use calendar_core::{MessageBroker, PipelineEvent, PipelineStats, QueueConfig, QueueMessage};
use ractor::{Actor, ActorRef};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::PipelineError;
use crate::extractor::EventExtractor;
use crate::messages::SupervisorMessage;
use crate::supervisor::{PipelineSupervisor, SupervisorArgs};

/// Publishes email events onto the work queue.
///
/// Cheap to clone; hand one to every producer.
#[derive(Clone)]
pub struct EmailPublisher {
    broker: Arc<dyn MessageBroker>,
    work_queue: String,
    supervisor: ActorRef<SupervisorMessage>,
}

impl EmailPublisher {
    /// Queue an email for extraction as a first attempt.
    ///
    /// Returns only after the broker has accepted the message.
    pub async fn publish_email_event(
        &self,
        email_content: &str,
        user_id: &str,
    ) -> Result<(), PipelineError> {
        let message = QueueMessage::new(email_content, user_id);
        let publishing = message.to_publishing()?;

        self.broker
            .publish(&self.work_queue, publishing)
            .await
            .map_err(PipelineError::Publish)?;

        tracing::debug!("Published email event for user {}", user_id);
        let _ = self.supervisor.send_message(SupervisorMessage::BroadcastEvent {
            event: PipelineEvent::Published {
                user_id: message.user_id,
                timestamp: message.timestamp,
            },
        });
        Ok(())
    }
}

/// A running pipeline: declared queues, a supervised consumer pool, and a
/// publisher for new email events.
pub struct EmailPipeline {
    config: Arc<QueueConfig>,
    broker: Arc<dyn MessageBroker>,
    supervisor: ActorRef<SupervisorMessage>,
    handle: JoinHandle<()>,
    publisher: EmailPublisher,
}

impl EmailPipeline {
    /// Declare the work and dead-letter queues and start consuming.
    pub async fn start(
        config: QueueConfig,
        broker: Arc<dyn MessageBroker>,
        extractor: Arc<dyn EventExtractor>,
    ) -> Result<Self, PipelineError> {
        broker
            .declare_queue(&config.work_queue)
            .await
            .map_err(PipelineError::Broker)?;
        broker
            .declare_queue(&config.dead_letter_queue)
            .await
            .map_err(PipelineError::Broker)?;

        let config = Arc::new(config);
        let args = SupervisorArgs {
            config: config.clone(),
            broker: broker.clone(),
            extractor,
        };
        let (supervisor, handle) = Actor::spawn(None, PipelineSupervisor, args)
            .await
            .map_err(|e| PipelineError::Spawn(e.to_string()))?;

        tracing::info!(
            "Email pipeline consuming {} (dead letters to {})",
            config.work_queue,
            config.dead_letter_queue
        );

        let publisher = EmailPublisher {
            broker: broker.clone(),
            work_queue: config.work_queue.clone(),
            supervisor: supervisor.clone(),
        };

        Ok(Self {
            config,
            broker,
            supervisor,
            handle,
            publisher,
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn broker(&self) -> Arc<dyn MessageBroker> {
        self.broker.clone()
    }

    pub fn publisher(&self) -> EmailPublisher {
        self.publisher.clone()
    }

    /// See [`EmailPublisher::publish_email_event`].
    pub async fn publish_email_event(
        &self,
        email_content: &str,
        user_id: &str,
    ) -> Result<(), PipelineError> {
        self.publisher
            .publish_email_event(email_content, user_id)
            .await
    }

    /// Stream of pipeline events emitted from now on.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<PipelineEvent>, PipelineError> {
        let (tx, rx) = broadcast::channel(1024);
        self.supervisor
            .send_message(SupervisorMessage::Subscribe { sender: tx })
            .map_err(|e| PipelineError::Actor(format!("Failed to subscribe: {}", e)))?;
        Ok(rx)
    }

    /// Running totals since start.
    pub async fn stats(&self) -> Result<PipelineStats, PipelineError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.supervisor
            .send_message(SupervisorMessage::GetStats { reply: tx.into() })
            .map_err(|e| PipelineError::Actor(format!("Failed to send message: {}", e)))?;
        rx.await
            .map_err(|_| PipelineError::Actor("Failed to receive stats".into()))
    }

    pub async fn consumer_count(&self) -> Result<usize, PipelineError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.supervisor
            .send_message(SupervisorMessage::ConsumerCount { reply: tx.into() })
            .map_err(|e| PipelineError::Actor(format!("Failed to send message: {}", e)))?;
        rx.await
            .map_err(|_| PipelineError::Actor("Failed to receive consumer count".into()))
    }

    /// Stop consuming. Each consumer finishes its current delivery first;
    /// deliveries waiting on a retry are returned to the broker for redelivery.
    pub async fn stop(&self) -> Result<(), PipelineError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.supervisor
            .send_message(SupervisorMessage::StopConsumers { reply: tx.into() })
            .map_err(|e| PipelineError::Actor(format!("Failed to send message: {}", e)))?;
        rx.await
            .map_err(|_| PipelineError::Actor("Failed to stop consumers".into()))
    }

    /// Stop consuming, shut the supervisor down and close the broker.
    pub async fn close(self) -> Result<(), PipelineError> {
        self.stop().await?;
        self.supervisor.stop(None);
        if let Err(e) = self.handle.await {
            tracing::warn!("Pipeline supervisor exited abnormally: {}", e);
        }
        self.broker.close().await.map_err(PipelineError::Broker)?;
        tracing::info!("Email pipeline closed");
        Ok(())
    }
}
