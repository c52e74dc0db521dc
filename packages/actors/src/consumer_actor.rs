//! Consumer actor that moves messages from the work queue to their end state.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use calendar_core::{
    BrokerError, DeadLetterReason, Delivery, DeliveryTag, MessageBroker, PipelineEvent,
    QueueConfig, QueueMessage,
};
use chrono::Utc;
use futures_util::FutureExt;
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::extractor::{EventExtractor, ExtractionResult};
use crate::messages::{ConsumerMessage, SupervisorMessage};

/// State for the consumer actor.
pub struct ConsumerState {
    /// Unique worker ID.
    pub worker_id: String,
    pub broker: Arc<dyn MessageBroker>,
    pub extractor: Arc<dyn EventExtractor>,
    pub config: Arc<QueueConfig>,
    /// Receives every event this consumer emits.
    pub supervisor: ActorRef<SupervisorMessage>,
    /// Whether the consumer should keep fetching.
    pub running: bool,
    /// Failed deliveries held unacknowledged until their retry is due.
    pub pending_retries: HashSet<DeliveryTag>,
}

impl ConsumerState {
    fn emit(&self, event: PipelineEvent) {
        tracing::debug!("{}", event.description());
        let _ = self
            .supervisor
            .send_message(SupervisorMessage::BroadcastEvent { event });
    }

    fn broker_failure(&self, error: &BrokerError) {
        tracing::error!("Consumer {} broker failure: {}", self.worker_id, error);
        self.emit(PipelineEvent::BrokerFailure {
            worker_id: self.worker_id.clone(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Run the extractor once. A panic inside it counts as a failed attempt.
    async fn extract(&self, message: &QueueMessage) -> ExtractionResult {
        let started = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.extractor.process_email(message)
        }));
        let attempt = match started {
            Ok(attempt) => AssertUnwindSafe(attempt)
                .catch_unwind()
                .map(|outcome| outcome.unwrap_or_else(|panic| Err(panic_message(panic)))),
            Err(panic) => return Err(panic_message(panic)),
        };
        match self.config.extraction_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .unwrap_or_else(|_| Err("Extraction timed out".into())),
            None => attempt.await,
        }
    }
}

/// Consumer actor arguments.
pub struct ConsumerArgs {
    pub worker_id: String,
    pub broker: Arc<dyn MessageBroker>,
    pub extractor: Arc<dyn EventExtractor>,
    pub config: Arc<QueueConfig>,
    pub supervisor: ActorRef<SupervisorMessage>,
}

/// Consumer actor pulling from the work queue with manual acknowledgment.
///
/// Each delivery ends acknowledged, requeued as a new attempt, returned to the
/// broker, or on the dead-letter queue. Failed deliveries wait out the retry
/// delay on a timer while the consumer keeps fetching.
pub struct ConsumerActor;

impl Actor for ConsumerActor {
    type Msg = ConsumerMessage;
    type State = ConsumerState;
    type Arguments = ConsumerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting consumer: {}", args.worker_id);

        let state = ConsumerState {
            worker_id: args.worker_id,
            broker: args.broker,
            extractor: args.extractor,
            config: args.config,
            supervisor: args.supervisor,
            running: true,
            pending_retries: HashSet::new(),
        };
        state.emit(PipelineEvent::ConsumerStarted {
            worker_id: state.worker_id.clone(),
            queue: state.config.work_queue.clone(),
            timestamp: Utc::now(),
        });

        myself.send_message(ConsumerMessage::Poll)?;
        Ok(state)
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        // Retry timers die with this actor; hand their deliveries back.
        for tag in std::mem::take(&mut state.pending_retries) {
            if let Err(e) = state.broker.nack(tag, true).await {
                tracing::warn!(
                    "Consumer {} could not return delivery {}: {}",
                    state.worker_id,
                    tag,
                    e
                );
            }
        }
        state.emit(PipelineEvent::ConsumerStopped {
            worker_id: state.worker_id.clone(),
            queue: state.config.work_queue.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ConsumerMessage::Poll => {
                if !state.running {
                    return Ok(());
                }

                match state.broker.fetch(&state.config.work_queue).await {
                    Ok(Some(delivery)) => {
                        handle_delivery(&myself, state, delivery).await;
                        // More may be waiting; poll again right away.
                        myself.send_message(ConsumerMessage::Poll)?;
                    }
                    Ok(None) => schedule_poll(&myself, state),
                    Err(BrokerError::Closed) => {
                        tracing::info!("Broker closed, stopping consumer {}", state.worker_id);
                        state.running = false;
                        myself.stop(Some("broker closed".into()));
                    }
                    Err(e) => {
                        state.broker_failure(&e);
                        schedule_poll(&myself, state);
                    }
                }
            }

            ConsumerMessage::RetryDue { delivery, message } => {
                if state.pending_retries.remove(&delivery.tag) {
                    requeue(state, *delivery, *message).await;
                }
            }

            ConsumerMessage::Shutdown => {
                tracing::info!("Shutting down consumer: {}", state.worker_id);
                state.running = false;
                myself.stop(None);
            }
        }

        Ok(())
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Extractor panicked: {}", detail)
}

/// Send the next Poll after the idle interval.
fn schedule_poll(myself: &ActorRef<ConsumerMessage>, state: &ConsumerState) {
    let myself = myself.clone();
    let interval = state.config.poll_interval;
    tokio::spawn(async move {
        tokio::time::sleep(interval).await;
        let _ = myself.send_message(ConsumerMessage::Poll);
    });
}

async fn handle_delivery(
    myself: &ActorRef<ConsumerMessage>,
    state: &mut ConsumerState,
    delivery: Delivery,
) {
    state.emit(PipelineEvent::Received {
        delivery: delivery.tag,
        worker_id: state.worker_id.clone(),
        redelivered: delivery.redelivered,
        timestamp: Utc::now(),
    });

    let message = match QueueMessage::decode(&delivery.publishing.body) {
        Ok(message) => message,
        Err(e) => {
            let reason = DeadLetterReason::UnparseableMessage {
                error: e.to_string(),
            };
            dead_letter(state, delivery, reason).await;
            return;
        }
    };

    let started = Instant::now();
    match state.extract(&message).await {
        Ok(extraction) => {
            if let Err(e) = state.broker.ack(delivery.tag).await {
                state.broker_failure(&e);
                return;
            }
            tracing::debug!("Extraction for {}: {}", message.user_id, extraction.summary);
            state.emit(PipelineEvent::Acknowledged {
                delivery: delivery.tag,
                user_id: message.user_id,
                retry_count: message.retry_count,
                duration_ms: started.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            });
        }
        Err(error) if message.retry_count < state.config.max_retries => {
            let delay = state.config.retry_delay;
            tracing::warn!(
                "Extraction failed for {} (attempt {}): {}",
                message.user_id,
                message.retry_count.saturating_add(1),
                error
            );
            state.emit(PipelineEvent::RetryScheduled {
                delivery: delivery.tag,
                user_id: message.user_id.clone(),
                retry_count: message.retry_count.saturating_add(1),
                error,
                delay_ms: delay.as_millis() as u64,
                timestamp: Utc::now(),
            });

            state.pending_retries.insert(delivery.tag);
            let myself = myself.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = myself.send_message(ConsumerMessage::RetryDue {
                    delivery: Box::new(delivery),
                    message: Box::new(message),
                });
            });
        }
        Err(error) => {
            let reason = DeadLetterReason::ExtractionFailed {
                error,
                attempts: message.retry_count.saturating_add(1),
            };
            dead_letter(state, delivery, reason).await;
        }
    }
}

/// Publish the next attempt, then acknowledge the failed delivery.
async fn requeue(state: &ConsumerState, delivery: Delivery, message: QueueMessage) {
    let next = message.next_attempt();
    let published = match next.to_publishing() {
        Ok(publishing) => state
            .broker
            .publish(&state.config.work_queue, publishing)
            .await
            .map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    if let Err(error) = published {
        return_to_broker(state, &delivery, error).await;
        return;
    }

    if let Err(e) = state.broker.ack(delivery.tag).await {
        state.broker_failure(&e);
        return;
    }
    state.emit(PipelineEvent::Requeued {
        delivery: delivery.tag,
        user_id: next.user_id,
        retry_count: next.retry_count,
        timestamp: Utc::now(),
    });
}

/// Copy the raw payload to the dead-letter queue, then acknowledge it.
async fn dead_letter(state: &ConsumerState, delivery: Delivery, reason: DeadLetterReason) {
    tracing::warn!("Dead-lettering delivery {}: {}", delivery.tag, reason);

    let dlq = &state.config.dead_letter_queue;
    if let Err(e) = state.broker.publish(dlq, delivery.publishing.clone()).await {
        return_to_broker(state, &delivery, e.to_string()).await;
        return;
    }

    if let Err(e) = state.broker.ack(delivery.tag).await {
        state.broker_failure(&e);
        return;
    }
    state.emit(PipelineEvent::DeadLettered {
        delivery: delivery.tag,
        reason,
        timestamp: Utc::now(),
    });
}

/// Give the delivery back unacknowledged so it is redelivered later.
async fn return_to_broker(state: &ConsumerState, delivery: &Delivery, error: String) {
    tracing::error!("Returning delivery {} to broker: {}", delivery.tag, error);
    if let Err(e) = state.broker.nack(delivery.tag, true).await {
        state.broker_failure(&e);
        return;
    }
    state.emit(PipelineEvent::Returned {
        delivery: delivery.tag,
        error,
        timestamp: Utc::now(),
    });
}
