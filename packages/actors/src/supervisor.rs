//! Supervisor actor for the consumer pool.

use std::collections::HashMap;
use std::sync::Arc;

use calendar_core::{MessageBroker, PipelineEvent, PipelineStats, QueueConfig};
use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::broadcast;

use crate::consumer_actor::{ConsumerActor, ConsumerArgs};
use crate::extractor::EventExtractor;
use crate::messages::{ConsumerMessage, SupervisorMessage};

/// Supervisor actor arguments.
pub struct SupervisorArgs {
    pub config: Arc<QueueConfig>,
    pub broker: Arc<dyn MessageBroker>,
    pub extractor: Arc<dyn EventExtractor>,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    config: Arc<QueueConfig>,
    broker: Arc<dyn MessageBroker>,
    extractor: Arc<dyn EventExtractor>,
    /// Live consumers and their worker IDs.
    consumers: HashMap<ActorId, (String, ActorRef<ConsumerMessage>)>,
    /// Event broadcaster.
    pub event_tx: broadcast::Sender<PipelineEvent>,
    pub stats: PipelineStats,
    /// Cleared once consumers are being stopped; no restarts after that.
    accepting: bool,
    /// Worker counter for unique IDs.
    worker_counter: u64,
}

impl SupervisorState {
    fn new(args: SupervisorArgs) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            config: args.config,
            broker: args.broker,
            extractor: args.extractor,
            consumers: HashMap::new(),
            event_tx,
            stats: PipelineStats::default(),
            accepting: true,
            worker_counter: 0,
        }
    }

    /// Generate a unique worker ID.
    fn next_worker_id(&mut self) -> String {
        self.worker_counter += 1;
        format!("consumer-{}", self.worker_counter)
    }
}

async fn spawn_consumer(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState,
) -> Result<(), ActorProcessingErr> {
    let worker_id = state.next_worker_id();
    let args = ConsumerArgs {
        worker_id: worker_id.clone(),
        broker: state.broker.clone(),
        extractor: state.extractor.clone(),
        config: state.config.clone(),
        supervisor: myself.clone(),
    };

    let (actor, _handle) = Actor::spawn_linked(None, ConsumerActor, args, myself.get_cell())
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn consumer: {}", e)))?;

    state.consumers.insert(actor.get_id(), (worker_id, actor));
    Ok(())
}

/// Supervisor that owns the consumer pool, restarts failed consumers and fans
/// pipeline events out to subscribers.
pub struct PipelineSupervisor;

impl Actor for PipelineSupervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting pipeline supervisor for queue {} with {} consumers",
            args.config.work_queue,
            args.config.workers
        );
        Ok(SupervisorState::new(args))
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for _ in 0..state.config.workers {
            spawn_consumer(&myself, state).await?;
        }
        Ok(())
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::Subscribe { sender } => {
                // Merge event streams - forward from our channel to subscriber's
                let mut rx = state.event_tx.subscribe();
                tokio::spawn(async move {
                    while let Ok(event) = rx.recv().await {
                        if sender.send(event).is_err() {
                            break;
                        }
                    }
                });
            }

            SupervisorMessage::BroadcastEvent { event } => {
                state.stats.record(&event);
                let _ = state.event_tx.send(event);
            }

            SupervisorMessage::GetStats { reply } => {
                let _ = reply.send(state.stats.clone());
            }

            SupervisorMessage::ConsumerCount { reply } => {
                let _ = reply.send(state.consumers.len());
            }

            SupervisorMessage::StopConsumers { reply } => {
                tracing::info!("Stopping {} consumers", state.consumers.len());
                state.accepting = false;
                for (_, (worker_id, consumer)) in state.consumers.drain() {
                    if let Err(e) = consumer.stop_and_wait(None, None).await {
                        tracing::warn!("Consumer {} did not stop cleanly: {}", worker_id, e);
                    }
                }
                let _ = reply.send(());
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorFailed(cell, error) => {
                let Some((worker_id, _)) = state.consumers.remove(&cell.get_id()) else {
                    return Ok(());
                };
                tracing::error!("Consumer {} failed: {}", worker_id, error);
                if state.accepting {
                    spawn_consumer(&myself, state).await?;
                }
            }
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                if let Some((worker_id, _)) = state.consumers.remove(&cell.get_id()) {
                    tracing::info!("Consumer {} terminated: {:?}", worker_id, reason);
                }
            }
            _ => {}
        }
        Ok(())
    }
}
