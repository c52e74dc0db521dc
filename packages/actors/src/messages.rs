//! Message types for actor communication.

use calendar_core::{Delivery, PipelineEvent, PipelineStats, QueueMessage};
use ractor::RpcReplyPort;
use tokio::sync::broadcast;

/// Messages for the ConsumerActor.
#[derive(Debug)]
pub enum ConsumerMessage {
    /// Fetch and handle the next delivery, if any.
    Poll,

    /// The retry delay of a failed delivery has elapsed.
    RetryDue {
        delivery: Box<Delivery>,
        message: Box<QueueMessage>,
    },

    /// Stop after the current delivery.
    Shutdown,
}

/// Messages for the PipelineSupervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Forward events to `sender`.
    Subscribe {
        sender: broadcast::Sender<PipelineEvent>,
    },

    /// Record an event and broadcast it to all subscribers.
    BroadcastEvent { event: PipelineEvent },

    /// Get running totals.
    GetStats { reply: RpcReplyPort<PipelineStats> },

    /// Number of live consumers.
    ConsumerCount { reply: RpcReplyPort<usize> },

    /// Stop every consumer and wait for them to finish their current delivery.
    StopConsumers { reply: RpcReplyPort<()> },
}
