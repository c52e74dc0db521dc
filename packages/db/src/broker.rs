//! Durable message broker backed by SurrealDB.

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};

use calendar_core::{
    BrokerError, BrokerFuture, BrokerResult, Delivery, DeliveryTag, MessageBroker, Publishing,
};
use tokio::sync::Mutex;
use ulid::Generator;

use crate::DbError;
use crate::repositories::{MessageRepository, MessageState, QueueRepository, StoredMessage};

impl From<DbError> for BrokerError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => BrokerError::UnknownDelivery(what),
            other => BrokerError::Backend(other.to_string()),
        }
    }
}

/// Broker whose queues live in the process-wide SurrealDB connection.
///
/// Messages survive restarts when the database is persistent. Deliveries left
/// in flight by a previous process are returned to their queues on connect.
/// Fetches are serialized inside one process; sharing one database between
/// several broker processes is not supported.
pub struct SurrealBroker {
    fetch_lock: Mutex<()>,
    ids: StdMutex<Generator>,
    closed: AtomicBool,
}

impl SurrealBroker {
    /// Attach to the initialized database and recover stranded deliveries.
    pub async fn connect() -> Result<Self, DbError> {
        let released = MessageRepository::release_all_in_flight().await?;
        if released > 0 {
            tracing::warn!("Returned {} in-flight messages to their queues", released);
        }

        Ok(Self {
            fetch_lock: Mutex::new(()),
            ids: StdMutex::new(Generator::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Messages of `queue` in fetch order.
    pub async fn messages(
        &self,
        queue: &str,
        state: Option<MessageState>,
    ) -> Result<Vec<StoredMessage>, DbError> {
        MessageRepository::list(queue, state).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> BrokerResult<()> {
        if self.is_closed() {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }

    fn next_message_id(&self) -> BrokerResult<String> {
        let mut ids = self
            .ids
            .lock()
            .map_err(|_| BrokerError::Backend("id generator lock poisoned".into()))?;
        ids.generate()
            .map(|id| id.to_string())
            .map_err(|e| BrokerError::Backend(e.to_string()))
    }

    async fn do_declare(&self, queue: &str) -> BrokerResult<()> {
        self.ensure_open()?;
        QueueRepository::declare(queue).await?;
        Ok(())
    }

    async fn do_publish(&self, queue: &str, publishing: Publishing) -> BrokerResult<()> {
        self.ensure_open()?;
        if !QueueRepository::exists(queue).await? {
            return Err(BrokerError::NotDeclared(queue.to_string()));
        }

        let message = StoredMessage {
            message_id: self.next_message_id()?,
            queue: queue.to_string(),
            content_type: publishing.content_type,
            headers: publishing.headers,
            body: publishing.body,
            state: MessageState::Ready,
            delivery_tag: None,
            deliveries: 0,
        };
        MessageRepository::insert(message).await?;
        Ok(())
    }

    async fn do_fetch(&self, queue: &str) -> BrokerResult<Option<Delivery>> {
        self.ensure_open()?;
        let _guard = self.fetch_lock.lock().await;

        if !QueueRepository::exists(queue).await? {
            return Err(BrokerError::NotDeclared(queue.to_string()));
        }
        let Some(next) = MessageRepository::next_ready(queue).await? else {
            return Ok(None);
        };

        let tag = DeliveryTag::new();
        let message =
            MessageRepository::mark_in_flight(&next.message_id, &tag.to_string(), next.deliveries + 1)
                .await?;

        Ok(Some(Delivery {
            tag,
            queue: message.queue,
            publishing: Publishing {
                content_type: message.content_type,
                headers: message.headers,
                body: message.body,
            },
            redelivered: message.deliveries > 1,
        }))
    }

    async fn do_settle(&self, tag: DeliveryTag, requeue: bool) -> BrokerResult<()> {
        self.ensure_open()?;
        let tag = tag.to_string();
        if requeue {
            MessageRepository::release_delivery(&tag).await?;
        } else {
            MessageRepository::delete_delivery(&tag).await?;
        }
        Ok(())
    }

    async fn do_close(&self) -> BrokerResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.fetch_lock.lock().await;
        let released = MessageRepository::release_all_in_flight().await?;
        tracing::info!("Broker closed, {} in-flight messages returned", released);
        Ok(())
    }
}

impl MessageBroker for SurrealBroker {
    fn declare_queue<'a>(&'a self, queue: &'a str) -> BrokerFuture<'a, ()> {
        Box::pin(self.do_declare(queue))
    }

    fn publish<'a>(&'a self, queue: &'a str, publishing: Publishing) -> BrokerFuture<'a, ()> {
        Box::pin(self.do_publish(queue, publishing))
    }

    fn fetch<'a>(&'a self, queue: &'a str) -> BrokerFuture<'a, Option<Delivery>> {
        Box::pin(self.do_fetch(queue))
    }

    fn ack(&self, tag: DeliveryTag) -> BrokerFuture<'_, ()> {
        Box::pin(self.do_settle(tag, false))
    }

    fn nack(&self, tag: DeliveryTag, requeue: bool) -> BrokerFuture<'_, ()> {
        Box::pin(self.do_settle(tag, requeue))
    }

    fn close(&self) -> BrokerFuture<'_, ()> {
        Box::pin(self.do_close())
    }
}
