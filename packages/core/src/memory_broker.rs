//! In-process broker for tests and single-process runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::broker::{BrokerFuture, BrokerResult, Delivery, DeliveryTag, MessageBroker, Publishing};
use crate::error::BrokerError;

#[derive(Debug, Clone)]
struct Stored {
    publishing: Publishing,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<Stored>>,
    in_flight: HashMap<DeliveryTag, (String, Stored)>,
    closed: bool,
    reject_publishes: Option<String>,
}

impl BrokerState {
    fn queue_mut(&mut self, queue: &str) -> BrokerResult<&mut VecDeque<Stored>> {
        self.queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::NotDeclared(queue.to_string()))
    }

    fn ensure_open(&self) -> BrokerResult<()> {
        if self.closed {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }

    fn requeue_in_flight(&mut self) {
        for (_, (queue, stored)) in self.in_flight.drain() {
            if let Some(ready) = self.queues.get_mut(&queue) {
                ready.push_front(stored);
            }
        }
    }
}

/// Broker holding every queue in process memory.
///
/// Messages do not survive the process. Closing returns in-flight messages
/// to their queues and rejects further calls.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> BrokerResult<MutexGuard<'_, BrokerState>> {
        self.state
            .lock()
            .map_err(|_| BrokerError::Backend("memory broker lock poisoned".into()))
    }

    /// Refuse every publish with `reason` until cleared with `None`.
    pub fn reject_publishes(&self, reason: Option<String>) {
        if let Ok(mut state) = self.lock() {
            state.reject_publishes = reason;
        }
    }

    /// Number of ready messages in `queue`.
    pub fn ready_len(&self, queue: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|s| s.queues.get(queue).map(VecDeque::len))
            .unwrap_or(0)
    }

    /// Number of deliveries awaiting acknowledgment across all queues.
    pub fn in_flight_len(&self) -> usize {
        self.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    /// Ready messages of `queue`, front first.
    pub fn messages(&self, queue: &str) -> Vec<Publishing> {
        self.lock()
            .ok()
            .and_then(|s| {
                s.queues
                    .get(queue)
                    .map(|q| q.iter().map(|m| m.publishing.clone()).collect())
            })
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|s| s.closed).unwrap_or(true)
    }

    fn do_declare(&self, queue: &str) -> BrokerResult<()> {
        let mut state = self.lock()?;
        state.ensure_open()?;
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    fn do_publish(&self, queue: &str, publishing: Publishing) -> BrokerResult<()> {
        let mut state = self.lock()?;
        state.ensure_open()?;
        if let Some(reason) = state.reject_publishes.clone() {
            return Err(BrokerError::Rejected(reason));
        }
        state.queue_mut(queue)?.push_back(Stored {
            publishing,
            deliveries: 0,
        });
        Ok(())
    }

    fn do_fetch(&self, queue: &str) -> BrokerResult<Option<Delivery>> {
        let mut state = self.lock()?;
        state.ensure_open()?;
        let Some(mut stored) = state.queue_mut(queue)?.pop_front() else {
            return Ok(None);
        };

        stored.deliveries += 1;
        let tag = DeliveryTag::new();
        let delivery = Delivery {
            tag,
            queue: queue.to_string(),
            publishing: stored.publishing.clone(),
            redelivered: stored.deliveries > 1,
        };
        state.in_flight.insert(tag, (queue.to_string(), stored));
        Ok(Some(delivery))
    }

    fn do_settle(&self, tag: DeliveryTag, requeue: bool) -> BrokerResult<()> {
        let mut state = self.lock()?;
        state.ensure_open()?;
        let (queue, stored) = state
            .in_flight
            .remove(&tag)
            .ok_or_else(|| BrokerError::UnknownDelivery(tag.to_string()))?;
        if requeue {
            state.queue_mut(&queue)?.push_front(stored);
        }
        Ok(())
    }

    fn do_close(&self) -> BrokerResult<()> {
        let mut state = self.lock()?;
        state.requeue_in_flight();
        state.closed = true;
        Ok(())
    }
}

impl MessageBroker for MemoryBroker {
    fn declare_queue<'a>(&'a self, queue: &'a str) -> BrokerFuture<'a, ()> {
        let result = self.do_declare(queue);
        Box::pin(async move { result })
    }

    fn publish<'a>(&'a self, queue: &'a str, publishing: Publishing) -> BrokerFuture<'a, ()> {
        let result = self.do_publish(queue, publishing);
        Box::pin(async move { result })
    }

    fn fetch<'a>(&'a self, queue: &'a str) -> BrokerFuture<'a, Option<Delivery>> {
        let result = self.do_fetch(queue);
        Box::pin(async move { result })
    }

    fn ack(&self, tag: DeliveryTag) -> BrokerFuture<'_, ()> {
        let result = self.do_settle(tag, false);
        Box::pin(async move { result })
    }

    fn nack(&self, tag: DeliveryTag, requeue: bool) -> BrokerFuture<'_, ()> {
        let result = self.do_settle(tag, requeue);
        Box::pin(async move { result })
    }

    fn close(&self) -> BrokerFuture<'_, ()> {
        let result = self.do_close();
        Box::pin(async move { result })
    }
}
