//! # In-Memory Broker
//!
//! Process-local stand-in for the STOMP broker, used by tests and local
//! development. Destinations are ANYCAST queues: each message goes to exactly
//! one subscriber, and messages published while nobody listens wait until a
//! subscriber arrives.
//!
//! The broker also exposes knobs a real broker does not: severing every
//! connection, refusing new ones, and inspecting what was published.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::channel::{AckMode, BrokerCredentials, ChannelEvent, ConnectionState, TransportChannel};
use super::errors::{MessagingError, MessagingResult};

/// Shared in-memory broker; clones refer to the same broker
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Mutex<BrokerInner>>,
}

#[derive(Debug, Default)]
struct BrokerInner {
    next_connection: u64,
    connect_count: usize,
    refuse_connections: bool,
    connections: HashMap<u64, mpsc::UnboundedSender<ChannelEvent>>,
    queues: HashMap<String, InMemoryQueue>,
}

#[derive(Debug, Default)]
struct InMemoryQueue {
    pending: VecDeque<Bytes>,
    published: Vec<Bytes>,
    subscribers: Vec<u64>,
    subscribe_count: usize,
    next_subscriber: usize,
}

impl BrokerInner {
    fn deliver(&mut self, destination: &str, payload: Bytes) {
        let queue = self.queues.entry(destination.to_string()).or_default();
        queue.published.push(payload.clone());

        if queue.subscribers.is_empty() {
            queue.pending.push_back(payload);
            return;
        }
        let index = queue.next_subscriber % queue.subscribers.len();
        queue.next_subscriber = queue.next_subscriber.wrapping_add(1);
        let target = queue.subscribers[index];

        let event = ChannelEvent::Message {
            destination: destination.to_string(),
            payload: payload.clone(),
        };
        let delivered = self
            .connections
            .get(&target)
            .is_some_and(|events| events.send(event).is_ok());
        if !delivered {
            queue.pending.push_front(payload);
        }
    }

    fn drain_pending(&mut self, destination: &str, connection: u64) {
        let Some(events) = self.connections.get(&connection) else {
            return;
        };
        let Some(queue) = self.queues.get_mut(destination) else {
            return;
        };
        while let Some(payload) = queue.pending.pop_front() {
            let event = ChannelEvent::Message {
                destination: destination.to_string(),
                payload: payload.clone(),
            };
            if events.send(event).is_err() {
                queue.pending.push_front(payload);
                break;
            }
        }
    }

    fn drop_connection(&mut self, connection: u64) -> Option<mpsc::UnboundedSender<ChannelEvent>> {
        for queue in self.queues.values_mut() {
            queue.subscribers.retain(|id| *id != connection);
        }
        self.connections.remove(&connection)
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh channel attached to this broker
    pub fn channel(&self) -> InMemoryChannel {
        InMemoryChannel::new(self.clone())
    }

    /// Publish from outside any channel, as the remote pipeline would
    pub fn publish(&self, destination: &str, payload: impl Into<Bytes>) {
        self.inner.lock().deliver(destination, payload.into());
    }

    /// Everything ever published to `destination`, in order
    pub fn published(&self, destination: &str) -> Vec<Bytes> {
        self.inner
            .lock()
            .queues
            .get(destination)
            .map(|queue| queue.published.clone())
            .unwrap_or_default()
    }

    /// Messages waiting for a subscriber
    pub fn pending(&self, destination: &str) -> usize {
        self.inner
            .lock()
            .queues
            .get(destination)
            .map_or(0, |queue| queue.pending.len())
    }

    pub fn active_subscriptions(&self, destination: &str) -> usize {
        self.inner
            .lock()
            .queues
            .get(destination)
            .map_or(0, |queue| queue.subscribers.len())
    }

    /// Subscriptions ever made to `destination`
    pub fn subscribe_count(&self, destination: &str) -> usize {
        self.inner
            .lock()
            .queues
            .get(destination)
            .map_or(0, |queue| queue.subscribe_count)
    }

    /// Successful connects over the broker's lifetime
    pub fn connect_count(&self) -> usize {
        self.inner.lock().connect_count
    }

    pub fn active_connections(&self) -> usize {
        self.inner.lock().connections.len()
    }

    /// Drop every live connection as a broker restart would
    pub fn sever_all(&self) {
        let mut inner = self.inner.lock();
        let ids: Vec<u64> = inner.connections.keys().copied().collect();
        for id in ids {
            if let Some(events) = inner.drop_connection(id) {
                let _ = events.send(ChannelEvent::Disconnected {
                    reason: "connection severed by broker".to_string(),
                });
            }
        }
        debug!("In-memory broker severed all connections");
    }

    /// While set, `connect` fails as if the broker were down
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.inner.lock().refuse_connections = refuse;
    }

    fn open(
        &self,
        credentials: &BrokerCredentials,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> MessagingResult<u64> {
        let mut inner = self.inner.lock();
        if inner.refuse_connections {
            return Err(MessagingError::connection(
                credentials.address(),
                "connection refused",
            ));
        }
        inner.next_connection += 1;
        inner.connect_count += 1;
        let id = inner.next_connection;
        inner.connections.insert(id, events);
        Ok(id)
    }

    fn is_live(&self, connection: u64) -> bool {
        self.inner.lock().connections.contains_key(&connection)
    }

    fn subscribe(&self, connection: u64, destination: &str) {
        let mut inner = self.inner.lock();
        let queue = inner.queues.entry(destination.to_string()).or_default();
        queue.subscribers.push(connection);
        queue.subscribe_count += 1;
        inner.drain_pending(destination, connection);
    }

    fn unsubscribe(&self, connection: u64, destination: &str) {
        if let Some(queue) = self.inner.lock().queues.get_mut(destination) {
            queue.subscribers.retain(|id| *id != connection);
        }
    }

    fn close(&self, connection: u64) {
        self.inner.lock().drop_connection(connection);
    }
}

/// [`TransportChannel`] backed by an [`InMemoryBroker`]
#[derive(Debug)]
pub struct InMemoryChannel {
    broker: InMemoryBroker,
    connection: Option<u64>,
    subscriptions: HashSet<String>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    events_rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl InMemoryChannel {
    pub fn new(broker: InMemoryBroker) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            broker,
            connection: None,
            subscriptions: HashSet::new(),
            events_tx,
            events_rx,
        }
    }

    fn live_connection(&self, operation: &str) -> MessagingResult<u64> {
        self.connection
            .filter(|id| self.broker.is_live(*id))
            .ok_or_else(|| MessagingError::not_connected(operation))
    }
}

#[async_trait]
impl TransportChannel for InMemoryChannel {
    async fn connect(&mut self, credentials: &BrokerCredentials) -> MessagingResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.subscriptions.clear();
        let id = self.broker.open(credentials, self.events_tx.clone())?;
        self.connection = Some(id);
        Ok(())
    }

    async fn subscribe(&mut self, destination: &str, _ack_mode: AckMode) -> MessagingResult<()> {
        let id = self.live_connection("subscribe")?;
        if !self.subscriptions.insert(destination.to_string()) {
            return Ok(());
        }
        self.broker.subscribe(id, destination);
        Ok(())
    }

    async fn publish(&mut self, destination: &str, payload: &[u8]) -> MessagingResult<()> {
        self.live_connection("publish")?;
        self.broker.publish(destination, Bytes::copy_from_slice(payload));
        Ok(())
    }

    async fn unsubscribe(&mut self, destination: &str) -> MessagingResult<()> {
        if !self.subscriptions.remove(destination) {
            return Ok(());
        }
        if let Some(id) = self.connection {
            self.broker.unsubscribe(id, destination);
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> MessagingResult<()> {
        self.subscriptions.clear();
        if let Some(id) = self.connection.take() {
            self.broker.close(id);
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events_rx.recv().await
    }

    fn state(&self) -> ConnectionState {
        match self.connection {
            Some(id) if self.broker.is_live(id) => {
                if self.subscriptions.is_empty() {
                    ConnectionState::Connected
                } else {
                    ConnectionState::Subscribed
                }
            }
            _ => ConnectionState::Disconnected,
        }
    }
}
