//! # Transport Channel
//!
//! Provider-agnostic contract for one broker connection. The Source and the
//! Sink each own their own channel; neither shares it.
//!
//! Connection failures are returned from `connect`/`publish`. A connection
//! the broker drops on its own is never reported as an error from some later,
//! unrelated call: it surfaces exactly once as [`ChannelEvent::Disconnected`]
//! from [`TransportChannel::next_event`], and the owner decides whether to
//! reconnect.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::errors::MessagingResult;

/// Broker coordinates and login
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerCredentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl BrokerCredentials {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    /// `host:port` for socket connects and log lines
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Subscription acknowledgment mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Broker considers a message delivered as soon as it is sent
    #[default]
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Client => "client",
            Self::ClientIndividual => "client-individual",
        }
    }
}

/// Connection lifecycle as tracked by each channel owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Connected with no active subscription (the Sink's steady state)
    Connected,
    Subscribed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Subscribed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Subscribed => write!(f, "subscribed"),
        }
    }
}

/// Asynchronous happenings on a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A message delivered on a subscribed destination
    Message { destination: String, payload: Bytes },
    /// The broker side went away without being asked to; emitted once per
    /// established connection
    Disconnected { reason: String },
}

/// One connection to a message broker
#[async_trait]
pub trait TransportChannel: Send + fmt::Debug {
    /// Open the connection. Connecting an already connected channel is a no-op.
    async fn connect(&mut self, credentials: &BrokerCredentials) -> MessagingResult<()>;

    /// Subscribe to a destination. Subscribing twice to the same destination
    /// on the same connection is a no-op.
    async fn subscribe(&mut self, destination: &str, ack_mode: AckMode) -> MessagingResult<()>;

    async fn publish(&mut self, destination: &str, payload: &[u8]) -> MessagingResult<()>;

    async fn unsubscribe(&mut self, destination: &str) -> MessagingResult<()>;

    /// Close deliberately. No `Disconnected` event follows. Idempotent.
    async fn disconnect(&mut self) -> MessagingResult<()>;

    /// Wait for the next event. Cancel-safe; pending while nothing arrives.
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }
}
