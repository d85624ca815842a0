//! # Messaging Module
//!
//! Broker transport for the bridge: the [`TransportChannel`] contract, a
//! STOMP 1.2 implementation over TCP, and an in-memory broker for tests.

pub mod channel;
pub mod errors;
pub mod frame;
pub mod in_memory;
pub mod stomp;

pub use channel::{AckMode, BrokerCredentials, ChannelEvent, ConnectionState, TransportChannel};
pub use errors::{MessagingError, MessagingResult};
pub use frame::{Command, Decoded, Frame, FrameDecoder};
pub use in_memory::{InMemoryBroker, InMemoryChannel};
pub use stomp::{StompChannel, StompChannelConfig};
