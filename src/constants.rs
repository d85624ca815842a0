//! # Bridge Constants
//!
//! Wire-level markers, parameter names and defaults shared by the Source,
//! the Sink and the configuration layer.

/// Entire payload body that signals end-of-collection.
///
/// Must match byte-for-byte; the Python side of the bridge sends the same text.
pub const STOP_MESSAGE: &str = "Apache cTAKES PBJ Stop Message.";

/// Structural marker that identifies an XMI-serialized document payload.
pub const XMI_INDICATOR: &str = "xmlns:xmi";

/// Closing tag of the XMI root element.
pub const XMI_ROOT_CLOSE: &str = "</xmi:XMI>";

/// Parameter names declared by pipeline participants
pub mod params {
    pub const RECEIVE_QUEUE: &str = "receive_queue";
    pub const SEND_QUEUE: &str = "send_queue";
    pub const HOST: &str = "host_name";
    pub const PORT: &str = "port_name";
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const ACCEPT_STOP: &str = "accept_stop";
    pub const SEND_STOP: &str = "send_stop";
    pub const OUTPUT_DIR: &str = "output_dir";
}

/// Default values for optional parameters and connection tuning
pub mod defaults {
    pub const HOST: &str = "localhost";
    pub const PORT: u16 = 61616;
    pub const USERNAME: &str = "guest";
    pub const PASSWORD: &str = "guest";
    pub const ACCEPT_STOP: &str = "yes";
    pub const SEND_STOP: &str = "yes";
    pub const OUTPUT_DIR: &str = "pbj_output";

    /// Keep-alive for the inbound connection, milliseconds
    pub const SOURCE_HEARTBEAT_MS: u64 = 10_000;
    /// Keep-alive for the outbound connection; traffic there is bursty and rare
    pub const SINK_HEARTBEAT_MS: u64 = 1_000_000;

    pub const CONNECT_TIMEOUT_MS: u64 = 10_000;
    pub const RECEIPT_TIMEOUT_MS: u64 = 5_000;
    pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;
    pub const EVENT_BUFFER: usize = 1024;

    pub const RECONNECT_INITIAL_DELAY_MS: u64 = 500;
    pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;
    pub const RECONNECT_MULTIPLIER: f64 = 2.0;
}

/// Upper bound on error causes written to the log by the exception dispatcher
pub const MAX_TRACE_DEPTH: usize = 8;
