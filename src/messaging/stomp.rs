//! # STOMP Transport Channel
//!
//! [`TransportChannel`] over a plain TCP connection speaking STOMP 1.2, the
//! protocol the Artemis broker exposes to the Python side of the bridge.
//!
//! Each connection runs two background tasks: a reader that turns inbound
//! frames into [`ChannelEvent`]s, and (when a heart-beat was negotiated) a
//! writer that sends EOL keep-alives. Both stop when the connection is closed
//! or dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::channel::{AckMode, BrokerCredentials, ChannelEvent, ConnectionState, TransportChannel};
use super::errors::{MessagingError, MessagingResult};
use super::frame::{Command, Decoded, Frame, FrameDecoder};
use crate::constants::defaults;

/// Tuning for one STOMP connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StompChannelConfig {
    /// Heart-beat we offer in both directions, milliseconds; 0 disables
    pub heartbeat_ms: u64,
    pub connect_timeout_ms: u64,
    /// How long `disconnect` waits for the broker's RECEIPT
    pub receipt_timeout_ms: u64,
    pub max_frame_bytes: usize,
    /// Capacity of the inbound event queue
    pub event_buffer: usize,
}

impl Default for StompChannelConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: defaults::SOURCE_HEARTBEAT_MS,
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
            receipt_timeout_ms: defaults::RECEIPT_TIMEOUT_MS,
            max_frame_bytes: defaults::MAX_FRAME_BYTES,
            event_buffer: defaults::EVENT_BUFFER,
        }
    }
}

impl StompChannelConfig {
    /// Long keep-alive for the outbound connection
    pub fn for_sink() -> Self {
        Self {
            heartbeat_ms: defaults::SINK_HEARTBEAT_MS,
            ..Self::default()
        }
    }
}

/// STOMP 1.2 broker connection
#[derive(Debug)]
pub struct StompChannel {
    config: StompChannelConfig,
    /// Identifies this channel to the broker; also the DISCONNECT receipt id
    request_id: String,
    connection: Option<ActiveConnection>,
    /// destination -> subscription id, for the current connection only
    subscriptions: HashMap<String, String>,
    next_subscription: u64,
    events_tx: mpsc::Sender<ChannelEvent>,
    events_rx: mpsc::Receiver<ChannelEvent>,
}

#[derive(Debug)]
struct ActiveConnection {
    address: String,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    alive: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    receipts: mpsc::UnboundedReceiver<String>,
    reader: JoinHandle<()>,
    heartbeat: Option<JoinHandle<()>>,
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::Release);
        self.reader.abort();
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.abort();
        }
    }
}

impl StompChannel {
    pub fn new(config: StompChannelConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer.max(1));
        Self {
            config,
            request_id: uuid::Uuid::new_v4().to_string(),
            connection: None,
            subscriptions: HashMap::new(),
            next_subscription: 0,
            events_tx,
            events_rx,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn config(&self) -> &StompChannelConfig {
        &self.config
    }

    fn ensure_connected(&self, operation: &str) -> MessagingResult<&ActiveConnection> {
        match &self.connection {
            Some(connection) if connection.alive.load(Ordering::Acquire) => Ok(connection),
            _ => Err(MessagingError::not_connected(operation)),
        }
    }

    async fn send_frame(&self, frame: &Frame) -> MessagingResult<()> {
        let connection = self.ensure_connected(frame.command().as_str())?;
        write_frame(&connection.writer, frame).await
    }

    async fn open(&self, credentials: &BrokerCredentials) -> MessagingResult<ActiveConnection> {
        let address = credentials.address();
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);

        let stream = timeout(connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                MessagingError::timeout(format!("connect to {address}"), self.config.connect_timeout_ms)
            })?
            .map_err(|e| MessagingError::connection(&address, e.to_string()))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(address = %address, "Could not set TCP_NODELAY: {}", e);
        }
        let (mut read_half, mut write_half) = stream.into_split();

        let heart_beat = format!("{0},{0}", self.config.heartbeat_ms);
        let connect = Frame::new(Command::Connect)
            .with_header("accept-version", "1.2")
            .with_header("host", credentials.host.as_str())
            .with_header("login", credentials.username.as_str())
            .with_header("passcode", credentials.password.as_str())
            .with_header("heart-beat", heart_beat)
            .with_header("request-id", self.request_id.as_str());
        write_half
            .write_all(&connect.to_bytes())
            .await
            .map_err(|e| MessagingError::io("send CONNECT", e))?;

        let mut decoder = FrameDecoder::new(self.config.max_frame_bytes);
        let mut buffer = BytesMut::with_capacity(8 * 1024);
        let connected = timeout(
            connect_timeout,
            await_connected(&address, &mut read_half, &mut decoder, &mut buffer),
        )
        .await
        .map_err(|_| MessagingError::timeout("await CONNECTED", self.config.connect_timeout_ms))??;

        let writer = Arc::new(Mutex::new(write_half));
        let alive = Arc::new(AtomicBool::new(true));
        let closing = Arc::new(AtomicBool::new(false));
        let (receipts_tx, receipts) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(ReadLoop {
            address: address.clone(),
            read_half,
            decoder,
            buffer,
            events: self.events_tx.clone(),
            receipts: receipts_tx,
            alive: alive.clone(),
            closing: closing.clone(),
        }));

        let heartbeat = negotiate_heartbeat(self.config.heartbeat_ms, connected.header("heart-beat"))
            .map(|interval| {
                debug!(address = %address, interval_ms = interval.as_millis() as u64, "Heart-beat negotiated");
                tokio::spawn(heartbeat_loop(
                    writer.clone(),
                    interval,
                    alive.clone(),
                    closing.clone(),
                ))
            });

        Ok(ActiveConnection {
            address,
            writer,
            alive,
            closing,
            receipts,
            reader,
            heartbeat,
        })
    }
}

#[async_trait]
impl TransportChannel for StompChannel {
    async fn connect(&mut self, credentials: &BrokerCredentials) -> MessagingResult<()> {
        if self.is_connected() {
            debug!(address = %credentials.address(), "STOMP channel already connected");
            return Ok(());
        }
        // A connection the broker dropped is still parked here; release it first
        self.connection = None;
        self.subscriptions.clear();
        // Events left over from the old connection describe nothing current
        let mut stale = 0usize;
        while self.events_rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "Discarded events from the previous connection");
        }

        info!(address = %credentials.address(), user = %credentials.username, "Connecting to broker ...");
        let connection = self.open(credentials).await?;
        info!(address = %connection.address, request_id = %self.request_id, "Connected to broker");
        self.connection = Some(connection);
        Ok(())
    }

    async fn subscribe(&mut self, destination: &str, ack_mode: AckMode) -> MessagingResult<()> {
        self.ensure_connected("subscribe")?;
        if self.subscriptions.contains_key(destination) {
            debug!(destination, "Already subscribed");
            return Ok(());
        }

        self.next_subscription += 1;
        let id = format!("{}-{}", self.request_id, self.next_subscription);
        let frame = Frame::new(Command::Subscribe)
            .with_header("id", id.as_str())
            .with_header("destination", destination)
            .with_header("ack", ack_mode.as_str());
        self.send_frame(&frame)
            .await
            .map_err(|e| MessagingError::subscribe(destination, e.to_string()))?;

        info!(destination, subscription = %id, "Subscribed");
        self.subscriptions.insert(destination.to_string(), id);
        Ok(())
    }

    async fn publish(&mut self, destination: &str, payload: &[u8]) -> MessagingResult<()> {
        self.ensure_connected("publish")?;
        let frame = Frame::new(Command::Send)
            .with_header("destination", destination)
            .with_header("destination-type", "ANYCAST")
            // text/plain arrives on the JMS side as a BytesMessage; the receivers expect that
            .with_header("content-type", "text/plain")
            .with_body(Bytes::copy_from_slice(payload));
        self.send_frame(&frame)
            .await
            .map_err(|e| MessagingError::publish(destination, e.to_string()))?;
        debug!(destination, bytes = payload.len(), "Published");
        Ok(())
    }

    async fn unsubscribe(&mut self, destination: &str) -> MessagingResult<()> {
        let Some(id) = self.subscriptions.remove(destination) else {
            debug!(destination, "Not subscribed; nothing to unsubscribe");
            return Ok(());
        };
        if !self.is_connected() {
            return Ok(());
        }
        let frame = Frame::new(Command::Unsubscribe).with_header("id", id.as_str());
        self.send_frame(&frame).await?;
        info!(destination, subscription = %id, "Unsubscribed");
        Ok(())
    }

    async fn disconnect(&mut self) -> MessagingResult<()> {
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };
        self.subscriptions.clear();
        connection.closing.store(true, Ordering::Release);
        if !connection.alive.load(Ordering::Acquire) {
            debug!(address = %connection.address, "Connection already lost; releasing it");
            return Ok(());
        }

        let frame = Frame::new(Command::Disconnect).with_header("receipt", self.request_id.as_str());
        write_frame(&connection.writer, &frame).await?;

        let receipt_id = self.request_id.clone();
        let receipts = &mut connection.receipts;
        let receipt = timeout(Duration::from_millis(self.config.receipt_timeout_ms), async {
            while let Some(id) = receipts.recv().await {
                if id == receipt_id {
                    return true;
                }
            }
            false
        })
        .await;
        if !matches!(receipt, Ok(true)) {
            warn!(
                address = %connection.address,
                timeout_ms = self.config.receipt_timeout_ms,
                "No DISCONNECT receipt from broker; closing anyway"
            );
        }

        if let Err(e) = connection.writer.lock().await.shutdown().await {
            debug!(address = %connection.address, "Socket shutdown: {}", e);
        }
        info!(address = %connection.address, "Disconnected from broker");
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events_rx.recv().await
    }

    fn state(&self) -> ConnectionState {
        match &self.connection {
            Some(connection) if connection.alive.load(Ordering::Acquire) => {
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

async fn write_frame(writer: &Mutex<OwnedWriteHalf>, frame: &Frame) -> MessagingResult<()> {
    let operation = format!("send {}", frame.command());
    let mut writer = writer.lock().await;
    writer
        .write_all(&frame.to_bytes())
        .await
        .map_err(|e| MessagingError::io(operation.as_str(), e))?;
    writer
        .flush()
        .await
        .map_err(|e| MessagingError::io(operation.as_str(), e))
}

async fn await_connected(
    address: &str,
    read_half: &mut OwnedReadHalf,
    decoder: &mut FrameDecoder,
    buffer: &mut BytesMut,
) -> MessagingResult<Frame> {
    loop {
        while let Some(item) = decoder.decode(buffer)? {
            let Decoded::Frame(frame) = item else {
                continue;
            };
            match frame.command() {
                Command::Connected => return Ok(frame),
                Command::Error => {
                    let message = frame
                        .header("message")
                        .map(str::to_string)
                        .unwrap_or_else(|| frame.body_text().into_owned());
                    return Err(MessagingError::broker_rejected("CONNECT", message));
                }
                other => warn!(address, "Ignoring {} frame during handshake", other),
            }
        }
        let read = read_half
            .read_buf(buffer)
            .await
            .map_err(|e| MessagingError::io("await CONNECTED", e))?;
        if read == 0 {
            return Err(MessagingError::connection(
                address,
                "broker closed the connection during the handshake",
            ));
        }
    }
}

/// Interval at which we must send heart-beats, if any.
///
/// We offered `cx` ms; the broker's `heart-beat` header says it wants one
/// every `sy` ms. Zero on either side disables it.
fn negotiate_heartbeat(cx: u64, server_header: Option<&str>) -> Option<Duration> {
    let sy = server_header?
        .split(',')
        .nth(1)
        .and_then(|value| value.trim().parse::<u64>().ok())?;
    if cx == 0 || sy == 0 {
        return None;
    }
    Some(Duration::from_millis(cx.max(sy)))
}

struct ReadLoop {
    address: String,
    read_half: OwnedReadHalf,
    decoder: FrameDecoder,
    buffer: BytesMut,
    events: mpsc::Sender<ChannelEvent>,
    receipts: mpsc::UnboundedSender<String>,
    alive: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
}

async fn read_loop(mut ctx: ReadLoop) {
    let reason = 'connection: loop {
        loop {
            match ctx.decoder.decode(&mut ctx.buffer) {
                Ok(Some(Decoded::HeartBeat)) => {}
                Ok(Some(Decoded::Frame(frame))) => match frame.command() {
                    Command::Message => {
                        let destination = frame.header("destination").unwrap_or_default().to_string();
                        let event = ChannelEvent::Message {
                            destination,
                            payload: frame.into_body(),
                        };
                        if ctx.events.send(event).await.is_err() {
                            break 'connection "channel dropped".to_string();
                        }
                    }
                    Command::Receipt => {
                        if let Some(id) = frame.header("receipt-id") {
                            let _ = ctx.receipts.send(id.to_string());
                        }
                    }
                    Command::Error => {
                        error!(
                            address = %ctx.address,
                            message = frame.header("message").unwrap_or_default(),
                            body = %frame.body_text(),
                            "Broker reported an error"
                        );
                    }
                    other => debug!(address = %ctx.address, "Ignoring unexpected {} frame", other),
                },
                Ok(None) => break,
                Err(e) => break 'connection format!("unreadable frame: {e}"),
            }
        }

        match ctx.read_half.read_buf(&mut ctx.buffer).await {
            Ok(0) => break "broker closed the connection".to_string(),
            Ok(_) => {}
            Err(e) => break format!("read failed: {e}"),
        }
    };

    ctx.alive.store(false, Ordering::Release);
    if ctx.closing.load(Ordering::Acquire) {
        debug!(address = %ctx.address, "Reader finished after deliberate close");
        return;
    }
    warn!(address = %ctx.address, reason = %reason, "Broker connection lost");
    // `alive` already reports the loss; a full queue must not park this task
    if let Err(e) = ctx.events.try_send(ChannelEvent::Disconnected { reason }) {
        debug!(address = %ctx.address, "Disconnected event not queued: {}", e);
    }
}

async fn heartbeat_loop(
    writer: Arc<Mutex<OwnedWriteHalf>>,
    interval: Duration,
    alive: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if closing.load(Ordering::Acquire) || !alive.load(Ordering::Acquire) {
            break;
        }
        let mut writer = writer.lock().await;
        if let Err(e) = writer.write_all(b"\n").await {
            debug!("Heart-beat write failed: {}", e);
            break;
        }
    }
}
