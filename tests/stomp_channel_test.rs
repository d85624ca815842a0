//! # STOMP Channel Tests
//!
//! `StompChannel` against a scripted broker on a loopback socket. The broker
//! side uses the crate's own frame codec to read what the channel sends.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use pbj_bridge::messaging::{
    AckMode, BrokerCredentials, ChannelEvent, Command, ConnectionState, Decoded, Frame,
    FrameDecoder, MessagingError, StompChannel, StompChannelConfig, TransportChannel,
};

const WAIT: Duration = Duration::from_secs(5);

/// Broker end of one accepted connection
struct ScriptedPeer {
    stream: TcpStream,
    decoder: FrameDecoder,
    buffer: BytesMut,
}

impl ScriptedPeer {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        Self {
            stream,
            decoder: FrameDecoder::default(),
            buffer: BytesMut::new(),
        }
    }

    /// Next frame or heart-beat; `None` once the client hangs up
    async fn next_item(&mut self) -> Option<Decoded> {
        loop {
            if let Some(item) = self.decoder.decode(&mut self.buffer).unwrap() {
                return Some(item);
            }
            let read = self.stream.read_buf(&mut self.buffer).await.ok()?;
            if read == 0 {
                return None;
            }
        }
    }

    async fn next_frame(&mut self) -> Frame {
        loop {
            match self.next_item().await {
                Some(Decoded::Frame(frame)) => return frame,
                Some(Decoded::HeartBeat) => continue,
                None => panic!("client closed the connection"),
            }
        }
    }

    async fn send(&mut self, frame: Frame) {
        self.stream.write_all(&frame.to_bytes()).await.unwrap();
    }

    /// Read CONNECT and answer CONNECTED
    async fn handshake(&mut self, heart_beat: &str) -> Frame {
        let connect = self.next_frame().await;
        assert_eq!(connect.command(), Command::Connect);
        self.send(
            Frame::new(Command::Connected)
                .with_header("version", "1.2")
                .with_header("heart-beat", heart_beat),
        )
        .await;
        connect
    }
}

async fn listener() -> (TcpListener, BrokerCredentials) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (
        listener,
        BrokerCredentials::new("127.0.0.1", port, "guest", "secret"),
    )
}

fn config() -> StompChannelConfig {
    StompChannelConfig {
        connect_timeout_ms: 2_000,
        receipt_timeout_ms: 500,
        ..StompChannelConfig::default()
    }
}

#[tokio::test]
async fn test_session_frames() {
    let (listener, credentials) = listener().await;
    let broker = tokio::spawn(async move {
        let mut peer = ScriptedPeer::accept(&listener).await;
        let mut frames = vec![peer.handshake("0,0").await];
        for _ in 0..4 {
            let frame = peer.next_frame().await;
            if frame.command() == Command::Disconnect {
                let receipt = frame.header("receipt").unwrap_or_default().to_string();
                peer.send(Frame::new(Command::Receipt).with_header("receipt-id", receipt))
                    .await;
            }
            frames.push(frame);
        }
        frames
    });

    let mut channel = StompChannel::new(config());
    let request_id = channel.request_id().to_string();

    channel.connect(&credentials).await.unwrap();
    assert_eq!(channel.state(), ConnectionState::Connected);
    channel.subscribe("to_java", AckMode::Auto).await.unwrap();
    channel.subscribe("to_java", AckMode::Auto).await.unwrap();
    assert_eq!(channel.state(), ConnectionState::Subscribed);
    channel.publish("from_java", b"<xmi/>").await.unwrap();
    channel.unsubscribe("to_java").await.unwrap();
    channel.disconnect().await.unwrap();
    assert_eq!(channel.state(), ConnectionState::Disconnected);

    let frames = timeout(WAIT, broker).await.unwrap().unwrap();
    let commands: Vec<Command> = frames.iter().map(Frame::command).collect();
    assert_eq!(
        commands,
        vec![
            Command::Connect,
            Command::Subscribe,
            Command::Send,
            Command::Unsubscribe,
            Command::Disconnect
        ]
    );

    let connect = &frames[0];
    assert_eq!(connect.header("accept-version"), Some("1.2"));
    assert_eq!(connect.header("host"), Some("127.0.0.1"));
    assert_eq!(connect.header("login"), Some("guest"));
    assert_eq!(connect.header("passcode"), Some("secret"));
    assert_eq!(connect.header("heart-beat"), Some("10000,10000"));
    assert_eq!(connect.header("request-id"), Some(request_id.as_str()));

    let subscription_id = format!("{request_id}-1");
    let subscribe = &frames[1];
    assert_eq!(subscribe.header("destination"), Some("to_java"));
    assert_eq!(subscribe.header("id"), Some(subscription_id.as_str()));
    assert_eq!(subscribe.header("ack"), Some("auto"));

    let send = &frames[2];
    assert_eq!(send.header("destination"), Some("from_java"));
    assert_eq!(send.header("destination-type"), Some("ANYCAST"));
    assert_eq!(send.header("content-type"), Some("text/plain"));
    assert_eq!(&send.body()[..], b"<xmi/>");

    assert_eq!(frames[3].header("id"), Some(subscription_id.as_str()));
    assert_eq!(frames[4].header("receipt"), Some(request_id.as_str()));

    // A deliberate close is not reported as a lost connection
    assert!(timeout(Duration::from_millis(100), channel.next_event())
        .await
        .is_err());
}

#[tokio::test]
async fn test_message_delivery_then_broker_drop() {
    let (listener, credentials) = listener().await;
    let broker = tokio::spawn(async move {
        let mut peer = ScriptedPeer::accept(&listener).await;
        peer.handshake("0,0").await;
        let subscribe = peer.next_frame().await;
        let subscription = subscribe.header("id").unwrap_or_default().to_string();
        peer.send(
            Frame::new(Command::Message)
                .with_header("destination", "to_java")
                .with_header("message-id", "m-1")
                .with_header("subscription", subscription)
                .with_body("hello"),
        )
        .await;
        // Dropping the peer closes the socket
    });

    let mut channel = StompChannel::new(config());
    channel.connect(&credentials).await.unwrap();
    channel.subscribe("to_java", AckMode::Auto).await.unwrap();

    let first = timeout(WAIT, channel.next_event()).await.unwrap();
    assert_eq!(
        first,
        Some(ChannelEvent::Message {
            destination: "to_java".to_string(),
            payload: bytes::Bytes::from_static(b"hello"),
        })
    );
    let second = timeout(WAIT, channel.next_event()).await.unwrap();
    assert!(matches!(second, Some(ChannelEvent::Disconnected { .. })));
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert!(!channel.is_connected());

    // Exactly one Disconnected per connection
    assert!(timeout(Duration::from_millis(100), channel.next_event())
        .await
        .is_err());
    let err = channel.publish("from_java", b"late").await.unwrap_err();
    assert!(matches!(err, MessagingError::NotConnected { .. }));
    channel.disconnect().await.unwrap();
    broker.await.unwrap();
}

#[tokio::test]
async fn test_connect_refused() {
    let (listener, credentials) = listener().await;
    drop(listener);

    let mut channel = StompChannel::new(config());
    let err = channel.connect(&credentials).await.unwrap_err();
    assert!(matches!(err, MessagingError::Connection { .. }));
    assert!(err.is_connection_loss());
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_broker_error_on_connect() {
    let (listener, credentials) = listener().await;
    let broker = tokio::spawn(async move {
        let mut peer = ScriptedPeer::accept(&listener).await;
        let connect = peer.next_frame().await;
        assert_eq!(connect.command(), Command::Connect);
        peer.send(
            Frame::new(Command::Error)
                .with_header("message", "bad credentials")
                .with_body("login failed"),
        )
        .await;
    });

    let mut channel = StompChannel::new(config());
    let err = channel.connect(&credentials).await.unwrap_err();
    match &err {
        MessagingError::BrokerRejected { operation, message } => {
            assert_eq!(operation, "CONNECT");
            assert_eq!(message, "bad credentials");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    broker.await.unwrap();
}

#[tokio::test]
async fn test_heartbeat_is_sent_when_negotiated() {
    let (listener, credentials) = listener().await;
    let broker = tokio::spawn(async move {
        let mut peer = ScriptedPeer::accept(&listener).await;
        peer.handshake("0,20").await;
        matches!(peer.next_item().await, Some(Decoded::HeartBeat))
    });

    let mut channel = StompChannel::new(StompChannelConfig {
        heartbeat_ms: 20,
        ..config()
    });
    channel.connect(&credentials).await.unwrap();

    let heartbeat_seen = timeout(WAIT, broker).await.unwrap().unwrap();
    assert!(heartbeat_seen);
}

async fn wait_for_loss(channel: &StompChannel) -> bool {
    timeout(WAIT, async {
        while channel.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_reconnect_subscribes_once_on_the_new_connection() {
    let (listener, credentials) = listener().await;
    let broker = tokio::spawn(async move {
        let mut first = ScriptedPeer::accept(&listener).await;
        first.handshake("0,0").await;
        assert_eq!(first.next_frame().await.command(), Command::Subscribe);
        drop(first);

        let mut second = ScriptedPeer::accept(&listener).await;
        second.handshake("0,0").await;
        let subscribe = second.next_frame().await;
        assert_eq!(subscribe.command(), Command::Subscribe);
        let subscription = subscribe.header("id").unwrap_or_default().to_string();
        second
            .send(
                Frame::new(Command::Message)
                    .with_header("destination", "to_java")
                    .with_header("message-id", "m-2")
                    .with_header("subscription", subscription)
                    .with_body("again"),
            )
            .await;

        let mut subscribes = vec![subscribe];
        loop {
            let frame = second.next_frame().await;
            match frame.command() {
                Command::Subscribe => subscribes.push(frame),
                Command::Disconnect => {
                    let receipt = frame.header("receipt").unwrap_or_default().to_string();
                    second
                        .send(Frame::new(Command::Receipt).with_header("receipt-id", receipt))
                        .await;
                    break;
                }
                _ => {}
            }
        }
        subscribes
    });

    let mut channel = StompChannel::new(config());
    let request_id = channel.request_id().to_string();
    channel.connect(&credentials).await.unwrap();
    channel.subscribe("to_java", AckMode::Auto).await.unwrap();

    let lost = timeout(WAIT, channel.next_event()).await.unwrap();
    assert!(matches!(lost, Some(ChannelEvent::Disconnected { .. })));
    assert_eq!(channel.state(), ConnectionState::Disconnected);

    channel.connect(&credentials).await.unwrap();
    // The dropped connection's subscription does not carry over
    assert_eq!(channel.state(), ConnectionState::Connected);
    channel.subscribe("to_java", AckMode::Auto).await.unwrap();
    channel.subscribe("to_java", AckMode::Auto).await.unwrap();
    assert_eq!(channel.state(), ConnectionState::Subscribed);

    let delivered = timeout(WAIT, channel.next_event()).await.unwrap();
    assert_eq!(
        delivered,
        Some(ChannelEvent::Message {
            destination: "to_java".to_string(),
            payload: bytes::Bytes::from_static(b"again"),
        })
    );
    channel.disconnect().await.unwrap();

    let subscribes = timeout(WAIT, broker).await.unwrap().unwrap();
    assert_eq!(subscribes.len(), 1);
    let expected_id = format!("{request_id}-2");
    assert_eq!(subscribes[0].header("destination"), Some("to_java"));
    assert_eq!(subscribes[0].header("id"), Some(expected_id.as_str()));
}

#[tokio::test]
async fn test_unread_disconnects_do_not_pile_up() {
    let (listener, credentials) = listener().await;
    let broker = tokio::spawn(async move {
        for _ in 0..3 {
            let mut peer = ScriptedPeer::accept(&listener).await;
            peer.handshake("0,0").await;
        }
    });

    // Like the sink: reconnects on demand and never reads its events
    let mut channel = StompChannel::new(StompChannelConfig {
        event_buffer: 1,
        ..config()
    });
    for _ in 0..3 {
        timeout(WAIT, channel.connect(&credentials))
            .await
            .unwrap()
            .unwrap();
        assert!(wait_for_loss(&channel).await);
    }
    timeout(WAIT, broker).await.unwrap().unwrap();

    // Only the latest connection's loss is still queued
    let event = timeout(WAIT, channel.next_event()).await.unwrap();
    assert!(matches!(event, Some(ChannelEvent::Disconnected { .. })));
    assert!(timeout(Duration::from_millis(100), channel.next_event())
        .await
        .is_err());
}
