// libs/video-call-cell/src/services/signaling.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{CallRole, InboundSignal, OutboundSignal, VideoCallError};

/// What a room subscription yields: a parsed relay message, or the loss of
/// the relay connection. Disconnection is surfaced, never retried here.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Signal(InboundSignal),
    Disconnected,
}

/// Persistent bidirectional connection to the signaling relay.
///
/// One channel may multiplex several rooms; inbound routing filters by room
/// so sessions never see each other's traffic. Messages from one client to
/// one room are delivered in send order.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Establish the relay connection. Idempotent if already connected.
    async fn connect(&self) -> Result<(), VideoCallError>;

    /// Deliver a room-scoped message to the relay. Fire-and-forget from the
    /// caller's perspective; errors mean the message never left this client.
    async fn send(&self, signal: OutboundSignal) -> Result<(), VideoCallError>;

    /// Subscribe to the inbound messages of one room.
    fn subscribe(&self, room: &str) -> mpsc::UnboundedReceiver<ChannelEvent>;

    /// Announce presence in a room.
    async fn join_room(
        &self,
        room: &str,
        appointment_id: Uuid,
        role: CallRole,
    ) -> Result<(), VideoCallError> {
        self.send(OutboundSignal::JoinRoom {
            room: room.to_string(),
            appointment_id,
            role,
        })
        .await
    }
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type RoomRegistry = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<ChannelEvent>>>>;

/// Relay frame envelope: `{"room": ..., "event": ..., "data": {...}}`.
#[derive(Debug, Deserialize)]
struct RawFrame {
    room: String,
    event: String,
    #[serde(default)]
    data: Value,
}

/// Production [`SignalingChannel`] over a WebSocket connection to the relay.
pub struct WebSocketSignalingChannel {
    url: String,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    rooms: RoomRegistry,
}

impl WebSocketSignalingChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sink: tokio::sync::Mutex::new(None),
            rooms: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl SignalingChannel for WebSocketSignalingChannel {
    async fn connect(&self) -> Result<(), VideoCallError> {
        let mut sink_slot = self.sink.lock().await;
        if sink_slot.is_some() {
            debug!("Signaling channel already connected");
            return Ok(());
        }

        info!("Connecting to signaling relay: {}", self.url);
        let (stream, _response) = connect_async(&self.url).await.map_err(|e| {
            VideoCallError::SignalingConnection {
                message: format!("Failed to connect to relay: {}", e),
            }
        })?;

        let (sink, source) = stream.split();
        *sink_slot = Some(sink);

        let rooms = Arc::clone(&self.rooms);
        tokio::spawn(read_loop(source, rooms));

        info!("Connected to signaling relay");
        Ok(())
    }

    async fn send(&self, signal: OutboundSignal) -> Result<(), VideoCallError> {
        let frame = encode_frame(&signal)?;
        debug!(
            "Sending {} to room {}",
            signal.event_name(),
            signal.room()
        );

        let mut sink_slot = self.sink.lock().await;
        let sink = sink_slot
            .as_mut()
            .ok_or_else(|| VideoCallError::SignalingConnection {
                message: "Signaling channel is not connected".to_string(),
            })?;

        sink.send(Message::Text(frame)).await.map_err(|e| {
            VideoCallError::SignalingConnection {
                message: format!("Failed to send {}: {}", signal.event_name(), e),
            }
        })
    }

    fn subscribe(&self, room: &str) -> mpsc::UnboundedReceiver<ChannelEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        rooms.insert(room.to_string(), tx);
        rx
    }
}

async fn read_loop(
    mut source: futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    rooms: RoomRegistry,
) {
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => route_frame(&text, &rooms),
            Ok(Message::Close(_)) => {
                info!("Signaling relay closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Signaling relay read error: {}", e);
                break;
            }
        }
    }

    let rooms = rooms.lock().unwrap_or_else(|e| e.into_inner());
    for (room, tx) in rooms.iter() {
        debug!("Notifying room {} of relay disconnect", room);
        let _ = tx.send(ChannelEvent::Disconnected);
    }
}

/// Parse one relay frame and hand it to the subscriber of its room.
/// Malformed frames are logged and ignored; they must never take the
/// session down.
fn route_frame(text: &str, rooms: &RoomRegistry) {
    let frame: RawFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Ignoring malformed signaling frame: {}", e);
            return;
        }
    };

    let signal: InboundSignal =
        match serde_json::from_value(json!({ "event": frame.event, "data": frame.data })) {
            Ok(signal) => signal,
            Err(e) => {
                warn!("Ignoring unknown signaling event '{}': {}", frame.event, e);
                return;
            }
        };

    let mut rooms = rooms.lock().unwrap_or_else(|e| e.into_inner());
    match rooms.get(&frame.room) {
        Some(tx) => {
            if tx.send(ChannelEvent::Signal(signal)).is_err() {
                rooms.remove(&frame.room);
            }
        }
        None => debug!("No subscriber for room {}, dropping frame", frame.room),
    }
}

fn encode_frame(signal: &OutboundSignal) -> Result<String, VideoCallError> {
    let mut value = serde_json::to_value(signal).map_err(|e| VideoCallError::Internal {
        message: format!("Failed to encode signaling frame: {}", e),
    })?;
    value["room"] = json!(signal.room());
    Ok(value.to_string())
}
