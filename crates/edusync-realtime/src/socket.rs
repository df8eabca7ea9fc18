//! Phoenix-channel websocket client for the hosted realtime server.
//!
//! The socket runs in a dedicated tokio task. Callers talk to it through a
//! [`SocketCommand`] sender and read [`SocketNotification`]s back, so the
//! rest of the crate never touches the websocket directly. Lost connections
//! are retried with capped exponential backoff and every joined topic is
//! joined again once the socket is back.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use edusync_shared::constants::HEARTBEAT_INTERVAL_SECS;
use edusync_shared::protocol::{ChannelEvent, RowChange};
use edusync_shared::ThreadId;

use crate::error::RealtimeError;

const TOPIC_PREFIX: &str = "realtime:";
const PHOENIX_TOPIC: &str = "phoenix";
const EVENT_JOIN: &str = "phx_join";
const EVENT_REPLY: &str = "phx_reply";
const EVENT_ERROR: &str = "phx_error";
const EVENT_CLOSE: &str = "phx_close";
const EVENT_HEARTBEAT: &str = "heartbeat";
const EVENT_BROADCAST: &str = "broadcast";
const EVENT_POSTGRES_CHANGES: &str = "postgres_changes";

const COMMAND_CAPACITY: usize = 256;
const NOTIFICATION_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Topics and frames
// ---------------------------------------------------------------------------

/// A channel on the realtime server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Row changes of one table.
    Table(String),
    /// Ephemeral broadcasts of one conversation thread.
    Thread(ThreadId),
}

impl Topic {
    pub fn name(&self) -> String {
        match self {
            Topic::Table(table) => format!("{TOPIC_PREFIX}{table}"),
            Topic::Thread(thread) => thread.to_topic(),
        }
    }

    fn join_config(&self) -> Value {
        match self {
            Topic::Table(table) => json!({
                "broadcast": {"self": false},
                "postgres_changes": [{"event": "*", "schema": "public", "table": table}],
            }),
            Topic::Thread(_) => json!({
                "broadcast": {"self": false},
            }),
        }
    }
}

/// Recover the thread a broadcast topic belongs to.
pub fn thread_for_topic(topic: &str) -> Option<ThreadId> {
    topic.strip_prefix(TOPIC_PREFIX)?.parse().ok()
}

/// One Phoenix protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Frame {
    pub fn join(topic: &Topic, access_token: &str, reference: u64) -> Self {
        Self {
            topic: topic.name(),
            event: EVENT_JOIN.into(),
            payload: json!({"config": topic.join_config(), "access_token": access_token}),
            reference: Some(reference.to_string()),
        }
    }

    pub fn heartbeat(reference: u64) -> Self {
        Self {
            topic: PHOENIX_TOPIC.into(),
            event: EVENT_HEARTBEAT.into(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    pub fn broadcast(topic: &str, event: &ChannelEvent, reference: u64) -> Self {
        Self {
            topic: topic.into(),
            event: EVENT_BROADCAST.into(),
            payload: json!({
                "type": EVENT_BROADCAST,
                "event": event.event,
                "payload": event.payload,
            }),
            reference: Some(reference.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct ChangesPayload {
    data: RowChange,
}

/// Turn an incoming frame into a notification. Replies and heartbeats
/// acknowledgements yield `None`.
pub fn decode_frame(text: &str) -> Result<Option<SocketNotification>, RealtimeError> {
    let frame: Frame = serde_json::from_str(text)?;

    let notification = match frame.event.as_str() {
        EVENT_POSTGRES_CHANGES => {
            let ChangesPayload { data } = serde_json::from_value(frame.payload)?;
            Some(SocketNotification::RowChanged(data))
        }
        EVENT_BROADCAST => {
            let event: ChannelEvent = serde_json::from_value(frame.payload)?;
            Some(SocketNotification::Broadcast {
                topic: frame.topic,
                event,
            })
        }
        EVENT_REPLY if frame.topic != PHOENIX_TOPIC => {
            let ok = frame.payload.get("status").and_then(Value::as_str) == Some("ok");
            ok.then_some(SocketNotification::Joined { topic: frame.topic })
        }
        EVENT_ERROR | EVENT_CLOSE => {
            warn!(topic = %frame.topic, event = %frame.event, "channel closed by server");
            None
        }
        _ => None,
    };
    Ok(notification)
}

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the socket task.
#[derive(Debug)]
pub enum SocketCommand {
    /// Join a topic now and after every reconnect.
    Join(Topic),
    /// Send an ephemeral broadcast on a topic.
    Broadcast { topic: String, event: ChannelEvent },
    /// Close the socket and end the task.
    Shutdown,
}

/// Notifications sent *from* the socket task.
#[derive(Debug, Clone)]
pub enum SocketNotification {
    Connected,
    Disconnected { reason: String },
    Joined { topic: String },
    RowChanged(RowChange),
    Broadcast { topic: String, event: ChannelEvent },
}

/// Configuration for spawning the socket.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Realtime endpoint, e.g. `ws://localhost:54321/realtime/v1`.
    pub url: String,
    pub api_key: String,
    pub heartbeat: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl SocketConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            heartbeat: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/websocket?apikey={}&vsn=1.0.0",
            self.url.trim_end_matches('/'),
            self.api_key
        )
    }
}

pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

// ---------------------------------------------------------------------------
// Uplink
// ---------------------------------------------------------------------------

/// Shared, optional handle to a running socket task. Hubs hold one so they
/// can join topics and publish broadcasts once a socket is attached.
#[derive(Clone, Default)]
pub struct Uplink {
    tx: Arc<RwLock<Option<mpsc::Sender<SocketCommand>>>>,
}

impl Uplink {
    pub fn connect(&self, tx: mpsc::Sender<SocketCommand>) {
        if let Ok(mut guard) = self.tx.write() {
            *guard = Some(tx);
        }
    }

    pub fn disconnect(&self) -> Option<mpsc::Sender<SocketCommand>> {
        self.tx.write().ok().and_then(|mut guard| guard.take())
    }

    pub fn is_connected(&self) -> bool {
        self.tx.read().map(|guard| guard.is_some()).unwrap_or(false)
    }

    /// Queue a command without waiting.
    pub fn send(&self, command: SocketCommand) -> Result<(), RealtimeError> {
        let guard = self.tx.read().map_err(|_| RealtimeError::NotAttached)?;
        let tx = guard.as_ref().ok_or(RealtimeError::NotAttached)?;
        tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RealtimeError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => RealtimeError::NotAttached,
        })
    }

    /// Join `topic` if a socket is attached. Without one this is a no-op.
    pub fn join(&self, topic: Topic) {
        if !self.is_connected() {
            return;
        }
        if let Err(e) = self.send(SocketCommand::Join(topic)) {
            warn!(error = %e, "could not queue topic join");
        }
    }
}

// ---------------------------------------------------------------------------
// Socket task
// ---------------------------------------------------------------------------

enum ConnectionEnd {
    Shutdown,
    Lost(String),
}

struct SocketState {
    config: SocketConfig,
    topics: Vec<Topic>,
    next_ref: u64,
    notif_tx: mpsc::Sender<SocketNotification>,
}

impl SocketState {
    fn reference(&mut self) -> u64 {
        self.next_ref += 1;
        self.next_ref
    }

    fn remember(&mut self, topic: Topic) -> bool {
        if self.topics.contains(&topic) {
            return false;
        }
        self.topics.push(topic);
        true
    }

    async fn notify(&self, notification: SocketNotification) {
        if self.notif_tx.send(notification).await.is_err() {
            debug!("notification receiver dropped");
        }
    }
}

/// Spawn the realtime socket in a background tokio task.
///
/// Returns `(command_tx, notification_rx, task)`.
pub fn spawn_socket(
    config: SocketConfig,
) -> (
    mpsc::Sender<SocketCommand>,
    mpsc::Receiver<SocketNotification>,
    JoinHandle<()>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<SocketCommand>(COMMAND_CAPACITY);
    let (notif_tx, notif_rx) = mpsc::channel::<SocketNotification>(NOTIFICATION_CAPACITY);

    let state = SocketState {
        config,
        topics: Vec::new(),
        next_ref: 0,
        notif_tx,
    };
    let task = tokio::spawn(socket_loop(state, cmd_rx));

    (cmd_tx, notif_rx, task)
}

async fn socket_loop(mut state: SocketState, mut cmd_rx: mpsc::Receiver<SocketCommand>) {
    let mut backoff = state.config.initial_backoff;

    loop {
        let endpoint = state.config.endpoint();
        debug!(url = %state.config.url, "connecting realtime socket");

        match tokio_tungstenite::connect_async(endpoint.as_str()).await {
            Ok((ws, _)) => {
                info!(url = %state.config.url, "realtime socket connected");
                backoff = state.config.initial_backoff;
                state.notify(SocketNotification::Connected).await;

                match run_connection(&mut state, &mut cmd_rx, ws).await {
                    ConnectionEnd::Shutdown => {
                        info!("realtime socket shut down");
                        return;
                    }
                    ConnectionEnd::Lost(reason) => {
                        warn!(reason = %reason, "realtime socket lost");
                        state.notify(SocketNotification::Disconnected { reason }).await;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, retry_in = ?backoff, "realtime socket connect failed");
            }
        }

        // Keep accepting commands while waiting to reconnect.
        let sleep = tokio::time::sleep(backoff);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SocketCommand::Join(topic)) => {
                            state.remember(topic);
                        }
                        Some(SocketCommand::Broadcast { topic, .. }) => {
                            debug!(topic = %topic, "dropping broadcast while offline");
                        }
                        Some(SocketCommand::Shutdown) | None => {
                            info!("realtime socket shut down while offline");
                            return;
                        }
                    }
                }
            }
        }
        backoff = next_backoff(backoff, state.config.max_backoff);
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn run_connection(
    state: &mut SocketState,
    cmd_rx: &mut mpsc::Receiver<SocketCommand>,
    ws: WsStream,
) -> ConnectionEnd {
    let (mut sink, mut stream) = ws.split();

    for topic in state.topics.clone() {
        let reference = state.reference();
        let frame = Frame::join(&topic, &state.config.api_key, reference);
        if let Err(e) = send_frame(&mut sink, &frame).await {
            return ConnectionEnd::Lost(e.to_string());
        }
    }

    let mut heartbeat = tokio::time::interval(state.config.heartbeat);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let frame = match cmd {
                    Some(SocketCommand::Join(topic)) => {
                        if !state.remember(topic.clone()) {
                            continue;
                        }
                        let reference = state.reference();
                        Frame::join(&topic, &state.config.api_key, reference)
                    }
                    Some(SocketCommand::Broadcast { topic, event }) => {
                        Frame::broadcast(&topic, &event, state.reference())
                    }
                    Some(SocketCommand::Shutdown) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return ConnectionEnd::Shutdown;
                    }
                };
                if let Err(e) = send_frame(&mut sink, &frame).await {
                    return ConnectionEnd::Lost(e.to_string());
                }
            }

            _ = heartbeat.tick() => {
                let frame = Frame::heartbeat(state.reference());
                if let Err(e) = send_frame(&mut sink, &frame).await {
                    return ConnectionEnd::Lost(e.to_string());
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match decode_frame(text.as_str()) {
                        Ok(Some(notification)) => state.notify(notification).await,
                        Ok(None) => {}
                        Err(e) => debug!(error = %e, "ignoring undecodable frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        return ConnectionEnd::Lost(format!("closed by server: {frame:?}"));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "realtime socket read failed");
                        return ConnectionEnd::Lost(e.to_string());
                    }
                    None => return ConnectionEnd::Lost("stream ended".into()),
                }
            }
        }
    }
}

async fn send_frame<S>(sink: &mut S, frame: &Frame) -> Result<(), RealtimeError>
where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(frame)?;
    sink.send(Message::Text(text.into())).await?;
    Ok(())
}
