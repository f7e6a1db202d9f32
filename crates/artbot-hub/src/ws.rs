use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use axum::extract::{ConnectInfo, Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use artbot_core::net::protocol::{MAX_MESSAGE_SIZE, decode_dashboard_request};
use artbot_core::role::Role;

use crate::auth::OperatorRole;
use crate::channel::{Channel, ChannelReceiver};
use crate::config::FrameRate;
use crate::registry::Subscription;
use crate::state::{AppState, ConnectionGuard};

/// Claim one of the configured WebSocket slots before upgrading.
fn reserve_slot(state: &AppState) -> Result<ConnectionGuard, StatusCode> {
    let max = state.config.limits.max_ws_connections;
    ConnectionGuard::try_acquire(&state.ws_connection_count, max).ok_or_else(|| {
        tracing::warn!(max, "WebSocket connection cap reached");
        StatusCode::SERVICE_UNAVAILABLE
    })
}

/// Agent ids double as robot ids and show up in logs and URLs.
pub fn is_valid_agent_id(agent_id: &str) -> bool {
    !agent_id.is_empty()
        && agent_id.len() <= 64
        && agent_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// GET /ws/agent/{agent_id}
pub async fn agent_ws_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(agent_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    if !is_valid_agent_id(&agent_id) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let slot = reserve_slot(&state)?;
    Ok(ws
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_agent_socket(socket, state, agent_id, peer, slot)))
}

/// GET /ws/dashboard
pub async fn dashboard_ws_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    OperatorRole(role): OperatorRole,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    let slot = reserve_slot(&state)?;
    Ok(ws
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_dashboard_socket(socket, state, role, peer, slot)))
}

async fn handle_agent_socket(
    socket: WebSocket,
    state: AppState,
    agent_id: String,
    peer: SocketAddr,
    _slot: ConnectionGuard,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (channel, rx) = state.hub.open_agent_channel_from(peer.ip());
    tracing::info!(agent_id = %agent_id, channel = %channel.id(), %peer, "Agent socket opened");

    let mut writer = spawn_writer(ws_sender, rx);
    agent_read_loop(&mut ws_receiver, &mut writer, &state, &agent_id, &channel).await;

    channel.close();
    state.hub.disconnect(channel.id()).await;
    writer.abort();
    tracing::info!(agent_id = %agent_id, channel = %channel.id(), "Agent socket closed");
}

async fn handle_dashboard_socket(
    socket: WebSocket,
    state: AppState,
    role: Role,
    peer: SocketAddr,
    _slot: ConnectionGuard,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (sub, rx) = state.hub.connect_dashboard(role).await;
    tracing::debug!(channel = %sub.channel_id, %peer, "Dashboard socket opened");

    let mut writer = spawn_writer(ws_sender, rx);
    dashboard_read_loop(&mut ws_receiver, &mut writer, &state, sub).await;

    state.hub.disconnect(sub.channel_id).await;
    writer.abort();
}

/// Pump queued frames to the socket until the channel closes or the socket
/// fails, then send a close frame.
fn spawn_writer(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: ChannelReceiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender
                .send(Message::Text(frame.to_string().into()))
                .await
                .is_err()
            {
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    })
}

/// Inbound frame allowance for one socket. Refills continuously at the
/// connection kind's configured rate and holds at most `burst` frames.
struct FrameBudget {
    rate: FrameRate,
    available: f64,
    refilled_at: Instant,
    /// Frames refused since the last admitted one.
    dropped: u64,
}

impl FrameBudget {
    fn new(rate: FrameRate, now: Instant) -> Self {
        Self {
            rate,
            available: f64::from(rate.burst),
            refilled_at: now,
            dropped: 0,
        }
    }

    fn admit(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        self.available =
            (self.available + elapsed * self.rate.per_sec).min(f64::from(self.rate.burst));
        self.refilled_at = now;
        if self.available >= 1.0 {
            self.available -= 1.0;
            true
        } else {
            self.dropped += 1;
            false
        }
    }

    /// Spend one frame, logging once when a peer goes over budget and once
    /// when it comes back with the number of frames it lost.
    fn check(&mut self, connection: &str) -> bool {
        if !self.admit(Instant::now()) {
            if self.dropped == 1 {
                tracing::warn!(connection, "Over frame budget, dropping frames");
            }
            return false;
        }
        if self.dropped > 0 {
            tracing::warn!(connection, dropped = self.dropped, "Back under frame budget");
            self.dropped = 0;
        }
        true
    }
}

/// Next text frame from the socket, or `None` once the peer goes away, the
/// writer has stopped (channel closed by the hub) or the server shuts down.
async fn next_text(
    ws_receiver: &mut SplitStream<WebSocket>,
    writer: &mut JoinHandle<()>,
    shutdown: &CancellationToken,
) -> Option<Utf8Bytes> {
    loop {
        let msg = tokio::select! {
            _ = &mut *writer => return None,
            _ = shutdown.cancelled() => return None,
            msg = ws_receiver.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => return Some(text),
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
            Some(Ok(_)) => continue,
        }
    }
}

async fn agent_read_loop(
    ws_receiver: &mut SplitStream<WebSocket>,
    writer: &mut JoinHandle<()>,
    state: &AppState,
    agent_id: &str,
    channel: &Channel,
) {
    let mut budget = FrameBudget::new(state.config.limits.agent_rate, Instant::now());

    while let Some(text) = next_text(ws_receiver, writer, &state.shutdown).await {
        if !budget.check(agent_id) {
            continue;
        }
        // Errors are logged by the router; the channel stays open.
        let _ = state
            .hub
            .handle_agent_frame(agent_id, channel, text.as_str())
            .await;
    }
}

async fn dashboard_read_loop(
    ws_receiver: &mut SplitStream<WebSocket>,
    writer: &mut JoinHandle<()>,
    state: &AppState,
    sub: Subscription,
) {
    let mut budget = FrameBudget::new(state.config.limits.dashboard_rate, Instant::now());
    let connection = sub.channel_id.to_string();

    while let Some(text) = next_text(ws_receiver, writer, &state.shutdown).await {
        if !budget.check(&connection) {
            continue;
        }
        match decode_dashboard_request(text.as_str()) {
            Ok(request) => state.hub.handle_dashboard_request(sub, request).await,
            Err(e) => {
                tracing::warn!(channel = %sub.channel_id, error = %e, "Dropping invalid dashboard message");
            },
        }
    }
}
