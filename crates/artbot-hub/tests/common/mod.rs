use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use artbot_core::net::messages::{
    AgentCommand, AgentMessage, DashboardRequest, FleetSnapshotMsg, HubEvent, RobotCommandMsg,
};
use artbot_core::net::protocol::{decode_agent_command, decode_hub_event, encode};
use artbot_core::role::Role;
use artbot_core::test_helpers::register_msg;

use artbot_hub::auth::ROLE_HEADER;
use artbot_hub::config::{AuthFileConfig, HubConfig};
use artbot_hub::state::AppState;
use artbot_hub::{build_app, spawn_background_tasks};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server with no agent token.
    pub async fn new() -> Self {
        Self::from_config(HubConfig::default()).await
    }

    /// Start a test server whose agents must present `token`.
    pub async fn with_agent_token(token: &str) -> Self {
        let config = HubConfig {
            auth: AuthFileConfig {
                agent_token: Some(token.to_string()),
                ..AuthFileConfig::default()
            },
            ..HubConfig::default()
        };
        Self::from_config(config).await
    }

    /// Start a test server whose commands time out after one second.
    pub async fn with_short_timeout() -> Self {
        let mut config = HubConfig::default();
        config.commands.timeout_secs = 1;
        config.commands.sweep_interval_ms = 50;
        Self::from_config(config).await
    }

    pub async fn from_config(config: HubConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app(config);
        spawn_background_tasks(&state);

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("http://{}/api/v1{path}", self.addr)
    }

    pub fn agent_url(&self, agent_id: &str) -> String {
        format!("ws://{}/ws/agent/{agent_id}", self.addr)
    }

    pub fn dashboard_url(&self) -> String {
        format!("ws://{}/ws/dashboard", self.addr)
    }

    /// Poll until the hub has a live agent for `agent_id` (5s timeout).
    pub async fn wait_for_agent(&self, agent_id: &str) {
        let hub = &self.state.hub;
        tokio::time::timeout(Duration::from_secs(5), async {
            while !hub.is_agent_connected(agent_id).await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Timed out waiting for agent registration");
    }
}

/// Connect a WebSocket client with extra request headers.
pub async fn ws_connect_with(
    url: &str,
    headers: &[(&'static str, &str)],
) -> Result<WsStream, tokio_tungstenite::tungstenite::Error> {
    let mut request = url.into_client_request()?;
    for (name, value) in headers {
        request
            .headers_mut()
            .insert(*name, HeaderValue::from_str(value).unwrap());
    }
    let (stream, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

/// Connect an agent socket and send `register`.
pub async fn connect_agent(server: &TestServer, agent_id: &str) -> WsStream {
    let mut stream = ws_connect_with(&server.agent_url(agent_id), &[])
        .await
        .unwrap();
    send_agent_msg(&mut stream, &register_msg(agent_id)).await;
    server.wait_for_agent(agent_id).await;
    stream
}

/// Connect a dashboard with the given role and return its initial snapshot.
pub async fn connect_dashboard(server: &TestServer, role: Role) -> (WsStream, FleetSnapshotMsg) {
    let role = role.to_string();
    let mut stream = ws_connect_with(&server.dashboard_url(), &[(ROLE_HEADER, &role)])
        .await
        .unwrap();
    match read_event(&mut stream).await {
        HubEvent::FleetSnapshot(snapshot) => (stream, snapshot),
        other => panic!("Expected fleet_snapshot first, got: {other:?}"),
    }
}

pub async fn send_agent_msg(stream: &mut WsStream, msg: &AgentMessage) {
    let text = encode(msg).unwrap();
    stream.send(Message::Text(text.into())).await.unwrap();
}

pub async fn send_dashboard_request(stream: &mut WsStream, request: &DashboardRequest) {
    let text = encode(request).unwrap();
    stream.send(Message::Text(text.into())).await.unwrap();
}

/// Read the next text frame (5s timeout).
pub async fn ws_read_text(stream: &mut WsStream) -> String {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Try to read a text frame, returning None on timeout.
pub async fn ws_try_read_text(stream: &mut WsStream, timeout_ms: u64) -> Option<String> {
    tokio::time::timeout(Duration::from_millis(timeout_ms), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    panic!("WebSocket error or closed")
                },
                _ => continue,
            }
        }
    })
    .await
    .ok()
}

/// Wait until the server closes the socket (5s timeout).
pub async fn ws_expect_closed(stream: &mut WsStream) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for the server to close the socket")
}

pub async fn read_event(stream: &mut WsStream) -> HubEvent {
    decode_hub_event(&ws_read_text(stream).await).unwrap()
}

/// Skip events until one matches `pred` (5s timeout per frame).
pub async fn read_event_until(
    stream: &mut WsStream,
    mut pred: impl FnMut(&HubEvent) -> bool,
) -> HubEvent {
    loop {
        let event = read_event(stream).await;
        if pred(&event) {
            return event;
        }
    }
}

pub async fn read_command(stream: &mut WsStream) -> RobotCommandMsg {
    let AgentCommand::RobotCommand(cmd) = decode_agent_command(&ws_read_text(stream).await).unwrap();
    cmd
}
