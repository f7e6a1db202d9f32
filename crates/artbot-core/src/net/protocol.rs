use serde::Serialize;
use serde::de::DeserializeOwned;

use super::messages::{AgentCommand, AgentMessage, DashboardRequest, HubEvent};

/// Maximum text frame size accepted from or produced for a channel.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty message")]
    EmptyMessage,
    #[error("payload too large: {0} bytes (max {MAX_MESSAGE_SIZE})")]
    PayloadTooLarge(usize),
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: String, reason: String },
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("serialize error: {0}")]
    SerializeError(String),
}

/// Encode any wire message as a JSON text frame.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(msg).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(text.len()));
    }
    Ok(text)
}

pub fn encode_hub_event(event: &HubEvent) -> Result<String, ProtocolError> {
    encode(event)
}

pub fn encode_agent_command(cmd: &AgentCommand) -> Result<String, ProtocolError> {
    encode(cmd)
}

/// Read the `type` discriminator without decoding the payload.
pub fn peek_message_type(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.get("type")?.as_str().map(str::to_string)
}

fn decode_tagged<T: DeserializeOwned>(text: &str, known: &[&str]) -> Result<T, ProtocolError> {
    if text.trim().is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(text.len()));
    }
    let Some(kind) = peek_message_type(text) else {
        return Err(ProtocolError::Malformed(
            "expected a JSON object with a string `type` field".to_string(),
        ));
    };
    if !known.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownMessageType(kind));
    }
    serde_json::from_str(text).map_err(|e| ProtocolError::InvalidPayload {
        kind,
        reason: e.to_string(),
    })
}

/// Decode and validate a frame received on an agent channel.
pub fn decode_agent_message(text: &str) -> Result<AgentMessage, ProtocolError> {
    let msg: AgentMessage = decode_tagged(
        text,
        &[
            "register",
            "heartbeat",
            "robot_status",
            "command_response",
            "log_entry",
        ],
    )?;
    let checked = match msg {
        AgentMessage::Heartbeat(ref report) | AgentMessage::RobotStatus(ref report) => {
            report.validate()
        },
        AgentMessage::LogEntry(ref entry) => entry.validate(),
        _ => Ok(()),
    };
    checked.map_err(|reason| ProtocolError::InvalidPayload {
        kind: msg.kind().to_string(),
        reason,
    })?;
    Ok(msg)
}

/// Decode a frame received on a dashboard channel.
pub fn decode_dashboard_request(text: &str) -> Result<DashboardRequest, ProtocolError> {
    decode_tagged(text, &["send_command", "ping"])
}

/// Decode a hub event (used by dashboard clients and tests).
pub fn decode_hub_event(text: &str) -> Result<HubEvent, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Decode a command frame (used by agents and tests).
pub fn decode_agent_command(text: &str) -> Result<AgentCommand, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
