use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::Action;
use crate::robot::{Robot, RobotStatus, WorkspaceStatus};
use crate::role::Role;

/// Target id that addresses every known robot at once.
pub const ALL_ROBOTS: &str = "all";

// Agent -> Hub

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AgentMessage {
    Register(RegisterMsg),
    Heartbeat(RobotReport),
    RobotStatus(RobotReport),
    CommandResponse(CommandResponseMsg),
    LogEntry(LogEntryMsg),
}

impl AgentMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register(_) => "register",
            Self::Heartbeat(_) => "heartbeat",
            Self::RobotStatus(_) => "robot_status",
            Self::CommandResponse(_) => "command_response",
            Self::LogEntry(_) => "log_entry",
        }
    }
}

/// Agent metadata announced once per connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterMsg {
    pub hostname: Option<String>,
    pub capabilities: Vec<String>,
    pub version: Option<String>,
    pub ip_address: Option<String>,
}

/// Partial status update. Heartbeats carry the essential metrics; full
/// status reports may carry every field. Absent fields leave the stored
/// value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotReport {
    #[serde(
        deserialize_with = "crate::time::deserialize_optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    /// Values outside the hub's status set (`online`, `error`, ...) decode
    /// as `None` and leave the stored status alone.
    #[serde(
        deserialize_with = "crate::robot::deserialize_reported_status",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<RobotStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_status: Option<WorkspaceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_running: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create3_connected: Option<bool>,
    #[serde(alias = "oak_connected", skip_serializing_if = "Option::is_none")]
    pub oak_camera_connected: Option<bool>,
    #[serde(alias = "cpu_usage", skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(alias = "memory_usage", skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f64>,
}

impl RobotReport {
    /// Range checks applied at the wire boundary.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(battery) = self.battery_level
            && battery > 100
        {
            return Err(format!("battery_level out of range: {battery}"));
        }
        for (name, value) in [
            ("cpu_percent", self.cpu_percent),
            ("memory_percent", self.memory_percent),
        ] {
            if let Some(v) = value
                && !(0.0..=100.0).contains(&v)
            {
                return Err(format!("{name} out of range: {v}"));
            }
        }
        if let Some(t) = self.temperature
            && !t.is_finite()
        {
            return Err("temperature is not a number".to_string());
        }
        if let Some(ref action) = self.current_action
            && action.len() > 64
        {
            return Err("current_action exceeds 64 chars".to_string());
        }
        Ok(())
    }

    /// Explicit workspace status, or the one implied by `workspace_running`.
    pub fn workspace(&self) -> Option<WorkspaceStatus> {
        self.workspace_status
            .or(self.workspace_running.map(WorkspaceStatus::from))
    }

    /// Explicit action label, or the one implied by `workspace_running`.
    pub fn action(&self) -> Option<String> {
        self.current_action.clone().or_else(|| {
            self.workspace_running.map(|running| {
                let label = if running { "person_following" } else { "idle" };
                label.to_string()
            })
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandResponseMsg {
    pub command_id: Option<Uuid>,
    pub success: Option<bool>,
    /// Older agents answer `{"status": "success" | "error"}` instead.
    pub status: Option<String>,
    pub message: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl CommandResponseMsg {
    pub fn succeeded(&self) -> bool {
        self.success
            .unwrap_or_else(|| matches!(self.status.as_deref(), Some("success" | "completed")))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    #[serde(alias = "debug")]
    Debug,
    #[default]
    #[serde(alias = "info")]
    Info,
    #[serde(alias = "warning", alias = "WARN", alias = "warn")]
    Warning,
    #[serde(alias = "error")]
    Error,
    #[serde(alias = "critical")]
    Critical,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// One log line forwarded by an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogEntryMsg {
    #[serde(
        deserialize_with = "crate::time::deserialize_optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntryMsg {
    pub fn validate(&self) -> Result<(), String> {
        if self.message.is_empty() {
            return Err("message is empty".to_string());
        }
        if self.message.len() > 4096 {
            return Err("message exceeds 4096 bytes".to_string());
        }
        Ok(())
    }
}

// Hub -> Agent

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AgentCommand {
    RobotCommand(RobotCommandMsg),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotCommandMsg {
    pub command_id: Uuid,
    pub robot_id: String,
    pub action: Action,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

// Dashboard -> Hub

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DashboardRequest {
    SendCommand(SendCommandMsg),
    Ping,
}

/// Operator command; `robot_id` may be [`ALL_ROBOTS`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendCommandMsg {
    pub robot_id: String,
    pub action: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

// Hub -> Dashboard

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HubEvent {
    FleetSnapshot(FleetSnapshotMsg),
    RobotUpdate(RobotUpdateMsg),
    RobotRemoved(RobotRemovedMsg),
    ConnectionStatus(ConnectionStatusMsg),
    CommandResponse(CommandResponseEvent),
    CommandTimeout(CommandTimeoutMsg),
    CommandAck(CommandAckMsg),
    SystemAlert(SystemAlertMsg),
    LogMessage(LogRecord),
    Pong,
}

impl HubEvent {
    pub fn robot_update(robot: Robot) -> Self {
        Self::RobotUpdate(RobotUpdateMsg { robot })
    }

    /// Role an event is restricted to, if any.
    pub fn audience(&self) -> Option<Role> {
        match self {
            Self::ConnectionStatus(_) => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetSnapshotMsg {
    pub robots: Vec<Robot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotUpdateMsg {
    pub robot: Robot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotRemovedMsg {
    pub robot_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatusMsg {
    pub agent_id: String,
    pub connected: bool,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponseEvent {
    pub command_id: Uuid,
    pub robot_id: String,
    pub action: Action,
    pub success: bool,
    pub message: Option<String>,
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandTimeoutMsg {
    pub command_id: Uuid,
    pub robot_id: String,
    pub action: Action,
    pub issued_at: DateTime<Utc>,
}

/// Per-robot result of a dashboard-issued command, sent to the issuer only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAckMsg {
    pub action: String,
    pub results: Vec<DispatchResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub robot_id: String,
    pub command_id: Option<Uuid>,
    /// Machine-readable failure code (`robot_offline`, `invalid_action`, ...).
    pub error: Option<String>,
}

impl DispatchResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemAlertMsg {
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub robot_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A stored log line, as kept in a robot's log buffer and broadcast to
/// dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub robot_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// `robot` unless the agent named a more specific origin.
    pub source: String,
    pub error_code: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl LogRecord {
    pub fn from_entry(robot_id: &str, entry: LogEntryMsg, received_at: DateTime<Utc>) -> Self {
        Self {
            robot_id: robot_id.to_string(),
            timestamp: entry.timestamp.unwrap_or(received_at),
            level: entry.level,
            message: entry.message,
            source: entry.source.unwrap_or_else(|| "robot".to_string()),
            error_code: entry.error_code,
            details: entry.details,
        }
    }
}
