use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Coarse lifecycle status of a robot as shown on the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotStatus {
    #[serde(alias = "ACTIVE")]
    Active,
    #[serde(alias = "IDLE")]
    Idle,
    #[default]
    #[serde(alias = "OFFLINE")]
    Offline,
    #[serde(alias = "RESTARTING", alias = "rebooting")]
    Restarting,
}

impl RobotStatus {
    pub fn is_online(self) -> bool {
        self != Self::Offline
    }

    /// Map a self-reported agent status onto the hub's set. Agents also
    /// speak `online`, `error` and `maintenance`, which carry no lifecycle
    /// change here.
    pub fn from_report(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "idle" => Some(Self::Idle),
            "offline" => Some(Self::Offline),
            "restarting" | "rebooting" => Some(Self::Restarting),
            _ => None,
        }
    }
}

/// Serde helper for the `status` field of agent reports. Never fails:
/// unrecognized strings and non-string values become `None`.
pub fn deserialize_reported_status<'de, D>(deserializer: D) -> Result<Option<RobotStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(RobotStatus::from_report))
}

impl std::fmt::Display for RobotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Idle => f.write_str("idle"),
            Self::Offline => f.write_str("offline"),
            Self::Restarting => f.write_str("restarting"),
        }
    }
}

/// Whether the robot's ROS workspace (person following stack) is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    Running,
    #[default]
    Stopped,
}

impl From<bool> for WorkspaceStatus {
    fn from(running: bool) -> Self {
        if running { Self::Running } else { Self::Stopped }
    }
}

/// Last-known state of one robot. Snapshots of this record are what
/// dashboards and REST callers see; the hub's store owns the live copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Robot {
    pub id: String,
    pub hostname: Option<String>,
    pub capabilities: Vec<String>,
    pub status: RobotStatus,
    pub current_action: String,
    pub battery_level: Option<u8>,
    pub workspace_status: WorkspaceStatus,
    pub create3_connected: bool,
    pub oak_camera_connected: bool,
    pub cpu_percent: Option<f64>,
    pub temperature: Option<f64>,
    pub memory_percent: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
    /// Set while an issued command's optimistic state awaits the agent.
    pub pending_confirmation: bool,
}

impl Robot {
    /// A freshly seen robot: offline, idle action, no metrics yet.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hostname: None,
            capabilities: Vec::new(),
            status: RobotStatus::Offline,
            current_action: "idle".to_string(),
            battery_level: None,
            workspace_status: WorkspaceStatus::Stopped,
            create3_connected: false,
            oak_camera_connected: false,
            cpu_percent: None,
            temperature: None,
            memory_percent: None,
            last_update: None,
            pending_confirmation: false,
        }
    }

    /// Compare everything an operator can see except the report timestamp.
    pub fn same_state(&self, other: &Robot) -> bool {
        let mut a = self.clone();
        a.last_update = other.last_update;
        a == *other
    }
}

/// Tally of the fleet used by the exhibition status view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExhibitionStatus {
    pub total_robots: usize,
    pub online_robots: usize,
    pub active_robots: usize,
    pub exhibition_running: bool,
}

impl ExhibitionStatus {
    pub fn from_robots<'a>(robots: impl IntoIterator<Item = &'a Robot>) -> Self {
        let mut status = Self::default();
        for robot in robots {
            status.total_robots += 1;
            if robot.status.is_online() {
                status.online_robots += 1;
            }
            if robot.status == RobotStatus::Active {
                status.active_robots += 1;
            }
        }
        status.exhibition_running = status.active_robots > 0;
        status
    }
}
