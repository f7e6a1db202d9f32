use serde::{Deserialize, Serialize};

use crate::robot::RobotStatus;

/// Commands an operator can send to a robot's agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Start,
    Stop,
    Restart,
    Reboot,
    WorkspaceStart,
    WorkspaceStop,
    Create3Restart,
    Create3Reboot,
}

/// Returned when an action name is not in the recognized set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized action: {0}")]
pub struct UnknownAction(pub String);

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Start,
        Action::Stop,
        Action::Restart,
        Action::Reboot,
        Action::WorkspaceStart,
        Action::WorkspaceStop,
        Action::Create3Restart,
        Action::Create3Reboot,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Reboot => "reboot",
            Self::WorkspaceStart => "workspace_start",
            Self::WorkspaceStop => "workspace_stop",
            Self::Create3Restart => "create3_restart",
            Self::Create3Reboot => "create3_reboot",
        }
    }

    /// Parse a fleet-wide action. Accepts the plain names plus the
    /// exhibition spellings `start_all` / `stop_all`.
    pub fn parse_exhibition(s: &str) -> Result<Self, UnknownAction> {
        let trimmed = s.trim();
        let base = trimmed.strip_suffix("_all").unwrap_or(trimmed);
        base.parse()
    }

    /// The transient state dashboards see between issuing this action and
    /// the agent confirming it.
    pub fn optimistic_state(self) -> (RobotStatus, &'static str) {
        match self {
            Self::Start | Self::WorkspaceStart => (RobotStatus::Active, "person_following"),
            Self::Stop | Self::WorkspaceStop => (RobotStatus::Idle, "stopped"),
            Self::Restart => (RobotStatus::Restarting, "system_restart"),
            Self::Reboot => (RobotStatus::Restarting, "system_reboot"),
            Self::Create3Restart => (RobotStatus::Restarting, "create3_restart"),
            Self::Create3Reboot => (RobotStatus::Restarting, "create3_reboot"),
        }
    }
}

impl std::str::FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == normalized)
            .ok_or(UnknownAction(s.to_string()))
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_actions() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert_eq!("STOP".parse::<Action>().unwrap(), Action::Stop);
    }

    #[test]
    fn parse_rejects_unknown() {
        let err = "dance".parse::<Action>().unwrap_err();
        assert_eq!(err, UnknownAction("dance".to_string()));
    }

    #[test]
    fn exhibition_spelling() {
        assert_eq!(Action::parse_exhibition("stop_all").unwrap(), Action::Stop);
        assert_eq!(Action::parse_exhibition("start_all").unwrap(), Action::Start);
        assert_eq!(Action::parse_exhibition("restart").unwrap(), Action::Restart);
        assert!(Action::parse_exhibition("all").is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&Action::Create3Reboot).unwrap();
        assert_eq!(json, "\"create3_reboot\"");
    }

    #[test]
    fn optimistic_states() {
        assert_eq!(
            Action::Start.optimistic_state(),
            (RobotStatus::Active, "person_following")
        );
        assert_eq!(Action::Restart.optimistic_state().0, RobotStatus::Restarting);
    }
}
