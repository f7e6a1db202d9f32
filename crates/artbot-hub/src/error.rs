use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use artbot_core::role::Role;

/// Failures the fleet core reports back to a command issuer or query caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FleetError {
    #[error("unknown robot: {0}")]
    UnknownRobot(String),
    #[error("no connected agent: {0}")]
    UnknownAgent(String),
    #[error("robot {0} is offline")]
    RobotOffline(String),
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("command {command_id} to {robot_id} timed out")]
    CommandTimeout { robot_id: String, command_id: Uuid },
    #[error("{role} role may not {operation}")]
    Forbidden { role: Role, operation: String },
    #[error("channel failure: {0}")]
    ChannelFailure(String),
}

impl FleetError {
    /// Stable machine-readable code used in REST bodies and command acks.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownRobot(_) => "unknown_robot",
            Self::UnknownAgent(_) => "unknown_agent",
            Self::RobotOffline(_) => "robot_offline",
            Self::InvalidAction(_) => "invalid_action",
            Self::CommandTimeout { .. } => "command_timeout",
            Self::Forbidden { .. } => "forbidden",
            Self::ChannelFailure(_) => "channel_failure",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Fleet(#[from] FleetError),
    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::Fleet(err) => {
                let status = match err {
                    FleetError::UnknownRobot(_) | FleetError::UnknownAgent(_) => {
                        StatusCode::NOT_FOUND
                    },
                    FleetError::RobotOffline(_) => StatusCode::CONFLICT,
                    FleetError::InvalidAction(_) => StatusCode::BAD_REQUEST,
                    FleetError::CommandTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                    FleetError::Forbidden { .. } => StatusCode::FORBIDDEN,
                    FleetError::ChannelFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, err.code())
            },
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        };
        (
            status,
            Json(serde_json::json!({ "error": self.to_string(), "code": code })),
        )
            .into_response()
    }
}
