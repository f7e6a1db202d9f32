use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use artbot_core::net::messages::{ALL_ROBOTS, LogLevel, LogRecord};
use artbot_core::robot::{ExhibitionStatus, Robot};
use artbot_core::role::Role;

use crate::auth::OperatorRole;
use crate::dispatcher::{CommandOutcome, CommandTicket, Issuer, PendingSummary};
use crate::error::{AppError, FleetError};
use crate::history::{CommandRecord, CommandStats};
use crate::logs::LogQuery;
use crate::registry::{AgentInfo, ConnectionStats};
use crate::state::AppState;

const DEFAULT_LOG_LIMIT: usize = 100;
const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_PAGE: usize = 1000;

/// Request body for `POST /api/v1/commands`.
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    /// A robot id, or `"all"` for an exhibition command.
    pub robot_id: String,
    pub action: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    /// Block until each command is acknowledged, fails, or times out.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub action: String,
    pub results: Vec<CommandResult>,
}

#[derive(Debug, Serialize)]
pub struct CommandResult {
    pub robot_id: String,
    pub command_id: Option<Uuid>,
    pub error: Option<String>,
    /// Present only when the caller asked to wait.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<CommandOutcome>,
}

fn validate_command_request(req: &CommandRequest) -> Result<(), AppError> {
    if req.robot_id.is_empty() || req.robot_id.len() > 64 {
        return Err(AppError::BadRequest(
            "robot_id must be 1-64 chars".to_string(),
        ));
    }
    if req.action.len() > 64 {
        return Err(AppError::BadRequest("action exceeds 64 chars".to_string()));
    }
    if req.parameters.len() > 32 {
        return Err(AppError::BadRequest(
            "parameters exceed 32 keys".to_string(),
        ));
    }
    Ok(())
}

async fn settle(
    robot_id: String,
    dispatched: Result<CommandTicket, FleetError>,
    wait: bool,
) -> CommandResult {
    match dispatched {
        Ok(ticket) => {
            let command_id = Some(ticket.command_id);
            let outcome = if wait {
                Some(ticket.outcome().await)
            } else {
                None
            };
            CommandResult {
                robot_id,
                command_id,
                error: None,
                outcome,
            }
        },
        Err(e) => CommandResult {
            robot_id,
            command_id: None,
            error: Some(e.code().to_string()),
            outcome: None,
        },
    }
}

/// GET /api/v1/robots
pub async fn list_robots(State(state): State<AppState>) -> Json<Vec<Robot>> {
    Json(state.hub.get_all().await)
}

/// GET /api/v1/robots/{robot_id}
pub async fn get_robot(
    State(state): State<AppState>,
    Path(robot_id): Path<String>,
) -> Result<Json<Robot>, AppError> {
    state
        .hub
        .get(&robot_id)
        .await
        .map(Json)
        .ok_or_else(|| FleetError::UnknownRobot(robot_id).into())
}

/// DELETE /api/v1/robots/{robot_id} (admin only).
pub async fn delete_robot(
    State(state): State<AppState>,
    OperatorRole(role): OperatorRole,
    Path(robot_id): Path<String>,
) -> Result<Json<Robot>, AppError> {
    Ok(Json(state.hub.delete_robot(&robot_id, role).await?))
}

/// POST /api/v1/commands: one robot or, with `robot_id = "all"`, the whole
/// fleet. Without `wait` the response is 202 as soon as commands are queued.
pub async fn post_command(
    State(state): State<AppState>,
    OperatorRole(role): OperatorRole,
    Json(req): Json<CommandRequest>,
) -> Result<(StatusCode, Json<CommandResponse>), AppError> {
    validate_command_request(&req)?;
    let issuer = Issuer::rest(role);

    let results = if req.robot_id == ALL_ROBOTS {
        let dispatched = state
            .hub
            .send_exhibition_command(&req.action, req.parameters, issuer)
            .await?;
        futures::future::join_all(
            dispatched
                .into_iter()
                .map(|(robot_id, r)| settle(robot_id, r, req.wait)),
        )
        .await
    } else {
        let ticket = state
            .hub
            .send_command(&req.robot_id, &req.action, req.parameters, issuer)
            .await?;
        let command_id = ticket.command_id;
        let result = settle(req.robot_id.clone(), Ok(ticket), req.wait).await;
        if result.outcome == Some(CommandOutcome::TimedOut) {
            return Err(FleetError::CommandTimeout {
                robot_id: req.robot_id,
                command_id,
            }
            .into());
        }
        vec![result]
    };

    let status = if req.wait {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((
        status,
        Json(CommandResponse {
            action: req.action,
            results,
        }),
    ))
}

/// GET /api/v1/commands/pending
pub async fn list_pending(State(state): State<AppState>) -> Json<Vec<PendingSummary>> {
    Json(state.hub.pending_commands().await)
}

/// GET /api/v1/exhibition
pub async fn exhibition_status(State(state): State<AppState>) -> Json<ExhibitionStatus> {
    Json(state.hub.exhibition_status().await)
}

/// Query string for the log endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct LogParams {
    pub limit: Option<usize>,
    /// Exact level to keep, e.g. `ERROR`.
    pub level: Option<String>,
}

impl LogParams {
    fn query(&self) -> Result<LogQuery, AppError> {
        let level = self
            .level
            .as_deref()
            .map(str::parse::<LogLevel>)
            .transpose()
            .map_err(|_| AppError::BadRequest("unknown log level".to_string()))?;
        Ok(LogQuery {
            limit: self.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_PAGE),
            level,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct RobotLogs {
    pub robot_id: String,
    pub logs: Vec<LogRecord>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct FleetLogs {
    pub logs: Vec<LogRecord>,
    pub total: usize,
}

/// GET /api/v1/robots/{robot_id}/logs
pub async fn robot_logs(
    State(state): State<AppState>,
    Path(robot_id): Path<String>,
    Query(params): Query<LogParams>,
) -> Result<Json<RobotLogs>, AppError> {
    let query = params.query()?;
    if state.hub.get(&robot_id).await.is_none() {
        return Err(FleetError::UnknownRobot(robot_id).into());
    }
    let logs = state.hub.robot_logs(&robot_id, query).await;
    Ok(Json(RobotLogs {
        robot_id,
        total: logs.len(),
        logs,
    }))
}

/// GET /api/v1/logs
pub async fn fleet_logs(
    State(state): State<AppState>,
    Query(params): Query<LogParams>,
) -> Result<Json<FleetLogs>, AppError> {
    let logs = state.hub.recent_logs(params.query()?).await;
    Ok(Json(FleetLogs {
        total: logs.len(),
        logs,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RobotCommands {
    pub robot_id: String,
    pub commands: Vec<CommandRecord>,
    pub total: usize,
}

/// GET /api/v1/robots/{robot_id}/commands
pub async fn robot_command_history(
    State(state): State<AppState>,
    Path(robot_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Json<RobotCommands> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_PAGE);
    let commands = state.hub.command_history(&robot_id, limit).await;
    Json(RobotCommands {
        robot_id,
        total: commands.len(),
        commands,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    pub robot_id: Option<String>,
}

/// GET /api/v1/commands/stats
pub async fn command_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Json<CommandStats> {
    Json(state.hub.command_stats(params.robot_id.as_deref()).await)
}

fn require_agent_access(role: Role) -> Result<(), AppError> {
    if role.may_inspect_agents() {
        Ok(())
    } else {
        Err(FleetError::Forbidden {
            role,
            operation: "inspect agents".to_string(),
        }
        .into())
    }
}

#[derive(Debug, Serialize)]
pub struct AgentList {
    pub agents: Vec<AgentInfo>,
    pub total: usize,
}

/// GET /api/v1/agents (admin only).
pub async fn list_agents(
    State(state): State<AppState>,
    OperatorRole(role): OperatorRole,
) -> Result<Json<AgentList>, AppError> {
    require_agent_access(role)?;
    let agents = state.hub.agents().await;
    Ok(Json(AgentList {
        total: agents.len(),
        agents,
    }))
}

/// GET /api/v1/agents/{agent_id} (admin only).
pub async fn get_agent(
    State(state): State<AppState>,
    OperatorRole(role): OperatorRole,
    Path(agent_id): Path<String>,
) -> Result<Json<AgentInfo>, AppError> {
    require_agent_access(role)?;
    Ok(Json(state.hub.agent(&agent_id).await?))
}

/// GET /api/v1/agents/stats/connections (admin only).
pub async fn connection_stats(
    State(state): State<AppState>,
    OperatorRole(role): OperatorRole,
) -> Result<Json<ConnectionStats>, AppError> {
    require_agent_access(role)?;
    Ok(Json(state.hub.connection_stats().await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use artbot_core::net::messages::{AgentMessage, CommandResponseMsg, LogEntryMsg};

    use crate::channel::{Channel, ChannelReceiver};
    use crate::config::HubConfig;
    use crate::hub::testing;

    fn request(robot_id: &str, action: &str, wait: bool) -> Json<CommandRequest> {
        Json(CommandRequest {
            robot_id: robot_id.to_string(),
            action: action.to_string(),
            parameters: serde_json::Map::new(),
            wait,
        })
    }

    async fn state_with_agent(id: &str) -> (AppState, Channel, ChannelReceiver) {
        let state = AppState::new(HubConfig::default());
        let (ch, rx) = testing::agent(&state.hub, id).await;
        (state, ch, rx)
    }

    #[tokio::test]
    async fn list_and_get_robots() {
        let (state, _ch, _rx) = state_with_agent("robot-1").await;
        let Json(robots) = list_robots(State(state.clone())).await;
        assert_eq!(robots.len(), 1);

        let Json(robot) = get_robot(State(state.clone()), Path("robot-1".to_string()))
            .await
            .unwrap();
        assert_eq!(robot.id, "robot-1");

        let err = get_robot(State(state), Path("nope".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Fleet(FleetError::UnknownRobot(_))));
    }

    #[tokio::test]
    async fn post_command_is_accepted_without_wait() {
        let (state, _ch, mut rx) = state_with_agent("robot-1").await;
        let (status, Json(body)) = post_command(
            State(state.clone()),
            OperatorRole(Role::Museum),
            request("robot-1", "start", false),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body.results.len(), 1);
        assert!(body.results[0].command_id.is_some());
        assert!(testing::next_command(&mut rx).is_some());

        let Json(pending) = list_pending(State(state)).await;
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn post_command_wait_returns_agent_outcome() {
        let (state, ch, mut rx) = state_with_agent("robot-1").await;
        let hub = std::sync::Arc::clone(&state.hub);

        let agent = tokio::spawn(async move {
            let frame = rx.recv().await.unwrap();
            let artbot_core::net::messages::AgentCommand::RobotCommand(cmd) =
                artbot_core::net::protocol::decode_agent_command(&frame).unwrap();
            let resp = AgentMessage::CommandResponse(CommandResponseMsg {
                command_id: Some(cmd.command_id),
                success: Some(true),
                ..CommandResponseMsg::default()
            });
            hub.handle_agent_message("robot-1", &ch, resp).await;
        });

        let (status, Json(body)) = post_command(
            State(state),
            OperatorRole(Role::Admin),
            request("robot-1", "restart", true),
        )
        .await
        .unwrap();
        agent.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(matches!(
            body.results[0].outcome,
            Some(CommandOutcome::Acked { .. })
        ));
    }

    #[tokio::test]
    async fn post_command_errors_map_to_fleet_errors() {
        let (state, _ch, _rx) = state_with_agent("robot-1").await;

        let err = post_command(
            State(state.clone()),
            OperatorRole(Role::Admin),
            request("robot-1", "teleport", false),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Fleet(FleetError::InvalidAction(_))));

        let err = post_command(
            State(state.clone()),
            OperatorRole(Role::Museum),
            request("robot-1", "create3_reboot", false),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Fleet(FleetError::Forbidden { .. })));

        let err = post_command(
            State(state),
            OperatorRole(Role::Admin),
            request("", "start", false),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn exhibition_command_reports_per_robot() {
        let (state, _a, _rx_a) = state_with_agent("A").await;
        let (b, _rx_b) = testing::agent(&state.hub, "B").await;
        state.hub.disconnect(b.id()).await;

        let (_, Json(body)) = post_command(
            State(state.clone()),
            OperatorRole(Role::Museum),
            request("all", "start_all", false),
        )
        .await
        .unwrap();
        assert_eq!(body.results.len(), 2);
        assert!(body.results[0].error.is_none());
        assert_eq!(body.results[1].error.as_deref(), Some("robot_offline"));

        let Json(status) = exhibition_status(State(state)).await;
        assert_eq!(status.total_robots, 2);
        assert_eq!(status.active_robots, 1);
        assert!(status.exhibition_running);
    }

    #[tokio::test]
    async fn delete_requires_admin() {
        let (state, _ch, _rx) = state_with_agent("robot-1").await;
        let err = delete_robot(
            State(state.clone()),
            OperatorRole(Role::Museum),
            Path("robot-1".to_string()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Fleet(FleetError::Forbidden { .. })));

        let Json(robot) = delete_robot(
            State(state),
            OperatorRole(Role::Admin),
            Path("robot-1".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(robot.id, "robot-1");
    }

    fn log_line(level: LogLevel, message: &str) -> AgentMessage {
        AgentMessage::LogEntry(LogEntryMsg {
            level,
            message: message.to_string(),
            ..LogEntryMsg::default()
        })
    }

    #[tokio::test]
    async fn logs_are_listed_and_filtered() {
        let (state, ch, _rx) = state_with_agent("robot-1").await;
        for (level, message) in [
            (LogLevel::Info, "booted"),
            (LogLevel::Error, "lidar fault"),
            (LogLevel::Info, "following"),
        ] {
            state
                .hub
                .handle_agent_message("robot-1", &ch, log_line(level, message))
                .await;
        }

        let Json(all) = robot_logs(
            State(state.clone()),
            Path("robot-1".to_string()),
            Query(LogParams::default()),
        )
        .await
        .unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.logs[0].message, "following");

        let Json(errors) = fleet_logs(
            State(state.clone()),
            Query(LogParams {
                limit: None,
                level: Some("error".to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(errors.total, 1);
        assert_eq!(errors.logs[0].message, "lidar fault");

        let err = fleet_logs(
            State(state.clone()),
            Query(LogParams {
                limit: None,
                level: Some("loud".to_string()),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = robot_logs(
            State(state),
            Path("ghost".to_string()),
            Query(LogParams::default()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Fleet(FleetError::UnknownRobot(_))));
    }

    #[tokio::test]
    async fn command_history_and_stats_follow_outcomes() {
        let (state, ch, mut rx) = state_with_agent("robot-1").await;
        let (_, Json(body)) = post_command(
            State(state.clone()),
            OperatorRole(Role::Museum),
            request("robot-1", "start", false),
        )
        .await
        .unwrap();
        let command_id = body.results[0].command_id.unwrap();
        assert!(testing::next_command(&mut rx).is_some());

        let resp = AgentMessage::CommandResponse(CommandResponseMsg {
            command_id: Some(command_id),
            success: Some(true),
            ..CommandResponseMsg::default()
        });
        state.hub.handle_agent_message("robot-1", &ch, resp).await;

        let Json(history) = robot_command_history(
            State(state.clone()),
            Path("robot-1".to_string()),
            Query(HistoryParams::default()),
        )
        .await;
        assert_eq!(history.total, 1);
        assert_eq!(history.commands[0].command_id, command_id);
        assert_eq!(history.commands[0].issued_by, Role::Museum);
        assert_eq!(
            history.commands[0].state,
            crate::history::CommandState::Acked
        );

        let Json(stats) = command_stats(State(state), Query(StatsParams::default())).await;
        assert_eq!(stats.total_commands, 1);
        assert_eq!(stats.acked, 1);
    }

    #[tokio::test]
    async fn agent_endpoints_are_admin_only() {
        let (state, _ch, _rx) = state_with_agent("robot-1").await;

        let err = list_agents(State(state.clone()), OperatorRole(Role::Museum))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Fleet(FleetError::Forbidden { .. })));
        let err = connection_stats(State(state.clone()), OperatorRole(Role::Museum))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Fleet(FleetError::Forbidden { .. })));

        let Json(list) = list_agents(State(state.clone()), OperatorRole(Role::Admin))
            .await
            .unwrap();
        assert_eq!(list.total, 1);
        assert_eq!(list.agents[0].agent_id, "robot-1");

        let Json(agent) = get_agent(
            State(state.clone()),
            OperatorRole(Role::Admin),
            Path("robot-1".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(agent.metadata.hostname.as_deref(), Some("robot-1.local"));

        let err = get_agent(
            State(state.clone()),
            OperatorRole(Role::Admin),
            Path("ghost".to_string()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Fleet(FleetError::UnknownAgent(_))));

        let Json(stats) = connection_stats(State(state), OperatorRole(Role::Admin))
            .await
            .unwrap();
        assert_eq!(stats.agents, 1);
        assert_eq!(stats.connected_agents, ["robot-1"]);
    }
}
