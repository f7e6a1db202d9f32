use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

use artbot_core::command::Action;
use artbot_core::net::messages::{
    ALL_ROBOTS, AgentCommand, CommandAckMsg, CommandResponseEvent, CommandTimeoutMsg,
    DashboardRequest, DispatchResult, HubEvent, RobotCommandMsg, SendCommandMsg,
};
use artbot_core::net::protocol::encode_agent_command;
use artbot_core::role::Role;
use artbot_core::time::timestamp_now;

use crate::channel::ChannelId;
use crate::error::FleetError;
use crate::history::{CommandHistory, CommandRecord, CommandState};
use crate::hub::{FleetGuard, Hub};
use crate::registry::Subscription;

/// How an issued command finished. Delivered exactly once per command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    Acked {
        message: Option<String>,
        result: Option<serde_json::Value>,
    },
    Failed {
        message: Option<String>,
    },
    TimedOut,
    /// A newer command for the same robot replaced this one.
    Superseded {
        by: Uuid,
    },
    RobotWentOffline,
}

impl CommandOutcome {
    pub fn describe(&self) -> String {
        match self {
            Self::Acked { message, .. } => message.clone().unwrap_or_else(|| "ok".to_string()),
            Self::Failed { message } => message
                .clone()
                .unwrap_or_else(|| "command failed".to_string()),
            Self::TimedOut => "command timed out".to_string(),
            Self::Superseded { by } => format!("superseded by {by}"),
            Self::RobotWentOffline => "robot went offline".to_string(),
        }
    }
}

/// Who issued a command: the role the auth gate resolved, plus the
/// dashboard channel when it came over a WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Issuer {
    pub role: Role,
    pub dashboard: Option<ChannelId>,
}

impl Issuer {
    pub fn rest(role: Role) -> Self {
        Self {
            role,
            dashboard: None,
        }
    }
}

impl From<Subscription> for Issuer {
    fn from(sub: Subscription) -> Self {
        Self {
            role: sub.role,
            dashboard: Some(sub.channel_id),
        }
    }
}

/// An issued-but-unacknowledged command.
#[derive(Debug)]
pub struct PendingCommand {
    pub command_id: Uuid,
    pub robot_id: String,
    pub action: Action,
    pub issuer: Issuer,
    pub issued_at: DateTime<Utc>,
    pub deadline: Instant,
    completion: Option<oneshot::Sender<CommandOutcome>>,
}

impl PendingCommand {
    /// Consume the command, handing `outcome` to whoever holds the ticket.
    fn complete(mut self, outcome: CommandOutcome) {
        if let Some(tx) = self.completion.take() {
            // Ticket holders may have stopped waiting.
            let _ = tx.send(outcome);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingSummary {
    pub command_id: Uuid,
    pub robot_id: String,
    pub action: Action,
    pub issued_at: DateTime<Utc>,
    pub issued_by: Role,
}

/// Outstanding commands, at most one per robot, plus the bounded history
/// of everything issued.
#[derive(Debug, Default)]
pub struct PendingCommands {
    by_robot: HashMap<String, PendingCommand>,
    history: CommandHistory,
}

impl PendingCommands {
    pub fn new(history_per_robot: usize) -> Self {
        Self {
            by_robot: HashMap::new(),
            history: CommandHistory::new(history_per_robot),
        }
    }

    /// Track `cmd`, returning the command it superseded, if any.
    pub fn insert(&mut self, cmd: PendingCommand) -> Option<PendingCommand> {
        self.history.record_issued(CommandRecord {
            command_id: cmd.command_id,
            robot_id: cmd.robot_id.clone(),
            action: cmd.action,
            issued_by: cmd.issuer.role,
            issued_at: cmd.issued_at,
            state: CommandState::Pending,
            completed_at: None,
            message: None,
        });
        self.by_robot.insert(cmd.robot_id.clone(), cmd)
    }

    /// Complete a command that has left the pending set, recording how it
    /// ended.
    pub fn finish(&mut self, cmd: PendingCommand, outcome: CommandOutcome) {
        self.history
            .record_outcome(&cmd.robot_id, cmd.command_id, &outcome, timestamp_now());
        cmd.complete(outcome);
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    pub fn forget_history(&mut self, robot_id: &str) {
        self.history.forget(robot_id);
    }

    /// Remove the outstanding command for `robot_id`. When the agent named
    /// a `command_id`, it must match; a mismatch means the response belongs
    /// to a command that already finished.
    pub fn resolve(&mut self, robot_id: &str, command_id: Option<Uuid>) -> Option<PendingCommand> {
        let current = self.by_robot.get(robot_id)?;
        if command_id.is_some_and(|id| id != current.command_id) {
            return None;
        }
        self.by_robot.remove(robot_id)
    }

    pub fn take_for_robot(&mut self, robot_id: &str) -> Option<PendingCommand> {
        self.by_robot.remove(robot_id)
    }

    /// Remove and return every command whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<PendingCommand> {
        let expired: Vec<String> = self
            .by_robot
            .iter()
            .filter(|(_, cmd)| cmd.deadline <= now)
            .map(|(robot_id, _)| robot_id.clone())
            .collect();
        let mut out: Vec<PendingCommand> = expired
            .iter()
            .filter_map(|robot_id| self.by_robot.remove(robot_id))
            .collect();
        out.sort_by_key(|cmd| cmd.deadline);
        out
    }

    pub fn summaries(&self) -> Vec<PendingSummary> {
        let mut list: Vec<PendingSummary> = self
            .by_robot
            .values()
            .map(|cmd| PendingSummary {
                command_id: cmd.command_id,
                robot_id: cmd.robot_id.clone(),
                action: cmd.action,
                issued_at: cmd.issued_at,
                issued_by: cmd.issuer.role,
            })
            .collect();
        list.sort_by_key(|s| s.issued_at);
        list
    }

    pub fn len(&self) -> usize {
        self.by_robot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_robot.is_empty()
    }
}

/// Handle for an accepted command. Dropping it is fine: the command still
/// runs to completion, nobody just listens for the outcome.
#[derive(Debug)]
pub struct CommandTicket {
    pub command_id: Uuid,
    pub robot_id: String,
    pub action: Action,
    completion: oneshot::Receiver<CommandOutcome>,
}

impl CommandTicket {
    /// Wait for the agent's answer, the timeout, or supersession.
    pub async fn outcome(self) -> CommandOutcome {
        self.completion.await.unwrap_or(CommandOutcome::Failed {
            message: Some("hub shut down".to_string()),
        })
    }
}

fn parse_action(action: &str) -> Result<Action, FleetError> {
    action
        .parse::<Action>()
        .map_err(|_| FleetError::InvalidAction(action.to_string()))
}

fn authorize(issuer: Issuer, action: Action) -> Result<(), FleetError> {
    if issuer.role.may_issue(action) {
        Ok(())
    } else {
        Err(FleetError::Forbidden {
            role: issuer.role,
            operation: format!("issue {action}"),
        })
    }
}

impl FleetGuard<'_> {
    /// Send one validated command to one robot, under the fleet locks.
    ///
    /// The frame is queued on the agent channel first; only once that has
    /// succeeded is the optimistic state applied and the command tracked.
    /// If the channel is gone the agent is dropped and nothing else changes.
    fn dispatch(
        &mut self,
        robot_id: &str,
        action: Action,
        parameters: &serde_json::Map<String, serde_json::Value>,
        issuer: Issuer,
        timeout: std::time::Duration,
    ) -> Result<CommandTicket, FleetError> {
        let Some(channel) = self.registry.lookup_agent(robot_id) else {
            return if self.store.get(robot_id).is_some() {
                Err(FleetError::RobotOffline(robot_id.to_string()))
            } else {
                Err(FleetError::UnknownRobot(robot_id.to_string()))
            };
        };

        let command_id = Uuid::new_v4();
        let issued_at = timestamp_now();
        let frame = encode_agent_command(&AgentCommand::RobotCommand(RobotCommandMsg {
            command_id,
            robot_id: robot_id.to_string(),
            action,
            parameters: parameters.clone(),
            timestamp: issued_at,
        }))
        .map_err(|e| FleetError::ChannelFailure(e.to_string()))?;

        if let Err(e) = channel.try_send(Arc::from(frame)) {
            tracing::warn!(robot_id, error = %e, "Agent channel failed on command send");
            self.disconnect(channel.id());
            return Err(FleetError::RobotOffline(robot_id.to_string()));
        }

        if let Some(robot) = self.store.apply_optimistic(robot_id, action) {
            self.broadcast(&HubEvent::robot_update(robot));
        }

        let (tx, rx) = oneshot::channel();
        let superseded = self.pending.insert(PendingCommand {
            command_id,
            robot_id: robot_id.to_string(),
            action,
            issuer,
            issued_at,
            deadline: Instant::now() + timeout,
            completion: Some(tx),
        });
        if let Some(old) = superseded {
            tracing::info!(
                robot_id,
                old_command = %old.command_id,
                new_command = %command_id,
                "Command superseded"
            );
            self.pending
                .finish(old, CommandOutcome::Superseded { by: command_id });
        }

        tracing::info!(robot_id, %command_id, %action, role = %issuer.role, "Command sent");
        Ok(CommandTicket {
            command_id,
            robot_id: robot_id.to_string(),
            action,
            completion: rx,
        })
    }

    /// Settle the robot's pending command from an agent `command_response`.
    /// Responses with no matching pending command (late, after a timeout or
    /// supersession) are logged and dropped.
    pub fn resolve_command(
        &mut self,
        robot_id: &str,
        command_id: Option<Uuid>,
        success: bool,
        message: Option<String>,
        result: Option<serde_json::Value>,
    ) -> bool {
        let Some(cmd) = self.pending.resolve(robot_id, command_id) else {
            tracing::info!(robot_id, ?command_id, "Dropping response with no pending command");
            return false;
        };

        let robot = if success {
            self.store.confirm(robot_id)
        } else {
            self.store.revert(robot_id)
        };
        if let Some(robot) = robot {
            self.broadcast(&HubEvent::robot_update(robot));
        }

        self.broadcast(&HubEvent::CommandResponse(CommandResponseEvent {
            command_id: cmd.command_id,
            robot_id: robot_id.to_string(),
            action: cmd.action,
            success,
            message: message.clone(),
            result: result.clone(),
        }));

        tracing::info!(robot_id, command_id = %cmd.command_id, success, "Command resolved");
        let outcome = if success {
            CommandOutcome::Acked { message, result }
        } else {
            CommandOutcome::Failed { message }
        };
        self.pending.finish(cmd, outcome);
        true
    }
}

impl Hub {
    /// Issue `action` to one robot. Returns as soon as the command is queued
    /// on the agent channel; the ticket resolves later.
    pub async fn send_command(
        &self,
        robot_id: &str,
        action: &str,
        parameters: serde_json::Map<String, serde_json::Value>,
        issuer: Issuer,
    ) -> Result<CommandTicket, FleetError> {
        let action = parse_action(action)?;
        authorize(issuer, action)?;
        let timeout = self.settings().command_timeout;
        self.lock()
            .await
            .dispatch(robot_id, action, &parameters, issuer, timeout)
    }

    /// Issue `action` to every known robot. Offline robots are reported as
    /// failures; they never stop delivery to the rest. Accepts the
    /// `start_all`/`stop_all` spellings.
    pub async fn send_exhibition_command(
        &self,
        action: &str,
        parameters: serde_json::Map<String, serde_json::Value>,
        issuer: Issuer,
    ) -> Result<Vec<(String, Result<CommandTicket, FleetError>)>, FleetError> {
        let action = Action::parse_exhibition(action)
            .map_err(|_| FleetError::InvalidAction(action.to_string()))?;
        authorize(issuer, action)?;
        let timeout = self.settings().command_timeout;

        let mut guard = self.lock().await;
        let ids = guard.store.ids();
        let results: Vec<_> = ids
            .into_iter()
            .map(|robot_id| {
                let outcome = guard.dispatch(&robot_id, action, &parameters, issuer, timeout);
                (robot_id, outcome)
            })
            .collect();

        let delivered = results.iter().filter(|(_, r)| r.is_ok()).count();
        tracing::info!(
            %action,
            delivered,
            failed = results.len() - delivered,
            "Exhibition command sent"
        );
        Ok(results)
    }

    /// Time out every pending command whose deadline has passed: revert its
    /// optimistic state and broadcast `command_timeout`. Each command times
    /// out at most once since it leaves the pending set here.
    pub async fn expire_pending(&self, now: Instant) -> Vec<Uuid> {
        let mut guard = self.lock().await;
        let expired = guard.pending.expire(now);
        let mut ids = Vec::with_capacity(expired.len());
        for cmd in expired {
            tracing::warn!(
                robot_id = %cmd.robot_id,
                command_id = %cmd.command_id,
                action = %cmd.action,
                "Command timed out"
            );
            if let Some(robot) = guard.store.revert(&cmd.robot_id) {
                guard.broadcast(&HubEvent::robot_update(robot));
            }
            guard.broadcast(&HubEvent::CommandTimeout(CommandTimeoutMsg {
                command_id: cmd.command_id,
                robot_id: cmd.robot_id.clone(),
                action: cmd.action,
                issued_at: cmd.issued_at,
            }));
            ids.push(cmd.command_id);
            guard.pending.finish(cmd, CommandOutcome::TimedOut);
        }
        ids
    }

    /// Handle one request from a dashboard channel. Command results go back
    /// to the issuing dashboard as a `command_ack`.
    pub async fn handle_dashboard_request(&self, sub: Subscription, request: DashboardRequest) {
        match request {
            DashboardRequest::Ping => {
                self.lock().await.send_to(sub.channel_id, &HubEvent::Pong);
            },
            DashboardRequest::SendCommand(SendCommandMsg {
                robot_id,
                action,
                parameters,
            }) => {
                let results = if robot_id == ALL_ROBOTS {
                    match self
                        .send_exhibition_command(&action, parameters, sub.into())
                        .await
                    {
                        Ok(results) => results
                            .into_iter()
                            .map(|(id, r)| dispatch_result(id, &r))
                            .collect(),
                        Err(e) => vec![dispatch_result(robot_id, &Err(e))],
                    }
                } else {
                    let r = self
                        .send_command(&robot_id, &action, parameters, sub.into())
                        .await;
                    vec![dispatch_result(robot_id, &r)]
                };
                let ack = HubEvent::CommandAck(CommandAckMsg { action, results });
                self.lock().await.send_to(sub.channel_id, &ack);
            },
        }
    }
}

fn dispatch_result(robot_id: String, result: &Result<CommandTicket, FleetError>) -> DispatchResult {
    match result {
        Ok(ticket) => DispatchResult {
            robot_id,
            command_id: Some(ticket.command_id),
            error: None,
        },
        Err(e) => DispatchResult {
            robot_id,
            command_id: None,
            error: Some(e.code().to_string()),
        },
    }
}
