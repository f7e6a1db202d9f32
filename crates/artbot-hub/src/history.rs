use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use artbot_core::command::Action;
use artbot_core::role::Role;

use crate::dispatcher::CommandOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Pending,
    Acked,
    Failed,
    TimedOut,
    Superseded,
    RobotWentOffline,
}

impl From<&CommandOutcome> for CommandState {
    fn from(outcome: &CommandOutcome) -> Self {
        match outcome {
            CommandOutcome::Acked { .. } => Self::Acked,
            CommandOutcome::Failed { .. } => Self::Failed,
            CommandOutcome::TimedOut => Self::TimedOut,
            CommandOutcome::Superseded { .. } => Self::Superseded,
            CommandOutcome::RobotWentOffline => Self::RobotWentOffline,
        }
    }
}

/// One issued command as remembered after the fact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandRecord {
    pub command_id: Uuid,
    pub robot_id: String,
    pub action: Action,
    pub issued_by: Role,
    pub issued_at: DateTime<Utc>,
    pub state: CommandState,
    pub completed_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

/// Tally over the retained history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CommandStats {
    pub total_commands: usize,
    pub acked: usize,
    /// Failed, timed out or lost to a disconnect.
    pub failed: usize,
    pub superseded: usize,
    pub pending: usize,
    /// Percentage of all retained commands that were acked.
    pub success_rate: f64,
}

impl CommandStats {
    fn count(&mut self, state: CommandState) {
        self.total_commands += 1;
        match state {
            CommandState::Pending => self.pending += 1,
            CommandState::Acked => self.acked += 1,
            CommandState::Failed | CommandState::TimedOut | CommandState::RobotWentOffline => {
                self.failed += 1;
            },
            CommandState::Superseded => self.superseded += 1,
        }
    }

    fn finish(mut self) -> Self {
        if self.total_commands > 0 {
            self.success_rate = self.acked as f64 / self.total_commands as f64 * 100.0;
        }
        self
    }
}

/// Last `capacity` commands per robot, oldest evicted first.
#[derive(Debug)]
pub struct CommandHistory {
    capacity: usize,
    by_robot: HashMap<String, VecDeque<CommandRecord>>,
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new(100)
    }
}

impl CommandHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            by_robot: HashMap::new(),
        }
    }

    pub fn record_issued(&mut self, record: CommandRecord) {
        let ring = self.by_robot.entry(record.robot_id.clone()).or_default();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(record);
    }

    /// Stamp the outcome on a remembered command. Commands already evicted
    /// are ignored.
    pub fn record_outcome(
        &mut self,
        robot_id: &str,
        command_id: Uuid,
        outcome: &CommandOutcome,
        at: DateTime<Utc>,
    ) {
        let Some(record) = self
            .by_robot
            .get_mut(robot_id)
            .and_then(|ring| ring.iter_mut().rev().find(|r| r.command_id == command_id))
        else {
            return;
        };
        record.state = CommandState::from(outcome);
        record.completed_at = Some(at);
        record.message = Some(outcome.describe());
    }

    /// Newest first.
    pub fn for_robot(&self, robot_id: &str, limit: usize) -> Vec<CommandRecord> {
        self.by_robot
            .get(robot_id)
            .map(|ring| ring.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Statistics for one robot, or for the whole fleet with `None`.
    pub fn stats(&self, robot_id: Option<&str>) -> CommandStats {
        let mut stats = CommandStats::default();
        let rings: Vec<&VecDeque<CommandRecord>> = match robot_id {
            Some(id) => self.by_robot.get(id).into_iter().collect(),
            None => self.by_robot.values().collect(),
        };
        for record in rings.into_iter().flatten() {
            stats.count(record.state);
        }
        stats.finish()
    }

    pub fn forget(&mut self, robot_id: &str) {
        self.by_robot.remove(robot_id);
    }
}
