use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use artbot_core::command::Action;
use artbot_core::net::messages::RobotReport;
use artbot_core::robot::{ExhibitionStatus, Robot, RobotStatus};

use crate::channel::ChannelId;
use crate::error::FleetError;
use crate::registry::AgentMetadata;

/// Result of merging one report into the store.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied { robot: Robot, changed: bool },
    /// Older than the stored `last_update`; nothing was touched.
    Stale,
}

/// How far ahead of the hub's clock an agent timestamp may run before it
/// is pulled back to receive time.
pub const MAX_CLOCK_SKEW_SECS: i64 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub robots: usize,
    pub reports_applied: u64,
    pub stale_reports: u64,
    /// Reports whose timestamp ran ahead of the hub and was clamped.
    pub future_reports: u64,
}

#[derive(Debug)]
struct Entry {
    robot: Robot,
    owner: Option<ChannelId>,
    /// Status and action to fall back to if an optimistic command fails.
    confirmed: Option<(RobotStatus, String)>,
}

impl Entry {
    fn new(id: &str) -> Self {
        Self {
            robot: Robot::new(id),
            owner: None,
            confirmed: None,
        }
    }
}

/// Authoritative id → [`Robot`] map. Every read hands out a copy.
#[derive(Debug, Default)]
pub struct RobotStore {
    robots: BTreeMap<String, Entry>,
    reports_applied: u64,
    stale_reports: u64,
    future_reports: u64,
}

impl RobotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `robot_id` to its agent channel, creating the record on first
    /// sight. An offline robot comes back as IDLE until it reports.
    pub fn attach(
        &mut self,
        robot_id: &str,
        owner: ChannelId,
        metadata: Option<&AgentMetadata>,
    ) -> Robot {
        let entry = self
            .robots
            .entry(robot_id.to_string())
            .or_insert_with(|| Entry::new(robot_id));
        entry.owner = Some(owner);
        if let Some(meta) = metadata {
            if meta.hostname.is_some() {
                entry.robot.hostname.clone_from(&meta.hostname);
            }
            entry.robot.capabilities.clone_from(&meta.capabilities);
        }
        if entry.robot.status == RobotStatus::Offline {
            entry.robot.status = RobotStatus::Idle;
        }
        entry.robot.clone()
    }

    pub fn owner(&self, robot_id: &str) -> Option<ChannelId> {
        self.robots.get(robot_id).and_then(|e| e.owner)
    }

    /// Merge a partial report. Reports older than the stored `last_update`
    /// are counted and dropped; a missing timestamp means `received_at`.
    /// Timestamps more than [`MAX_CLOCK_SKEW_SECS`] past `received_at` are
    /// clamped, so one report from a clock running ahead cannot lock out
    /// the reports after it.
    ///
    /// Status is only taken from reports while the robot has an owning
    /// channel, and an agent can never report itself OFFLINE.
    pub fn apply_report(
        &mut self,
        robot_id: &str,
        report: &RobotReport,
        received_at: DateTime<Utc>,
    ) -> ApplyOutcome {
        let entry = self
            .robots
            .entry(robot_id.to_string())
            .or_insert_with(|| Entry::new(robot_id));

        let latest = received_at + TimeDelta::seconds(MAX_CLOCK_SKEW_SECS);
        let timestamp = match report.timestamp {
            Some(ts) if ts > latest => {
                self.future_reports += 1;
                tracing::warn!(
                    robot_id,
                    reported = %ts,
                    %received_at,
                    "Report timestamp ahead of hub clock, clamping"
                );
                latest
            },
            Some(ts) => ts,
            None => received_at,
        };
        if let Some(last) = entry.robot.last_update
            && timestamp < last
        {
            self.stale_reports += 1;
            tracing::debug!(
                robot_id,
                %timestamp,
                last_update = %last,
                "Ignoring stale report"
            );
            return ApplyOutcome::Stale;
        }

        let before = entry.robot.clone();
        let robot = &mut entry.robot;

        if entry.owner.is_some()
            && let Some(status) = report.status
            && status.is_online()
        {
            robot.status = status;
        }
        if let Some(action) = report.action() {
            robot.current_action = action;
        }
        if let Some(battery) = report.battery_level {
            robot.battery_level = Some(battery);
        }
        if let Some(workspace) = report.workspace() {
            robot.workspace_status = workspace;
        }
        if let Some(flag) = report.create3_connected {
            robot.create3_connected = flag;
        }
        if let Some(flag) = report.oak_camera_connected {
            robot.oak_camera_connected = flag;
        }
        if report.cpu_percent.is_some() {
            robot.cpu_percent = report.cpu_percent;
        }
        if report.temperature.is_some() {
            robot.temperature = report.temperature;
        }
        if report.memory_percent.is_some() {
            robot.memory_percent = report.memory_percent;
        }
        robot.last_update = Some(timestamp);

        // Agent-reported status replaces whatever we would revert to.
        if robot.pending_confirmation && report.status.is_some() {
            entry.confirmed = Some((robot.status, robot.current_action.clone()));
        }

        self.reports_applied += 1;
        let changed = !before.same_state(robot);
        ApplyOutcome::Applied {
            robot: robot.clone(),
            changed,
        }
    }

    /// Record loss of the owning channel. Last-known metrics stay visible.
    pub fn mark_offline(&mut self, robot_id: &str) -> Option<Robot> {
        let entry = self.robots.get_mut(robot_id)?;
        entry.owner = None;
        entry.confirmed = None;
        entry.robot.status = RobotStatus::Offline;
        entry.robot.pending_confirmation = false;
        Some(entry.robot.clone())
    }

    pub fn get(&self, robot_id: &str) -> Option<Robot> {
        self.robots.get(robot_id).map(|e| e.robot.clone())
    }

    /// Snapshot of every robot, ordered by id.
    pub fn get_all(&self) -> Vec<Robot> {
        self.robots.values().map(|e| e.robot.clone()).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.robots.keys().cloned().collect()
    }

    pub fn delete(&mut self, robot_id: &str) -> Result<Robot, FleetError> {
        self.robots
            .remove(robot_id)
            .map(|e| e.robot)
            .ok_or_else(|| FleetError::UnknownRobot(robot_id.to_string()))
    }

    /// Show the transient state `action` is expected to produce and flag the
    /// record as awaiting confirmation. `last_update` is left alone so the
    /// agent's next report is never mistaken for a stale one.
    pub fn apply_optimistic(&mut self, robot_id: &str, action: Action) -> Option<Robot> {
        let entry = self.robots.get_mut(robot_id)?;
        if entry.confirmed.is_none() {
            entry.confirmed = Some((entry.robot.status, entry.robot.current_action.clone()));
        }
        let (status, label) = action.optimistic_state();
        entry.robot.status = status;
        entry.robot.current_action = label.to_string();
        entry.robot.pending_confirmation = true;
        Some(entry.robot.clone())
    }

    /// The agent accepted the command. Returns the record if it changed.
    pub fn confirm(&mut self, robot_id: &str) -> Option<Robot> {
        let entry = self.robots.get_mut(robot_id)?;
        if !entry.robot.pending_confirmation {
            return None;
        }
        entry.robot.pending_confirmation = false;
        entry.confirmed = None;
        Some(entry.robot.clone())
    }

    /// Roll back to the last confirmed status/action after a failed or
    /// timed-out command. Returns the record if it changed.
    pub fn revert(&mut self, robot_id: &str) -> Option<Robot> {
        let entry = self.robots.get_mut(robot_id)?;
        if !entry.robot.pending_confirmation {
            return None;
        }
        entry.robot.pending_confirmation = false;
        if let Some((status, action)) = entry.confirmed.take()
            && entry.robot.status != RobotStatus::Offline
        {
            entry.robot.status = status;
            entry.robot.current_action = action;
        }
        Some(entry.robot.clone())
    }

    pub fn exhibition_status(&self) -> ExhibitionStatus {
        ExhibitionStatus::from_robots(self.robots.values().map(|e| &e.robot))
    }

    pub fn len(&self) -> usize {
        self.robots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.robots.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            robots: self.robots.len(),
            reports_applied: self.reports_applied,
            stale_reports: self.stale_reports,
            future_reports: self.future_reports,
        }
    }
}
