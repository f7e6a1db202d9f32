use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard, RwLock, RwLockWriteGuard};

use artbot_core::net::messages::{
    CommandResponseEvent, ConnectionStatusMsg, FleetSnapshotMsg, HubEvent, LogRecord,
    RobotRemovedMsg, Severity, SystemAlertMsg,
};
use artbot_core::robot::{ExhibitionStatus, Robot};
use artbot_core::role::Role;
use artbot_core::time::timestamp_now;

use crate::alerts::{AlertMonitor, AlertThresholds};
use crate::channel::{Channel, ChannelId, ChannelReceiver};
use crate::dispatcher::{CommandOutcome, PendingCommands, PendingSummary};
use crate::error::FleetError;
use crate::fanout;
use crate::history::{CommandRecord, CommandStats};
use crate::logs::{LogBook, LogQuery, LogStats};
use crate::registry::{
    AgentInfo, AgentMetadata, ConnectionRegistry, ConnectionStats, Subscription, Unregistered,
};
use crate::store::{RobotStore, StoreStats};

pub type SharedHub = Arc<Hub>;

/// Tunables the hub needs at runtime, extracted from `HubConfig`.
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub command_timeout: Duration,
    pub heartbeat_timeout: Duration,
    pub dashboard_buffer: usize,
    pub agent_buffer: usize,
    pub command_history: usize,
    pub log_lines: usize,
    pub alerts: AlertThresholds,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(120),
            dashboard_buffer: 256,
            agent_buffer: 64,
            command_history: 100,
            log_lines: 1000,
            alerts: AlertThresholds::default(),
        }
    }
}

/// Counts reported by the health endpoint.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct HubStats {
    pub agents: usize,
    pub dashboards: usize,
    pub pending_commands: usize,
    pub store: StoreStats,
    pub logs: LogStats,
}

/// Owner of the fleet state: connection registry, robot store, pending
/// commands with their history, health alert bookkeeping and agent logs.
///
/// Every mutation goes through [`Hub::lock`], which takes all five locks in
/// a fixed order (registry, store, pending, alerts, logs). Mutations are
/// therefore serialized, and broadcasts leave in the same order the store
/// changed. Reads take a single lock and return copies.
pub struct Hub {
    registry: RwLock<ConnectionRegistry>,
    store: RwLock<RobotStore>,
    pending: Mutex<PendingCommands>,
    alerts: Mutex<AlertMonitor>,
    logs: Mutex<LogBook>,
    settings: HubSettings,
}

/// All fleet locks, held together for one mutation.
pub(crate) struct FleetGuard<'a> {
    pub registry: RwLockWriteGuard<'a, ConnectionRegistry>,
    pub store: RwLockWriteGuard<'a, RobotStore>,
    pub pending: MutexGuard<'a, PendingCommands>,
    pub alerts: MutexGuard<'a, AlertMonitor>,
    pub logs: MutexGuard<'a, LogBook>,
}

impl FleetGuard<'_> {
    pub fn broadcast(&mut self, event: &HubEvent) -> usize {
        fanout::broadcast(&mut self.registry, event, None)
    }

    pub fn send_to(&mut self, channel_id: ChannelId, event: &HubEvent) -> bool {
        fanout::send_to(&mut self.registry, channel_id, event)
    }

    /// Make `channel` the owner of `agent_id` and announce it. An agent that
    /// did not name its address is known by the channel's peer address.
    pub fn register_agent(&mut self, agent_id: &str, channel: Channel, mut metadata: AgentMetadata) {
        let channel_id = channel.id();
        if metadata.ip_address.is_none() {
            metadata.ip_address = channel.peer().map(|ip| ip.to_string());
        }
        let hostname = metadata.hostname.clone();
        if let Some(old) = self
            .registry
            .register_agent(agent_id, channel, metadata.clone())
        {
            tracing::info!(agent_id, old_channel = %old.id(), "Replaced agent channel");
        }
        let robot = self.store.attach(agent_id, channel_id, Some(&metadata));
        tracing::info!(agent_id, channel = %channel_id, ?hostname, "Agent registered");

        self.broadcast(&HubEvent::robot_update(robot));
        self.broadcast(&HubEvent::ConnectionStatus(ConnectionStatusMsg {
            agent_id: agent_id.to_string(),
            connected: true,
            hostname,
        }));
    }

    /// Forget a channel. For an agent channel that still owns its robot, the
    /// robot goes OFFLINE, its pending command fails, and dashboards hear
    /// about both. Idempotent.
    pub fn disconnect(&mut self, channel_id: ChannelId) {
        match self.registry.unregister(channel_id) {
            Unregistered::Agent { agent_id, metadata } => {
                tracing::info!(agent_id = %agent_id, channel = %channel_id, "Agent disconnected");
                self.fail_pending(&agent_id, CommandOutcome::RobotWentOffline);
                self.alerts.forget(&agent_id);
                if let Some(robot) = self.store.mark_offline(&agent_id) {
                    self.broadcast(&HubEvent::robot_update(robot));
                }
                self.broadcast(&HubEvent::ConnectionStatus(ConnectionStatusMsg {
                    agent_id,
                    connected: false,
                    hostname: metadata.hostname,
                }));
            },
            Unregistered::Dashboard => {
                tracing::debug!(channel = %channel_id, "Dashboard disconnected");
            },
            Unregistered::NotRegistered => {},
        }
    }

    /// Resolve the robot's outstanding command (if any) as failed and tell
    /// dashboards.
    pub fn fail_pending(&mut self, robot_id: &str, outcome: CommandOutcome) {
        let Some(cmd) = self.pending.take_for_robot(robot_id) else {
            return;
        };
        tracing::info!(
            robot_id,
            command_id = %cmd.command_id,
            ?outcome,
            "Pending command resolved as failed"
        );
        let event = HubEvent::CommandResponse(CommandResponseEvent {
            command_id: cmd.command_id,
            robot_id: robot_id.to_string(),
            action: cmd.action,
            success: false,
            message: Some(outcome.describe()),
            result: None,
        });
        self.pending.finish(cmd, outcome);
        self.broadcast(&event);
    }
}

impl Hub {
    pub fn new(settings: HubSettings) -> Self {
        Self {
            registry: RwLock::new(ConnectionRegistry::new()),
            store: RwLock::new(RobotStore::new()),
            pending: Mutex::new(PendingCommands::new(settings.command_history)),
            alerts: Mutex::new(AlertMonitor::new(settings.alerts)),
            logs: Mutex::new(LogBook::new(settings.log_lines)),
            settings,
        }
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    pub(crate) async fn lock(&self) -> FleetGuard<'_> {
        let registry = self.registry.write().await;
        let store = self.store.write().await;
        let pending = self.pending.lock().await;
        let alerts = self.alerts.lock().await;
        let logs = self.logs.lock().await;
        FleetGuard {
            registry,
            store,
            pending,
            alerts,
            logs,
        }
    }

    /// A fresh agent channel. It is registered once the agent sends
    /// `register` (or its first report).
    pub fn open_agent_channel(&self) -> (Channel, ChannelReceiver) {
        Channel::new(self.settings.agent_buffer)
    }

    /// Like [`Hub::open_agent_channel`], remembering the remote address.
    pub fn open_agent_channel_from(&self, peer: IpAddr) -> (Channel, ChannelReceiver) {
        let (channel, rx) = self.open_agent_channel();
        (channel.with_peer(peer), rx)
    }

    /// Subscribe a dashboard. The first frame it receives is a
    /// `fleet_snapshot` of every known robot.
    pub async fn connect_dashboard(&self, role: Role) -> (Subscription, ChannelReceiver) {
        let (channel, rx) = Channel::new(self.settings.dashboard_buffer);
        let mut guard = self.lock().await;
        let sub = guard.registry.register_dashboard(channel, role);
        let snapshot = HubEvent::FleetSnapshot(FleetSnapshotMsg {
            robots: guard.store.get_all(),
        });
        guard.send_to(sub.channel_id, &snapshot);
        tracing::info!(channel = %sub.channel_id, %role, "Dashboard connected");
        (sub, rx)
    }

    /// Called by the transport whenever a channel closes, from either side.
    pub async fn disconnect(&self, channel_id: ChannelId) {
        self.lock().await.disconnect(channel_id);
    }

    /// Close and unregister agents that have been silent longer than the
    /// heartbeat timeout. Returns the ids that were dropped.
    pub async fn sweep_stale_agents(&self, now: Instant) -> Vec<String> {
        let mut guard = self.lock().await;
        let stale = guard
            .registry
            .stale_agents(now, self.settings.heartbeat_timeout);
        for (agent_id, channel_id) in &stale {
            tracing::warn!(agent_id = %agent_id, channel = %channel_id, "Agent heartbeat timed out");
            guard.broadcast(&HubEvent::SystemAlert(SystemAlertMsg {
                alert_type: "heartbeat_timeout".to_string(),
                severity: Severity::Warning,
                message: format!("Robot {agent_id} stopped sending heartbeats"),
                robot_id: Some(agent_id.clone()),
                timestamp: timestamp_now(),
            }));
            guard.disconnect(*channel_id);
        }
        stale.into_iter().map(|(id, _)| id).collect()
    }

    /// Administrative removal of a robot record. A connected agent for the
    /// robot is disconnected first.
    pub async fn delete_robot(&self, robot_id: &str, role: Role) -> Result<Robot, FleetError> {
        if !role.may_delete_robots() {
            return Err(FleetError::Forbidden {
                role,
                operation: "delete robots".to_string(),
            });
        }
        let mut guard = self.lock().await;
        if guard.store.get(robot_id).is_none() {
            return Err(FleetError::UnknownRobot(robot_id.to_string()));
        }
        if let Some(channel_id) = guard.store.owner(robot_id) {
            guard.disconnect(channel_id);
        }
        guard.fail_pending(robot_id, CommandOutcome::RobotWentOffline);
        let robot = guard.store.delete(robot_id)?;
        guard.alerts.forget(robot_id);
        guard.logs.forget(robot_id);
        guard.pending.forget_history(robot_id);
        guard.broadcast(&HubEvent::RobotRemoved(RobotRemovedMsg {
            robot_id: robot_id.to_string(),
        }));
        tracing::info!(robot_id, "Robot deleted");
        Ok(robot)
    }

    pub async fn get(&self, robot_id: &str) -> Option<Robot> {
        self.store.read().await.get(robot_id)
    }

    pub async fn get_all(&self) -> Vec<Robot> {
        self.store.read().await.get_all()
    }

    pub async fn exhibition_status(&self) -> ExhibitionStatus {
        self.store.read().await.exhibition_status()
    }

    pub async fn pending_commands(&self) -> Vec<PendingSummary> {
        self.pending.lock().await.summaries()
    }

    /// Commands issued to `robot_id`, newest first.
    pub async fn command_history(&self, robot_id: &str, limit: usize) -> Vec<CommandRecord> {
        self.pending.lock().await.history().for_robot(robot_id, limit)
    }

    pub async fn command_stats(&self, robot_id: Option<&str>) -> CommandStats {
        self.pending.lock().await.history().stats(robot_id)
    }

    /// Log lines from one robot, newest first.
    pub async fn robot_logs(&self, robot_id: &str, query: LogQuery) -> Vec<LogRecord> {
        self.logs.lock().await.for_robot(robot_id, query)
    }

    /// Log lines from the whole fleet, newest first.
    pub async fn recent_logs(&self, query: LogQuery) -> Vec<LogRecord> {
        self.logs.lock().await.recent(query)
    }

    pub async fn agents(&self) -> Vec<AgentInfo> {
        self.registry.read().await.agent_infos(Instant::now())
    }

    pub async fn agent(&self, agent_id: &str) -> Result<AgentInfo, FleetError> {
        self.registry
            .read()
            .await
            .agent_info(agent_id, Instant::now())
            .ok_or_else(|| FleetError::UnknownAgent(agent_id.to_string()))
    }

    pub async fn connection_stats(&self) -> ConnectionStats {
        self.registry.read().await.connection_stats()
    }

    pub async fn is_agent_connected(&self, agent_id: &str) -> bool {
        self.registry.read().await.lookup_agent(agent_id).is_some()
    }

    pub async fn stats(&self) -> HubStats {
        let registry = self.registry.read().await;
        let store = self.store.read().await;
        let pending = self.pending.lock().await;
        let logs = self.logs.lock().await;
        HubStats {
            agents: registry.agent_count(),
            dashboards: registry.dashboard_count(),
            pending_commands: pending.len(),
            store: store.stats(),
            logs: logs.stats(),
        }
    }
}
