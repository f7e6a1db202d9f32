use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use artbot_core::net::messages::RegisterMsg;
use artbot_core::role::Role;
use artbot_core::time::timestamp_now;

use crate::channel::{Channel, ChannelId};

/// Registration metadata an agent announces about its host.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentMetadata {
    pub hostname: Option<String>,
    pub capabilities: Vec<String>,
    pub version: Option<String>,
    pub ip_address: Option<String>,
}

impl From<RegisterMsg> for AgentMetadata {
    fn from(msg: RegisterMsg) -> Self {
        Self {
            hostname: msg.hostname,
            capabilities: msg.capabilities,
            version: msg.version,
            ip_address: msg.ip_address,
        }
    }
}

/// Operator view of one connected agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentInfo {
    pub agent_id: String,
    #[serde(flatten)]
    pub metadata: AgentMetadata,
    pub connected_at: DateTime<Utc>,
    pub seconds_since_heartbeat: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub agents: usize,
    pub admin_dashboards: usize,
    pub museum_dashboards: usize,
    pub connected_agents: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub struct AgentConnection {
    pub channel: Channel,
    pub metadata: AgentMetadata,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: Instant,
}

#[derive(Debug)]
pub struct DashboardConnection {
    pub channel: Channel,
    pub role: Role,
    pub connected_at: DateTime<Utc>,
}

/// Handle returned to the transport when a dashboard subscribes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub channel_id: ChannelId,
    pub role: Role,
}

#[derive(Debug, Clone)]
enum ConnectionKind {
    Agent(String),
    Dashboard,
}

/// What `unregister` removed.
#[derive(Debug, PartialEq)]
pub enum Unregistered {
    Agent {
        agent_id: String,
        metadata: AgentMetadata,
    },
    Dashboard,
    /// Unknown or already-removed channel (including agent channels that
    /// were superseded by a newer registration).
    NotRegistered,
}

/// Which channels are alive right now: one per connected agent (keyed by
/// agent id, which doubles as the robot id) plus every dashboard.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    agents: HashMap<String, AgentConnection>,
    dashboards: BTreeMap<ChannelId, DashboardConnection>,
    index: HashMap<ChannelId, ConnectionKind>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `channel` the live connection for `agent_id`. A previous channel
    /// for the same id is closed and returned; re-registering on the same
    /// channel only refreshes the metadata.
    pub fn register_agent(
        &mut self,
        agent_id: &str,
        channel: Channel,
        metadata: AgentMetadata,
    ) -> Option<Channel> {
        let now = Instant::now();
        if let Some(existing) = self.agents.get_mut(agent_id)
            && existing.channel.id() == channel.id()
        {
            existing.metadata = metadata;
            existing.last_heartbeat = now;
            return None;
        }

        self.index
            .insert(channel.id(), ConnectionKind::Agent(agent_id.to_string()));
        let previous = self.agents.insert(
            agent_id.to_string(),
            AgentConnection {
                channel,
                metadata,
                connected_at: timestamp_now(),
                last_heartbeat: now,
            },
        );

        previous.map(|old| {
            self.index.remove(&old.channel.id());
            old.channel.close();
            tracing::info!(
                agent_id,
                old_channel = %old.channel.id(),
                "Agent re-registered, closed stale channel"
            );
            old.channel
        })
    }

    pub fn register_dashboard(&mut self, channel: Channel, role: Role) -> Subscription {
        let channel_id = channel.id();
        self.index.insert(channel_id, ConnectionKind::Dashboard);
        self.dashboards.insert(
            channel_id,
            DashboardConnection {
                channel,
                role,
                connected_at: timestamp_now(),
            },
        );
        Subscription { channel_id, role }
    }

    /// Forget a channel. Safe to call any number of times.
    pub fn unregister(&mut self, channel_id: ChannelId) -> Unregistered {
        match self.index.remove(&channel_id) {
            Some(ConnectionKind::Agent(agent_id)) => match self.agents.remove(&agent_id) {
                Some(conn) => {
                    conn.channel.close();
                    Unregistered::Agent {
                        agent_id,
                        metadata: conn.metadata,
                    }
                },
                None => Unregistered::NotRegistered,
            },
            Some(ConnectionKind::Dashboard) => {
                if let Some(conn) = self.dashboards.remove(&channel_id) {
                    conn.channel.close();
                }
                Unregistered::Dashboard
            },
            None => Unregistered::NotRegistered,
        }
    }

    pub fn lookup_agent(&self, agent_id: &str) -> Option<Channel> {
        self.agents.get(agent_id).map(|conn| conn.channel.clone())
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentConnection> {
        self.agents.get(agent_id)
    }

    /// Agent id owning `channel_id`, if that channel is a live agent channel.
    pub fn agent_for_channel(&self, channel_id: ChannelId) -> Option<&str> {
        match self.index.get(&channel_id) {
            Some(ConnectionKind::Agent(agent_id)) => Some(agent_id.as_str()),
            _ => None,
        }
    }

    fn info(agent_id: &str, conn: &AgentConnection, now: Instant) -> AgentInfo {
        AgentInfo {
            agent_id: agent_id.to_string(),
            metadata: conn.metadata.clone(),
            connected_at: conn.connected_at,
            seconds_since_heartbeat: now.saturating_duration_since(conn.last_heartbeat).as_secs(),
        }
    }

    pub fn agent_info(&self, agent_id: &str, now: Instant) -> Option<AgentInfo> {
        self.agents
            .get(agent_id)
            .map(|conn| Self::info(agent_id, conn, now))
    }

    /// Every connected agent, ordered by id.
    pub fn agent_infos(&self, now: Instant) -> Vec<AgentInfo> {
        let mut infos: Vec<AgentInfo> = self
            .agents
            .iter()
            .map(|(id, conn)| Self::info(id, conn, now))
            .collect();
        infos.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        infos
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        let mut connected_agents: Vec<String> = self.agents.keys().cloned().collect();
        connected_agents.sort();
        let admin_dashboards = self
            .dashboards
            .values()
            .filter(|d| d.role == Role::Admin)
            .count();
        ConnectionStats {
            agents: self.agents.len(),
            admin_dashboards,
            museum_dashboards: self.dashboards.len() - admin_dashboards,
            connected_agents,
            timestamp: timestamp_now(),
        }
    }

    pub fn touch_heartbeat(&mut self, agent_id: &str, now: Instant) {
        if let Some(conn) = self.agents.get_mut(agent_id) {
            conn.last_heartbeat = now;
        }
    }

    /// Agents whose last heartbeat is older than `timeout` at `now`.
    pub fn stale_agents(&self, now: Instant, timeout: Duration) -> Vec<(String, ChannelId)> {
        self.agents
            .iter()
            .filter(|(_, conn)| now.saturating_duration_since(conn.last_heartbeat) > timeout)
            .map(|(id, conn)| (id.clone(), conn.channel.id()))
            .collect()
    }

    pub fn dashboard(&self, channel_id: ChannelId) -> Option<&DashboardConnection> {
        self.dashboards.get(&channel_id)
    }

    /// Dashboards in registration order.
    pub fn dashboards(&self) -> impl Iterator<Item = &DashboardConnection> {
        self.dashboards.values()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn dashboard_count(&self) -> usize {
        self.dashboards.len()
    }
}
