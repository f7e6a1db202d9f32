use std::time::Instant;

use artbot_core::net::messages::{AgentMessage, HubEvent, LogEntryMsg, LogRecord, RobotReport};
use artbot_core::net::protocol::{ProtocolError, decode_agent_message};
use artbot_core::time::timestamp_now;

use crate::channel::Channel;
use crate::hub::{FleetGuard, Hub};
use crate::registry::AgentMetadata;
use crate::store::ApplyOutcome;

impl FleetGuard<'_> {
    /// Whether `channel` may speak for `agent_id`, registering it implicitly
    /// if the agent skipped `register`. Channels that were closed (e.g. by a
    /// newer registration) are never re-admitted.
    fn admit(&mut self, agent_id: &str, channel: &Channel) -> bool {
        if self.registry.agent_for_channel(channel.id()) == Some(agent_id) {
            return true;
        }
        if channel.is_closed() {
            tracing::debug!(agent_id, channel = %channel.id(), "Ignoring message from closed channel");
            return false;
        }
        tracing::info!(agent_id, "Implicit registration on first report");
        self.register_agent(agent_id, channel.clone(), AgentMetadata::default());
        true
    }

    fn ingest_report(&mut self, agent_id: &str, report: &RobotReport) {
        let now = timestamp_now();
        match self.store.apply_report(agent_id, report, now) {
            ApplyOutcome::Applied { robot, changed } => {
                let alerts = self.alerts.evaluate(&robot, now);
                if changed {
                    self.broadcast(&HubEvent::robot_update(robot));
                }
                for alert in alerts {
                    tracing::warn!(agent_id, alert = %alert.alert_type, "{}", alert.message);
                    self.broadcast(&HubEvent::SystemAlert(alert));
                }
            },
            ApplyOutcome::Stale => {},
        }
    }

    /// Keep an agent log line and forward it to every dashboard.
    fn ingest_log(&mut self, agent_id: &str, entry: LogEntryMsg) {
        let record = LogRecord::from_entry(agent_id, entry, timestamp_now());
        let event = HubEvent::LogMessage(record.clone());
        self.logs.push(record);
        self.broadcast(&event);
    }
}

impl Hub {
    /// Decode and route one text frame from an agent channel. Bad frames are
    /// logged and dropped; the channel stays open.
    pub async fn handle_agent_frame(
        &self,
        agent_id: &str,
        channel: &Channel,
        text: &str,
    ) -> Result<(), ProtocolError> {
        match decode_agent_message(text) {
            Ok(msg) => {
                self.handle_agent_message(agent_id, channel, msg).await;
                Ok(())
            },
            Err(e) => {
                match &e {
                    ProtocolError::UnknownMessageType(kind) => {
                        tracing::warn!(agent_id, kind = %kind, "Dropping unrecognized agent message");
                    },
                    other => {
                        tracing::warn!(agent_id, error = %other, "Dropping invalid agent message");
                    },
                }
                Err(e)
            },
        }
    }

    /// Route one decoded agent message. Messages from a single channel are
    /// handled in arrival order because the transport awaits each call.
    pub async fn handle_agent_message(&self, agent_id: &str, channel: &Channel, msg: AgentMessage) {
        let mut guard = self.lock().await;
        let kind = msg.kind();

        if let AgentMessage::Register(reg) = msg {
            if channel.is_closed() {
                return;
            }
            guard.register_agent(agent_id, channel.clone(), AgentMetadata::from(reg));
            return;
        }

        if !guard.admit(agent_id, channel) {
            return;
        }
        guard.registry.touch_heartbeat(agent_id, Instant::now());
        tracing::trace!(agent_id, kind, "Agent message");

        match msg {
            AgentMessage::Heartbeat(report) | AgentMessage::RobotStatus(report) => {
                guard.ingest_report(agent_id, &report);
            },
            AgentMessage::CommandResponse(resp) => {
                let success = resp.succeeded();
                guard.resolve_command(agent_id, resp.command_id, success, resp.message, resp.result);
            },
            AgentMessage::LogEntry(entry) => guard.ingest_log(agent_id, entry),
            AgentMessage::Register(_) => {},
        }
    }
}
