pub mod command;
pub mod net;
pub mod robot;
pub mod role;
pub mod time;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use chrono::{DateTime, TimeZone, Utc};

    use crate::net::messages::{AgentMessage, RegisterMsg, RobotReport};
    use crate::net::protocol::encode;

    /// Deterministic timestamp `secs` seconds after a fixed epoch.
    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_767_225_600 + secs, 0)
            .single()
            .unwrap_or_default()
    }

    /// A report carrying only a timestamp and a battery level.
    pub fn battery_report(secs: i64, battery: u8) -> RobotReport {
        RobotReport {
            timestamp: Some(at(secs)),
            battery_level: Some(battery),
            ..RobotReport::default()
        }
    }

    /// A `register` message with a hostname derived from the agent id.
    pub fn register_msg(agent_id: &str) -> AgentMessage {
        AgentMessage::Register(RegisterMsg {
            hostname: Some(format!("{agent_id}.local")),
            capabilities: vec!["person_following".to_string()],
            version: Some("1.0.0".to_string()),
            ip_address: None,
        })
    }

    /// Encode an agent message as a text frame.
    pub fn agent_frame(msg: &AgentMessage) -> String {
        encode(msg).unwrap_or_default()
    }
}
