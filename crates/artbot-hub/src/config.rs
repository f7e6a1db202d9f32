use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use artbot_core::role::Role;

use crate::alerts::AlertThresholds;
use crate::hub::HubSettings;

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "artbot.toml";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("listen_addr is not a valid socket address: {0}")]
    InvalidListenAddr(String),
    #[error("{field} {reason}")]
    Invalid { field: &'static str, reason: &'static str },
}

/// Top-level hub configuration, loaded from `artbot.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub listen_addr: String,
    pub auth: AuthFileConfig,
    pub limits: LimitsConfig,
    pub commands: CommandsConfig,
    pub fleet: FleetConfig,
    pub alerts: AlertThresholds,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            auth: AuthFileConfig::default(),
            limits: LimitsConfig::default(),
            commands: CommandsConfig::default(),
            fleet: FleetConfig::default(),
            alerts: AlertThresholds::default(),
        }
    }
}

/// Auth section. Credential checks happen upstream; the hub only reads the
/// role the gate attached and, optionally, a shared agent token.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthFileConfig {
    /// Bearer token agents must present on `/ws/agent`. None = open.
    pub agent_token: Option<String>,
    /// Role assumed when a request carries no role header.
    pub default_role: Role,
}

/// Inbound frame allowance for one socket: a sustained rate plus a burst.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FrameRate {
    pub per_sec: f64,
    pub burst: u32,
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    /// Agents report every few seconds but flush logs in bursts.
    pub agent_rate: FrameRate,
    /// Dashboards only send commands and pings.
    pub dashboard_rate: FrameRate,
    /// Outbound frames queued per dashboard before it is dropped as slow.
    pub dashboard_buffer: usize,
    pub agent_buffer: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 200,
            agent_rate: FrameRate {
                per_sec: 20.0,
                burst: 100,
            },
            dashboard_rate: FrameRate {
                per_sec: 5.0,
                burst: 20,
            },
            dashboard_buffer: 256,
            agent_buffer: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub timeout_secs: u64,
    pub sweep_interval_ms: u64,
    /// Finished and pending commands remembered per robot.
    pub history_per_robot: usize,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            sweep_interval_ms: 500,
            history_per_robot: 100,
        }
    }
}

/// Agent liveness and per-robot retention.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub heartbeat_timeout_secs: u64,
    pub liveness_check_interval_secs: u64,
    /// Agent log lines kept per robot; the oldest are evicted first.
    pub log_lines_per_robot: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 120,
            liveness_check_interval_secs: 10,
            log_lines_per_robot: 1000,
        }
    }
}

fn require(ok: bool, field: &'static str, reason: &'static str) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid { field, reason })
    }
}

impl HubConfig {
    /// Reject values the hub cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidListenAddr(self.listen_addr.clone()));
        }

        if self.auth.agent_token.is_some() {
            tracing::warn!(
                "agent_token is set in config file, prefer ARTBOT_AGENT_TOKEN env var in production"
            );
        }

        require(
            self.limits.max_ws_connections > 0,
            "limits.max_ws_connections",
            "must be > 0",
        )?;
        for (rate, per_sec_field, burst_field) in [
            (
                self.limits.agent_rate,
                "limits.agent_rate.per_sec",
                "limits.agent_rate.burst",
            ),
            (
                self.limits.dashboard_rate,
                "limits.dashboard_rate.per_sec",
                "limits.dashboard_rate.burst",
            ),
        ] {
            require(
                rate.per_sec.is_finite() && rate.per_sec > 0.0,
                per_sec_field,
                "must be > 0",
            )?;
            require(rate.burst > 0, burst_field, "must be > 0")?;
        }
        require(
            self.limits.dashboard_buffer > 0,
            "limits.dashboard_buffer",
            "must be > 0",
        )?;
        require(self.limits.agent_buffer > 0, "limits.agent_buffer", "must be > 0")?;
        require(
            self.commands.timeout_secs > 0,
            "commands.timeout_secs",
            "must be > 0",
        )?;
        require(
            self.commands.sweep_interval_ms > 0,
            "commands.sweep_interval_ms",
            "must be > 0",
        )?;
        require(
            self.commands.history_per_robot > 0,
            "commands.history_per_robot",
            "must be > 0",
        )?;
        require(
            self.fleet.log_lines_per_robot > 0,
            "fleet.log_lines_per_robot",
            "must be > 0",
        )?;
        require(
            self.fleet.heartbeat_timeout_secs > 0,
            "fleet.heartbeat_timeout_secs",
            "must be > 0",
        )?;
        require(
            self.fleet.liveness_check_interval_secs > 0,
            "fleet.liveness_check_interval_secs",
            "must be > 0",
        )?;
        require(
            self.alerts.battery_critical <= 100,
            "alerts.battery_critical",
            "must be <= 100",
        )?;
        Ok(())
    }

    /// Load config from `ARTBOT_CONFIG` (or `artbot.toml`) if it exists, then
    /// apply env var overrides.
    pub fn load() -> Self {
        let path = std::env::var("ARTBOT_CONFIG")
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load_file(Path::new(&path));
        config.apply_env_overrides();
        config
    }

    /// Parse a config file; a missing or malformed file yields defaults.
    pub fn load_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<HubConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!(path = %path.display(), "Loaded configuration");
                    cfg
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Failed to parse config: {e}, using defaults");
                    HubConfig::default()
                },
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                HubConfig::default()
            },
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("ARTBOT_LISTEN_ADDR")
            && !addr.is_empty()
        {
            self.listen_addr = addr;
        }
        if let Ok(token) = std::env::var("ARTBOT_AGENT_TOKEN")
            && !token.is_empty()
        {
            self.auth.agent_token = Some(token);
        }
        if let Ok(val) = std::env::var("ARTBOT_DEFAULT_ROLE")
            && let Ok(role) = val.parse::<Role>()
        {
            self.auth.default_role = role;
        }
        if let Ok(val) = std::env::var("ARTBOT_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.limits.max_ws_connections = n;
        }
        if let Ok(val) = std::env::var("ARTBOT_AGENT_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            self.limits.agent_rate.per_sec = n;
        }
        if let Ok(val) = std::env::var("ARTBOT_DASHBOARD_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            self.limits.dashboard_rate.per_sec = n;
        }
        if let Ok(val) = std::env::var("ARTBOT_COMMAND_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.commands.timeout_secs = n;
        }
        if let Ok(val) = std::env::var("ARTBOT_HEARTBEAT_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.fleet.heartbeat_timeout_secs = n;
        }
    }

    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            command_timeout: Duration::from_secs(self.commands.timeout_secs),
            heartbeat_timeout: Duration::from_secs(self.fleet.heartbeat_timeout_secs),
            dashboard_buffer: self.limits.dashboard_buffer,
            agent_buffer: self.limits.agent_buffer,
            command_history: self.commands.history_per_robot,
            log_lines: self.fleet.log_lines_per_robot,
            alerts: self.alerts,
        }
    }
}
