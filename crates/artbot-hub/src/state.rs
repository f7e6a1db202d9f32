use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;

use crate::auth::AuthConfig;
use crate::config::HubConfig;
use crate::hub::{Hub, SharedHub};

#[derive(Clone)]
pub struct AppState {
    pub hub: SharedHub,
    pub auth: AuthConfig,
    pub config: Arc<HubConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
    /// Cancelled on shutdown; stops background sweepers.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: HubConfig) -> Self {
        let auth = AuthConfig {
            agent_token: config.auth.agent_token.clone(),
            default_role: config.auth.default_role,
        };
        Self {
            hub: Arc::new(Hub::new(config.hub_settings())),
            auth,
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
        }
    }
}

/// One slot under the WebSocket connection cap, released on drop.
pub struct ConnectionGuard {
    count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    /// Take a slot if fewer than `max` are held. The check and the increment
    /// are one atomic step, so concurrent upgrades cannot overshoot the cap.
    pub fn try_acquire(count: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (held < max).then_some(held + 1)
            })
            .ok()?;
        Some(Self {
            count: Arc::clone(count),
        })
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}
