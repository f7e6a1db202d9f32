use std::sync::Arc;

use artbot_core::net::messages::HubEvent;
use artbot_core::net::protocol::encode_hub_event;
use artbot_core::role::Role;

use crate::channel::{ChannelId, Frame};
use crate::registry::ConnectionRegistry;

/// Encode an event once into a shareable frame.
pub fn encode_frame(event: &HubEvent) -> Option<Frame> {
    match encode_hub_event(event) {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode hub event");
            None
        },
    }
}

fn audience_matches(event: &HubEvent, role_filter: Option<Role>, role: Role) -> bool {
    role_filter.is_none_or(|r| r == role) && event.audience().is_none_or(|r| r == role)
}

/// Deliver `event` to every dashboard (optionally only those with
/// `role_filter`). A dashboard whose queue is full or closed is dropped on
/// the spot; the rest still get the frame. Returns how many received it.
///
/// Callers hold the registry write lock, so frames reach each dashboard in
/// the order `broadcast` was called.
pub fn broadcast(
    registry: &mut ConnectionRegistry,
    event: &HubEvent,
    role_filter: Option<Role>,
) -> usize {
    let Some(frame) = encode_frame(event) else {
        return 0;
    };

    let mut delivered = 0;
    let mut failed: Vec<(ChannelId, crate::channel::SendError)> = Vec::new();
    for dashboard in registry.dashboards() {
        if !audience_matches(event, role_filter, dashboard.role) {
            continue;
        }
        match dashboard.channel.try_send(Arc::clone(&frame)) {
            Ok(()) => delivered += 1,
            Err(e) => failed.push((dashboard.channel.id(), e)),
        }
    }

    for (channel_id, reason) in failed {
        tracing::warn!(channel = %channel_id, %reason, "Dropping dashboard after failed send");
        registry.unregister(channel_id);
    }
    delivered
}

/// Send `event` to a single dashboard, dropping it if the send fails.
pub fn send_to(registry: &mut ConnectionRegistry, channel_id: ChannelId, event: &HubEvent) -> bool {
    let Some(frame) = encode_frame(event) else {
        return false;
    };
    let Some(dashboard) = registry.dashboard(channel_id) else {
        return false;
    };
    match dashboard.channel.try_send(frame) {
        Ok(()) => true,
        Err(reason) => {
            tracing::warn!(channel = %channel_id, %reason, "Dropping dashboard after failed send");
            registry.unregister(channel_id);
            false
        },
    }
}
