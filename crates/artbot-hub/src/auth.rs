use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use artbot_core::role::Role;

use crate::state::AppState;

/// Header the upstream auth gate sets to the operator's role.
pub const ROLE_HEADER: &str = "x-artbot-role";

/// Auth settings taken from config.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Token agents must present as `Authorization: Bearer ...`. None = open.
    pub agent_token: Option<String>,
    pub default_role: Role,
}

/// Role attached by the gate, falling back to `default` when the header is
/// absent or unreadable.
pub fn resolve_role(headers: &HeaderMap, default: Role) -> Role {
    let Some(value) = headers.get(ROLE_HEADER) else {
        return default;
    };
    match value.to_str().ok().map(str::parse::<Role>) {
        Some(Ok(role)) => role,
        _ => {
            tracing::debug!(?value, "Unreadable role header, using default role");
            default
        },
    }
}

/// Extractor for the operator role of a dashboard or REST request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorRole(pub Role);

impl FromRequestParts<AppState> for OperatorRole {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Self(resolve_role(&parts.headers, state.auth.default_role)))
    }
}

/// Whether an agent request may connect. With no token configured every
/// agent is let in.
pub fn agent_token_accepted(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

/// Rejects agent upgrades that do not carry the configured bearer token.
pub async fn require_agent_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !agent_token_accepted(request.headers(), state.auth.agent_token.as_deref()) {
        tracing::warn!(path = %request.uri().path(), "Rejected agent connection with missing or wrong token");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(request).await)
}
