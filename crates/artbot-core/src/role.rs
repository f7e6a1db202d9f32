use serde::{Deserialize, Serialize};

use crate::command::Action;

/// Operator role attached to every dashboard connection and REST request by
/// the upstream auth gate. The hub trusts it as given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "ADMIN")]
    Admin,
    #[default]
    #[serde(alias = "MUSEUM")]
    Museum,
}

impl Role {
    /// Museum staff run the exhibition; maintenance actions are admin-only.
    pub fn may_issue(self, action: Action) -> bool {
        match self {
            Self::Admin => true,
            Self::Museum => matches!(action, Action::Start | Action::Stop),
        }
    }

    pub fn may_delete_robots(self) -> bool {
        self == Self::Admin
    }

    /// Agent hosts, versions and addresses are an admin concern.
    pub fn may_inspect_agents(self) -> bool {
        self == Self::Admin
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "museum" => Ok(Self::Museum),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Admin => f.write_str("admin"),
            Self::Museum => f.write_str("museum"),
        }
    }
}
