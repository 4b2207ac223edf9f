//! Rule and action types as they appear in the proxy registry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a firewall decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Allow,
    Deny,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allow => "ALLOW",
            Self::Deny => "DENY",
        })
    }
}

/// One firewall rule.
///
/// The registry writes rules as plain objects distinguished by which key
/// they carry, so the serde representation is untagged. A matching domain
/// or IP rule with no explicit `action` denies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rule {
    /// Forces a decision for every evaluation that reaches it; later rules
    /// are never consulted.
    Final {
        #[serde(rename = "final")]
        action: Action,
    },

    /// Exact hostname or `*.<suffix>` prefix wildcard (the wildcard also
    /// matches the bare apex).
    Domain {
        domain: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<Action>,
    },

    /// Single IP or CIDR block, checked against the resolved address.
    Ip {
        ip: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<Action>,
    },
}
