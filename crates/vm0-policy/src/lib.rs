//! Per-run firewall rules for VM egress traffic.
//!
//! A rule list is evaluated first-match-wins against the hostname a VM is
//! trying to reach (the TLS SNI, or the decrypted HTTP host). Three rule
//! shapes exist: domain patterns, IP/CIDR checks, and a terminal rule that
//! forces a decision for everything that reaches it. A non-empty list that
//! matches nothing denies; an absent or empty list means no policy is
//! configured and the connection is allowed.

mod evaluate;
mod matchers;
mod resolve;
mod rules;

pub use evaluate::{evaluate, Verdict};
pub use matchers::{match_domain, match_ip};
pub use resolve::{ResolveHost, SystemResolver};
pub use rules::{Action, Rule};
