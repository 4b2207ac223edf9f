//! First-match rule evaluation.

use std::net::IpAddr;

use crate::matchers::{match_domain, match_ip};
use crate::resolve::ResolveHost;
use crate::rules::{Action, Rule};

/// Result of evaluating a rule list against one hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub action: Action,
    /// Description of the deciding rule: `"final"`, `"domain:<pattern>"`,
    /// `"ip:<cidr>"`, `"default"`, or `None` when no policy is configured.
    pub rule: Option<String>,
}

impl Verdict {
    fn new(action: Action, rule: impl Into<String>) -> Self {
        Self {
            action,
            rule: Some(rule.into()),
        }
    }
}

/// Walk `rules` in order and return the first match.
///
/// A terminal rule decides immediately. IP rules compare against `known_ip`
/// when the caller already has one; otherwise the hostname is resolved at
/// most once per evaluation, and that outcome (including failure) is reused
/// for every later IP rule. No match after the full walk denies; an empty
/// list allows, because no policy was configured for the run.
pub async fn evaluate(
    rules: &[Rule],
    hostname: &str,
    known_ip: Option<IpAddr>,
    resolver: &dyn ResolveHost,
) -> Verdict {
    if rules.is_empty() {
        return Verdict {
            action: Action::Allow,
            rule: None,
        };
    }

    let mut resolved: Option<Option<IpAddr>> = known_ip.map(Some);

    for rule in rules {
        match rule {
            Rule::Final { action } => return Verdict::new(*action, "final"),
            Rule::Domain { domain, action } => {
                if match_domain(domain, hostname) {
                    return Verdict::new(
                        action.unwrap_or(Action::Deny),
                        format!("domain:{domain}"),
                    );
                }
            }
            Rule::Ip { ip, action } => {
                let addr = match resolved {
                    Some(addr) => addr,
                    None => {
                        let addr = resolver.resolve(hostname).await;
                        resolved = Some(addr);
                        addr
                    }
                };
                if let Some(addr) = addr {
                    if match_ip(ip, addr) {
                        return Verdict::new(action.unwrap_or(Action::Deny), format!("ip:{ip}"));
                    }
                }
            }
        }
    }

    Verdict::new(Action::Deny, "default")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolver returning a fixed answer and counting lookups.
    struct FixedResolver {
        addr: Option<IpAddr>,
        lookups: AtomicUsize,
    }

    impl FixedResolver {
        fn some(addr: &str) -> Self {
            Self {
                addr: Some(addr.parse().unwrap()),
                lookups: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                addr: None,
                lookups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ResolveHost for FixedResolver {
        async fn resolve(&self, _host: &str) -> Option<IpAddr> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.addr
        }
    }

    fn domain(pattern: &str, action: Action) -> Rule {
        Rule::Domain {
            domain: pattern.to_string(),
            action: Some(action),
        }
    }

    fn ip_rule(cidr: &str, action: Action) -> Rule {
        Rule::Ip {
            ip: cidr.to_string(),
            action: Some(action),
        }
    }

    #[tokio::test]
    async fn empty_rules_allow_without_description() {
        let resolver = FixedResolver::failing();
        let verdict = evaluate(&[], "anything.test", None, &resolver).await;
        assert_eq!(verdict.action, Action::Allow);
        assert_eq!(verdict.rule, None);
    }

    #[tokio::test]
    async fn first_match_wins() {
        let rules = vec![
            domain("*.example.com", Action::Allow),
            domain("api.example.com", Action::Deny),
        ];
        let resolver = FixedResolver::failing();
        let verdict = evaluate(&rules, "api.example.com", None, &resolver).await;
        assert_eq!(verdict.action, Action::Allow);
        assert_eq!(verdict.rule.as_deref(), Some("domain:*.example.com"));
    }

    #[tokio::test]
    async fn terminal_rule_short_circuits() {
        // Rules after the terminal must not be consulted, so resolution
        // outcomes past it cannot change the decision.
        let rules = vec![
            domain("other.test", Action::Allow),
            Rule::Final {
                action: Action::Allow,
            },
            ip_rule("10.0.0.0/8", Action::Deny),
        ];
        let resolver = FixedResolver::some("10.1.2.3");
        let verdict = evaluate(&rules, "whatever.test", None, &resolver).await;
        assert_eq!(verdict.action, Action::Allow);
        assert_eq!(verdict.rule.as_deref(), Some("final"));
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unmatched_walk_denies_by_default() {
        let rules = vec![domain("*.example.com", Action::Allow)];
        let resolver = FixedResolver::failing();
        let verdict = evaluate(&rules, "evil.test", None, &resolver).await;
        assert_eq!(verdict.action, Action::Deny);
        assert_eq!(verdict.rule.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn matching_rule_without_action_denies() {
        let rules = vec![Rule::Domain {
            domain: "tracked.test".to_string(),
            action: None,
        }];
        let resolver = FixedResolver::failing();
        let verdict = evaluate(&rules, "tracked.test", None, &resolver).await;
        assert_eq!(verdict.action, Action::Deny);
        assert_eq!(verdict.rule.as_deref(), Some("domain:tracked.test"));
    }

    #[tokio::test]
    async fn known_ip_skips_resolution() {
        let rules = vec![ip_rule("10.0.0.0/8", Action::Allow)];
        let resolver = FixedResolver::some("192.0.2.1");
        let verdict = evaluate(
            &rules,
            "host.test",
            Some("10.9.9.9".parse().unwrap()),
            &resolver,
        )
        .await;
        assert_eq!(verdict.action, Action::Allow);
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resolution_happens_once_across_ip_rules() {
        let rules = vec![
            ip_rule("192.0.2.0/24", Action::Deny),
            ip_rule("10.0.0.0/8", Action::Allow),
        ];
        let resolver = FixedResolver::some("10.1.2.3");
        let verdict = evaluate(&rules, "host.test", None, &resolver).await;
        assert_eq!(verdict.action, Action::Allow);
        assert_eq!(verdict.rule.as_deref(), Some("ip:10.0.0.0/8"));
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_resolution_is_a_silent_miss() {
        let rules = vec![
            ip_rule("10.0.0.0/8", Action::Allow),
            ip_rule("192.0.2.0/24", Action::Allow),
        ];
        let resolver = FixedResolver::failing();
        let verdict = evaluate(&rules, "unresolvable.test", None, &resolver).await;
        assert_eq!(verdict.action, Action::Deny);
        assert_eq!(verdict.rule.as_deref(), Some("default"));
        // The failure is memoized too; one lookup serves both rules.
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 1);
    }
}
