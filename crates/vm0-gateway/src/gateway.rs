//! Connection hooks and shared gateway state.

use std::sync::Arc;

use tracing::warn;
use url::Url;
use uuid::Uuid;

use vm0_policy::{evaluate, Action, ResolveHost, SystemResolver};

use crate::audit::{self, AuditEntry, AuditMode};
use crate::error::GatewayError;
use crate::flow::{FlowTimes, HttpFlow, HttpResponse, TlsClientHello};
use crate::options::GatewayOptions;
use crate::registry::{RegistryCache, VmRegistration};

/// Path of the rewriting endpoint under the API origin.
pub const PROXY_ENDPOINT_PATH: &str = "/api/webhooks/agent/proxy";

/// Header preserving the VM's own Authorization value across the rewrite.
pub const ORIGINAL_AUTH_HEADER: &str = "x-vm0-original-authorization";

/// Vercel deployment-protection bypass header.
pub const VERCEL_BYPASS_HEADER: &str = "x-vercel-protection-bypass";

/// Rule name logged when traffic targets the vm0 API itself.
const RULE_VM0_API: &str = "vm0-api";

/// Rule name logged when an SNI-only client sent no SNI.
const RULE_NO_SNI: &str = "no-sni";

/// Shared state for one gateway instance: options, registry cache, resolver
/// and the per-flow start-time map. Constructed once at startup and handed
/// to every framework callback.
pub struct Gateway {
    options: GatewayOptions,
    api: Url,
    api_host: String,
    registry: RegistryCache,
    resolver: Arc<dyn ResolveHost>,
    flow_times: FlowTimes,
}

impl Gateway {
    pub fn new(options: GatewayOptions) -> Result<Self, GatewayError> {
        let api = Url::parse(&options.api_url).map_err(|source| GatewayError::InvalidApiUrl {
            url: options.api_url.clone(),
            source,
        })?;
        let api_host = api
            .host_str()
            .ok_or_else(|| GatewayError::ApiUrlMissingHost {
                url: options.api_url.clone(),
            })?
            .to_ascii_lowercase();
        let registry = RegistryCache::new(options.registry_path.clone());
        Ok(Self {
            options,
            api,
            api_host,
            registry,
            resolver: Arc::new(SystemResolver),
            flow_times: FlowTimes::default(),
        })
    }

    /// Replace the DNS resolver (tests use a fixed table).
    pub fn with_resolver(mut self, resolver: Arc<dyn ResolveHost>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Number of flows with a recorded start time and no response yet.
    pub fn inflight_flows(&self) -> usize {
        self.flow_times.len()
    }

    /// Pre-handshake hook, invoked before any TLS bytes cross the wire.
    pub async fn tls_clienthello(&self, hello: &mut TlsClientHello) {
        let Some(client_ip) = hello.client_ip.clone() else {
            return;
        };

        let registry = self.registry.load().await;
        let Some(vm) = registry.get(&client_ip) else {
            // Not one of ours: CIDR redirection can hand the proxy traffic it
            // is not configured to inspect, which must tunnel untouched.
            hello.ignore_connection = true;
            return;
        };

        if vm.mitm_enabled {
            // The request hook owns the decision after decryption.
            return;
        }

        let port = hello.server_port;
        let sni = hello
            .sni
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_lowercase);

        let Some(sni) = sni else {
            // Without an SNI there is nothing to evaluate. The flag stays
            // clear, the MITM attempt proceeds, and certificate validation
            // fails inside the VM, which lacks the MITM CA.
            self.audit_sni(vm, Action::Deny, "", port, Some(RULE_NO_SNI.to_string()))
                .await;
            return;
        };

        if self.is_api_host(&sni) {
            self.audit_sni(vm, Action::Allow, &sni, port, Some(RULE_VM0_API.to_string()))
                .await;
            hello.ignore_connection = true;
            return;
        }

        let verdict = evaluate(&vm.firewall_rules, &sni, None, self.resolver.as_ref()).await;
        let allowed = verdict.action == Action::Allow;
        self.audit_sni(vm, verdict.action, &sni, port, verdict.rule).await;
        if allowed {
            hello.ignore_connection = true;
        }
        // DENY relies on the same CA-absent handshake failure as the no-SNI
        // case.
    }

    /// Request hook, invoked once per decrypted HTTP request.
    pub async fn request(&self, flow: &mut HttpFlow) {
        self.flow_times.insert(flow.id);

        let Some(client_ip) = flow.client_ip.clone() else {
            return;
        };
        let registry = self.registry.load().await;
        let Some(vm) = registry.get(&client_ip) else {
            return;
        };

        flow.run_id = vm.run_id.clone();
        flow.mitm_enabled = vm.mitm_enabled;
        flow.network_log_path = vm.network_log_path.clone();

        // Record the original target before anything rewrites the request;
        // the response hook logs against these.
        let hostname = flow.request.host.to_ascii_lowercase();
        flow.original_host = Some(hostname.clone());
        flow.original_port = flow.request.port;
        flow.original_path = Some(strip_query(&flow.request.path).to_string());

        if self.is_api_host(&hostname) {
            flow.firewall_action = Some(Action::Allow);
            flow.rule_matched = Some(RULE_VM0_API.to_string());
            flow.original_url = Some(original_url(&flow.request));
            flow.skip_rewrite = true;
            return;
        }

        let verdict = evaluate(&vm.firewall_rules, &hostname, None, self.resolver.as_ref()).await;
        flow.firewall_action = Some(verdict.action);
        flow.rule_matched = verdict.rule;

        if verdict.action == Action::Deny {
            // The upstream is never contacted for a denied request.
            flow.response = Some(HttpResponse::text(403, "Blocked by firewall"));
            return;
        }

        if self.options.api_url.is_empty() {
            return;
        }

        let current_url = original_url(&flow.request);
        if current_url.starts_with(self.options.api_url.trim_end_matches('/')) {
            // Already aimed at the proxy endpoint; rewriting again would loop.
            flow.skip_rewrite = true;
            return;
        }

        if is_trusted_storage(&hostname) {
            // Presigned URL signatures do not survive rewriting.
            flow.skip_rewrite = true;
            return;
        }

        flow.original_url = Some(current_url.clone());

        if !vm.mitm_enabled {
            // SNI-only flows are routed away before decryption; nothing to
            // rewrite if one still lands here.
            return;
        }

        let mut proxy_url = match self.api.join(PROXY_ENDPOINT_PATH) {
            Ok(u) => u,
            Err(e) => {
                warn!(error = %e, "failed to build proxy endpoint URL");
                return;
            }
        };
        {
            let mut pairs = proxy_url.query_pairs_mut();
            pairs.append_pair("url", &current_url);
            if let Some(run_id) = &flow.run_id {
                pairs.append_pair("runId", run_id);
            }
        }

        flow.request.scheme = proxy_url.scheme().to_string();
        flow.request.host = proxy_url.host_str().unwrap_or_default().to_string();
        flow.request.port = proxy_url.port_or_known_default().unwrap_or(443);
        flow.request.path = match proxy_url.query() {
            Some(query) => format!("{}?{}", proxy_url.path(), query),
            None => proxy_url.path().to_string(),
        };

        if let Some(original_auth) = flow.request.headers.get("authorization").map(str::to_string)
        {
            flow.request.headers.set(ORIGINAL_AUTH_HEADER, original_auth);
        }
        if let Some(token) = &vm.sandbox_token {
            flow.request
                .headers
                .set("authorization", format!("Bearer {token}"));
        }
        if let Some(secret) = &self.options.vercel_bypass {
            flow.request
                .headers
                .set(VERCEL_BYPASS_HEADER, secret.clone());
        }
    }

    /// Response hook, invoked when the flow completes.
    pub async fn response(&self, flow: &mut HttpFlow) {
        let started = self.flow_times.remove(flow.id);

        let Some(status) = flow.response.as_ref().map(|r| r.status) else {
            return;
        };

        if status >= 400 {
            warn!(
                status,
                host = flow.original_host.as_deref().unwrap_or(&flow.request.host),
                "flow completed with error status"
            );
        }

        if flow.run_id.is_none() {
            return;
        }
        let Some(log_path) = flow.network_log_path.clone() else {
            return;
        };

        let host = flow
            .original_host
            .clone()
            .unwrap_or_else(|| flow.request.host.to_ascii_lowercase());
        let port = if flow.original_port != 0 {
            flow.original_port
        } else {
            flow.request.port
        };

        let mut entry = AuditEntry::new(
            AuditMode::Mitm,
            flow.firewall_action.unwrap_or(Action::Allow),
            host,
            port,
            flow.rule_matched.clone(),
        );
        entry.method = Some(flow.request.method.clone());
        entry.path = flow
            .original_path
            .clone()
            .or_else(|| Some(strip_query(&flow.request.path).to_string()));
        entry.url = Some(
            flow.original_url
                .clone()
                .unwrap_or_else(|| original_url(&flow.request)),
        );
        entry.status = Some(status);
        entry.latency_ms = started.map(|t| t.elapsed().as_millis() as u64);
        entry.request_size = Some(flow.request.body.len());
        entry.response_size = flow.response.as_ref().map(|r| r.body.len());

        audit::append(&log_path, &entry).await;
    }

    /// Error hook, invoked for flows that will never reach the response
    /// phase. Only drops the timing entry; without a reliable status there
    /// is nothing trustworthy to audit.
    pub fn flow_error(&self, flow_id: Uuid) {
        self.flow_times.remove(flow_id);
    }

    fn is_api_host(&self, host: &str) -> bool {
        host == self.api_host || host.ends_with(&format!(".{}", self.api_host))
    }

    async fn audit_sni(
        &self,
        vm: &VmRegistration,
        action: Action,
        host: &str,
        port: u16,
        rule: Option<String>,
    ) {
        if let Some(path) = &vm.network_log_path {
            let entry = AuditEntry::new(AuditMode::Sni, action, host, port, rule);
            audit::append(path, &entry).await;
        }
    }
}

/// Reconstruct the target URL from the (not yet rewritten) request. The
/// scheme follows the original destination port, and the port is elided
/// when it is the scheme default.
fn original_url(req: &crate::flow::HttpRequest) -> String {
    let (scheme, default_port) = if req.port == 443 {
        ("https", 443)
    } else {
        ("http", 80)
    };
    if req.port == default_port {
        format!("{scheme}://{}{}", req.host, req.path)
    } else {
        format!("{scheme}://{}:{}{}", req.host, req.port, req.path)
    }
}

fn strip_query(path: &str) -> &str {
    path.split('?').next().unwrap_or(path)
}

/// Hosts whose presigned request signatures would be invalidated by a
/// rewrite; these always pass through.
fn is_trusted_storage(host: &str) -> bool {
    host == "s3.amazonaws.com"
        || host.ends_with(".s3.amazonaws.com")
        || host.contains(".s3-")
        || host.ends_with(".r2.cloudflarestorage.com")
        || host.ends_with(".storage.googleapis.com")
}
