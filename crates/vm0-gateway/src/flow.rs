//! Per-connection handle types exchanged with the embedding proxy
//! framework.
//!
//! The framework parses TLS and HTTP; the gateway only reads and mutates
//! these handles. Setting [`TlsClientHello::ignore_connection`] tells the
//! framework to tunnel raw bytes without decrypting; setting
//! [`HttpFlow::response`] during the request phase short-circuits the
//! upstream entirely.

use std::path::PathBuf;
use std::time::Instant;

use uuid::Uuid;

use vm0_policy::Action;

/// Pre-handshake view of one intercepted TCP connection.
#[derive(Debug, Clone)]
pub struct TlsClientHello {
    /// Source address of the connecting VM, if known.
    pub client_ip: Option<String>,

    /// Server name from the ClientHello, absent for SNI-less clients.
    pub sni: Option<String>,

    /// Original destination port.
    pub server_port: u16,

    /// When set, the framework tunnels the connection without attempting
    /// decryption.
    pub ignore_connection: bool,
}

impl TlsClientHello {
    pub fn new(client_ip: Option<String>, sni: Option<String>) -> Self {
        Self {
            client_ip,
            sni,
            server_port: 443,
            ignore_connection: false,
        }
    }
}

/// Ordered, case-insensitive header collection.
#[derive(Debug, Clone, Default)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace the header if present, append otherwise.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            slot.1 = value;
        } else {
            self.0.push((name, value));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Decrypted request as handed over by the framework. Mutations here are
/// what the upstream connection will actually carry.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Path including the query string.
    pub path: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(
        method: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            scheme: (if port == 443 { "https" } else { "http" }).to_string(),
            host: host.into(),
            port,
            path: path.into(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }
}

/// Response attached to a flow, either from upstream or synthesized.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Plain-text response, used for the synthesized firewall denial.
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        let mut headers = Headers::new();
        headers.set("content-type", "text/plain");
        Self {
            status,
            headers,
            body: body.into().into_bytes(),
        }
    }
}

/// One HTTP flow from decrypted request to response (or error).
///
/// Besides the request/response pair this carries the stash the gateway
/// records during the request phase for response-phase logging, mirroring
/// what would otherwise live in framework flow metadata.
#[derive(Debug, Clone)]
pub struct HttpFlow {
    pub id: Uuid,
    pub client_ip: Option<String>,
    pub request: HttpRequest,
    pub response: Option<HttpResponse>,

    pub run_id: Option<String>,
    pub mitm_enabled: bool,
    pub network_log_path: Option<PathBuf>,
    pub firewall_action: Option<Action>,
    pub rule_matched: Option<String>,
    /// Full original URL, recorded before any rewrite.
    pub original_url: Option<String>,
    /// Original destination, recorded before any rewrite.
    pub original_host: Option<String>,
    pub original_port: u16,
    /// Original path with the query stripped.
    pub original_path: Option<String>,
    pub skip_rewrite: bool,
}

impl HttpFlow {
    pub fn new(client_ip: Option<String>, request: HttpRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_ip,
            request,
            response: None,
            run_id: None,
            mitm_enabled: false,
            network_log_path: None,
            firewall_action: None,
            rule_matched: None,
            original_url: None,
            original_host: None,
            original_port: 0,
            original_path: None,
            skip_rewrite: false,
        }
    }
}

/// Per-flow timing state shared between the request, response and error
/// callbacks of parallel flows.
#[derive(Debug, Default)]
pub(crate) struct FlowTimes {
    map: std::sync::Mutex<std::collections::HashMap<Uuid, Instant>>,
}

impl FlowTimes {
    pub fn insert(&self, id: Uuid) {
        self.locked().insert(id, Instant::now());
    }

    pub fn remove(&self, id: Uuid) -> Option<Instant> {
        self.locked().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.locked().len()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, std::collections::HashMap<Uuid, Instant>> {
        match self.map.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
