//! Egress policy gateway for vm0 micro-VM workloads.
//!
//! The gateway sits on the runner host in front of all outbound VM traffic.
//! For every connection it looks up the source VM in the proxy registry and
//! enforces that run's firewall rules, in one of two modes:
//!
//! - **SNI mode** (`mitmEnabled: false`): the decision is taken before any
//!   TLS handshake bytes cross the wire, from the ClientHello's SNI alone.
//!   Allowed connections tunnel through untouched; denied ones are left to
//!   fail certificate validation inside the VM, which lacks the MITM CA.
//! - **MITM mode** (`mitmEnabled: true`): requests are decrypted and either
//!   answered with a synthesized 403 (DENY) or rewritten to the trusted vm0
//!   proxy endpoint with the run's sandbox token (ALLOW).
//!
//! Every decision is appended to the run's JSONL network log.
//!
//! The TLS termination and event loop themselves belong to the embedding
//! proxy framework; this crate supplies the per-connection hooks
//! ([`Gateway::tls_clienthello`], [`Gateway::request`],
//! [`Gateway::response`], [`Gateway::flow_error`]) and the state they share.

pub mod audit;
mod error;
pub mod flow;
mod gateway;
mod options;
pub mod registry;

pub use audit::{AuditEntry, AuditMode};
pub use error::GatewayError;
pub use flow::{Headers, HttpFlow, HttpRequest, HttpResponse, TlsClientHello};
pub use gateway::Gateway;
pub use options::GatewayOptions;
pub use registry::{RegistryCache, RegistrySnapshot, VmRegistration};
