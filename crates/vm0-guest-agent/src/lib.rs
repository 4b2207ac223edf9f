//! Guest control agent for vm0 micro-VMs.
//!
//! Runs inside each VM and executes shell commands on behalf of the host
//! over the framed JSON protocol in `vm0-proto`. The production transport is
//! virtio-vsock (host CID 2, port 1000); tests and local development use a
//! Unix domain socket with the Firecracker-style `CONNECT`/`OK` emulation
//! handshake. One agent serves one VM; handling is strictly sequential per
//! connection.

mod error;
pub mod exec;
pub mod handler;
pub mod handshake;
pub mod session;

pub use error::AgentError;
