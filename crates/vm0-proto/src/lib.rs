//! Wire protocol for vm0 host↔guest control traffic.
//!
//! Every frame on the wire is a 4-byte big-endian length prefix followed by
//! exactly that many bytes of UTF-8 JSON. Payloads are capped at 1 MiB; a
//! frame that declares more is a protocol violation and the stream cannot be
//! resynchronized.
//!
//! The message vocabulary is small: the guest announces itself with `ready`,
//! answers `ping` with `pong`, runs shell commands for `exec` and reports
//! them with `exec_result`, and answers anything it does not understand with
//! `error`.

pub mod codec;
pub mod message;

pub use codec::{encode, CodecError, FrameDecoder, HEADER_LEN, MAX_FRAME_LEN};
pub use message::{ErrorPayload, ExecRequest, ExecResult, Message, MessageKind};

/// Vsock port the guest agent speaks on.
pub const GUEST_AGENT_PORT: u32 = 1000;

/// Vsock CID of the hypervisor host.
pub const HOST_CID: u32 = 2;
