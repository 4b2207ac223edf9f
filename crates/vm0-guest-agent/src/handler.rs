//! Message dispatch.

use tracing::info;

use vm0_proto::{ExecRequest, Message, MessageKind};

use crate::exec;

/// Handle one inbound message and return the response frame, if any.
pub async fn handle(msg: Message) -> Option<Message> {
    info!(kind = %msg.kind, id = %msg.id, "received message");
    let Message { kind, id, payload } = msg;

    match kind {
        MessageKind::Ping => Some(Message::pong(id)),
        MessageKind::Exec => {
            let req = ExecRequest::from_payload(&payload);
            let result = exec::run_command(&req.command, req.timeout_ms).await;
            Some(Message::exec_result(id, &result))
        }
        other => Some(Message::error(id, format!("Unknown type: {other}"))),
    }
}
