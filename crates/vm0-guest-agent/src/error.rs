use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] vm0_proto::CodecError),

    #[error("unexpected handshake line: {0:?}")]
    Handshake(String),
}
