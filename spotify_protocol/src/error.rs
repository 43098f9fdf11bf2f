use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Malformed TLV 0x{tlv_type:x}: declared {declared} bytes, {available} available")]
    MalformedTlv {
        tlv_type: u32,
        declared: u32,
        available: usize,
    },

    #[error("TLV nesting deeper than {0} levels")]
    TlvDepthExceeded(usize),

    #[error("Invalid message length: {0}")]
    InvalidLength(u32),

    #[error("Unknown message type: 0x{0:08x}")]
    UnknownMessageType(u32),

    #[error("Unexpected message type: expected {expected}, got {actual}")]
    UnexpectedMessageType { expected: String, actual: String },
}
