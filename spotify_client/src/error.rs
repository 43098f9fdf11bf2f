use crate::config::ConfigError;
use spotify_protocol::{FailureCause, ProtocolError};
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Not connected to the spotify service")]
    NotConnected,

    #[error("Request {correlation_id} timed out")]
    RequestTimedOut { correlation_id: u32 },

    #[error("Connection lost before the response arrived")]
    ConnectionLost,

    #[error("Client stopped")]
    Stopped,

    #[error("Request rejected by the service: {0}")]
    Rejected(FailureCause),

    #[error("Audio endpoint error: {0}")]
    AudioEndpoint(String),

    #[error("Invalid server address: {0}")]
    InvalidAddress(String),
}
