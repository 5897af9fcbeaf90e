use thiserror::Error;

/// Errors that can occur in the network core
#[derive(Error, Debug)]
pub enum NetError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("invalid operation: {0}")]
    State(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("DNS error: {0}")]
    Dns(String),

    #[error("pool error: {0}")]
    Pool(String),
}

pub type Result<T> = std::result::Result<T, NetError>;
