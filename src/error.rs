// Murmur - peer-to-peer instant messaging engine over an anonymous overlay
//
// Error taxonomy for the messaging engine: validation failures are surfaced
// to callers, transport failures are retried by the owning component and
// never propagate past it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid message size: {0}")]
    InvalidSize(usize),

    #[error("invalid message code: {0}")]
    InvalidCode(u8),

    #[error("content is not valid utf-8")]
    InvalidUtf8,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("entry already exists")]
    Duplicate,

    #[error("no such contact: {0}")]
    NoSuchContact(String),

    #[error("gateway unreachable")]
    GatewayUnreachable,

    #[error("destination not found: {0}")]
    PeerNotFound(String),

    #[error("gateway session already exists")]
    DuplicatedDestination,

    #[error("gateway connection error: {0}")]
    ConnectionError(String),

    #[error("operation timed out")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
