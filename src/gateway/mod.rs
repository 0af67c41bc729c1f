// Murmur - peer-to-peer instant messaging engine over an anonymous overlay
//
// The overlay gateway daemon is an external collaborator: this module only
// fixes the contract the rest of the engine depends on. Session creation,
// destination lookup, and stream connect/accept are the five operations
// the engine calls; how a concrete implementation talks to the daemon is
// deliberately out of scope for the messaging engine itself.

pub mod mock;
pub mod sam;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{EngineError, Result};

/// A resolved overlay destination, opaque to the engine beyond its base32
/// form. The SDK's own internal representation (full public key, certs,
/// etc.) is not modeled here.
pub type Destination = String;

/// A duplex byte stream to a single peer, good for one request/response
/// exchange before being dropped.
pub trait GatewayStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> GatewayStream for T {}

pub type BoxedStream = Box<dyn GatewayStream>;

/// A live control session bound to the local destination. Dropping or
/// closing it tears down the session on the daemon side.
#[async_trait]
pub trait Session: Send {
    /// Blocks until the daemon signals the session has died (a zero-length
    /// read on the control channel).
    async fn wait_closed(&mut self);

    async fn close(&mut self);
}

/// The gateway SDK surface the engine consumes.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn create_session(
        &self,
        session_name: &str,
        local_destination: &str,
    ) -> Result<Box<dyn Session>>;

    async fn stream_connect(
        &self,
        session_name: &str,
        target_destination: &Destination,
    ) -> Result<BoxedStream>;

    async fn stream_accept(&self, session_name: &str) -> Result<(String, BoxedStream)>;

    async fn destination_lookup(&self, base32_address: &str) -> Result<Destination>;

    /// Returns `(base32_identity, private_key_bytes)` for a freshly minted
    /// local destination.
    async fn new_destination(&self) -> Result<(String, Vec<u8>)>;
}

pub(crate) fn connection_error(msg: impl Into<String>) -> EngineError {
    EngineError::ConnectionError(msg.into())
}
