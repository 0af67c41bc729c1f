// Murmur - peer-to-peer instant messaging engine over an anonymous overlay
//
// A messaging engine for a privacy-preserving anonymous overlay network:
// per-peer outbound queues with offline stashing, self-healing gateway
// session management, a compact wire protocol, liveness pinging, and a
// receive pipeline with deduplication and authorization gating.
//
// Out of scope: the gateway/overlay SDK's own session/transport
// internals (modeled only as the `gateway::Gateway` trait boundary),
// platform-specific data directory resolution, a presentation-layer
// bridge, sample bot applications, and the logging sink's
// formatting/output destination.

#[macro_use]
extern crate log;

pub mod addressbook;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod hooks;
pub mod online;
pub mod persistence;
pub mod pinger;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod shared;

pub use engine::Engine;
pub use error::{EngineError, Result};
pub use hooks::{EventHooks, NoopHooks};
pub use protocol::{Code, Message};
