// Murmur - peer-to-peer instant messaging engine over an anonymous overlay
//
// Event hook polymorphism: a trait of seven methods with default no-op
// bodies, overridden selectively by whatever embeds the engine.

use async_trait::async_trait;

use crate::protocol::Message;

#[async_trait]
pub trait EventHooks: Send + Sync {
    async fn on_authorization(&self, _msg: &Message) {}

    async fn on_ping(&self, _msg: &Message) {}

    async fn on_private_message(&self, _msg: &Message) {}

    async fn on_public_message(&self, _msg: &Message) {}

    async fn on_unauthorized(&self, _msg: &Message) {}

    async fn on_contact_online(&self, _name: &str) {}

    async fn on_contact_offline(&self, _name: &str) {}
}

/// Default hook set: every event is a no-op. Used when the embedder only
/// cares about a subset of events and builds a partial override on top, or
/// by tests that don't care about event delivery at all.
pub struct NoopHooks;

#[async_trait]
impl EventHooks for NoopHooks {}
