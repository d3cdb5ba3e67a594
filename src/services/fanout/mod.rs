//! Cross-node event fan-out. Sessions subscribe locally; publishes travel
//! through Redis Pub/Sub so every node routes the event to whichever
//! sessions it happens to host.

pub mod distributed;

pub use distributed::DistributedFanout;

use crate::protocol::ServerEvent;
use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Delivery of server pushes to connected sessions. Publishing is
/// best-effort: failures are logged and never surface to the operation
/// that triggered the event.
#[async_trait]
pub trait EventFanout: Send + Sync + std::fmt::Debug {
    /// Local stream of events addressed to `user_id`. Every open session
    /// of that user holds one receiver.
    async fn subscribe_user(&self, user_id: Uuid) -> broadcast::Receiver<ServerEvent>;

    /// Local stream of presence transitions for `user_id`, fed only while
    /// at least one session here has registered interest.
    async fn subscribe_presence(&self, user_id: Uuid) -> broadcast::Receiver<ServerEvent>;

    /// Sends `event` to every session of `user_id`, on this node and others.
    async fn push_to_user(&self, user_id: Uuid, event: ServerEvent);

    /// Announces a presence transition of `user_id` to everyone watching them.
    async fn publish_presence(&self, user_id: Uuid, event: ServerEvent);
}
