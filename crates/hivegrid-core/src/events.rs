//! Grid event bus — pub/sub of node and session lifecycle events.
//!
//! The distributor consumes `NodeStatus`, `NodeDrainComplete`, and
//! `SessionClosed`, and produces `NodeAdded`, `NodeRemoved`, and
//! `NodeRejected`. Publishing is best-effort: a fire with no listeners is
//! logged at debug and dropped, never surfaced to the caller.

use std::fmt;

use tokio::sync::broadcast;
use tracing::debug;

use crate::data::{NodeId, NodeStatus, SessionId};

/// Buffered events per subscriber before the slowest one starts lagging.
const CHANNEL_CAPACITY: usize = 256;

/// A node or session lifecycle event.
#[derive(Debug, Clone)]
pub enum GridEvent {
    /// A node published a status snapshot.
    NodeStatus(NodeStatus),
    /// A draining node finished its last session.
    NodeDrainComplete(NodeId),
    /// A session ended on its node.
    SessionClosed(SessionId),
    /// The distributor registered a node.
    NodeAdded(NodeId),
    /// The distributor dropped a node.
    NodeRemoved(NodeId),
    /// A registration was refused; carries the offending node's uri.
    NodeRejected(String),
}

impl GridEvent {
    /// Topic name, for logging.
    pub fn topic(&self) -> &'static str {
        match self {
            GridEvent::NodeStatus(_) => "node-status",
            GridEvent::NodeDrainComplete(_) => "node-drain-complete",
            GridEvent::SessionClosed(_) => "session-closed",
            GridEvent::NodeAdded(_) => "node-added",
            GridEvent::NodeRemoved(_) => "node-removed",
            GridEvent::NodeRejected(_) => "node-rejected",
        }
    }
}

impl fmt::Display for GridEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

/// Transport-agnostic event bus seam. The `bus.transport` config key
/// selects the implementation; [`LocalBus`] is the in-process one.
pub trait EventBus: Send + Sync {
    /// Publish an event to all current subscribers. Best-effort.
    fn fire(&self, event: GridEvent);

    /// Obtain a fresh subscription covering events fired from now on.
    fn subscribe(&self) -> broadcast::Receiver<GridEvent>;

    fn is_ready(&self) -> bool;
}

/// In-process bus over a tokio broadcast channel.
pub struct LocalBus {
    tx: broadcast::Sender<GridEvent>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for LocalBus {
    fn fire(&self, event: GridEvent) {
        let topic = event.topic();
        if self.tx.send(event).is_err() {
            debug!(topic, "event dropped, no subscribers");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<GridEvent> {
        self.tx.subscribe()
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_fired_events() {
        let bus = LocalBus::new();
        let mut rx = bus.subscribe();

        let id = NodeId::random();
        bus.fire(GridEvent::NodeAdded(id));

        match rx.recv().await.unwrap() {
            GridEvent::NodeAdded(got) => assert_eq!(got, id),
            other => panic!("unexpected event: {other}"),
        }
    }

    #[tokio::test]
    async fn fire_without_subscribers_is_silent() {
        let bus = LocalBus::new();
        // Must not panic or error.
        bus.fire(GridEvent::NodeRejected("http://n1:5555".to_string()));
        assert!(bus.is_ready());
    }

    #[tokio::test]
    async fn subscription_only_sees_later_events() {
        let bus = LocalBus::new();
        let mut early = bus.subscribe();
        bus.fire(GridEvent::SessionClosed(SessionId::random()));

        let mut late = bus.subscribe();
        let id = NodeId::random();
        bus.fire(GridEvent::NodeRemoved(id));

        // Early subscriber sees both; late subscriber only the second.
        assert!(matches!(
            early.recv().await.unwrap(),
            GridEvent::SessionClosed(_)
        ));
        assert!(matches!(early.recv().await.unwrap(), GridEvent::NodeRemoved(_)));
        assert!(matches!(late.recv().await.unwrap(), GridEvent::NodeRemoved(_)));
    }
}
