//! Domain records exchanged between nodes, the distributor, and the
//! session map.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capabilities::Capabilities;

/// Unique identifier for a worker node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a live automation session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Availability a node reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Up,
    Draining,
    Down,
}

/// A stereotype advertisement: one capability template a node can serve,
/// with its slot budget and the sessions currently occupying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotGroup {
    pub stereotype: Capabilities,
    pub max_sessions: u32,
    /// Sessions currently active against this stereotype.
    #[serde(default)]
    pub active: u32,
}

impl SlotGroup {
    pub fn new(stereotype: Capabilities, max_sessions: u32) -> Self {
        Self {
            stereotype,
            max_sessions,
            active: 0,
        }
    }
}

/// Snapshot a node publishes about itself. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub uri: String,
    pub slots: Vec<SlotGroup>,
    pub availability: Availability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_secret: Option<String>,
}

/// A session record held by the session map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// Address of the node serving the session.
    pub uri: String,
    pub capabilities: Capabilities,
}

/// Parsed new-session payload: an ordered, non-empty sequence of
/// capability sets. Only the first set is served; the rest are reported in
/// failure messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSessionRequest {
    pub capabilities: Vec<Capabilities>,
}

impl NewSessionRequest {
    pub fn single(capabilities: Capabilities) -> Self {
        Self {
            capabilities: vec![capabilities],
        }
    }

    /// All requested capability sets, comma-joined, for failure messages.
    pub fn describe(&self) -> String {
        self.capabilities
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Immutable projection of one stereotype's occupancy for status dumps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotSummary {
    pub stereotype: Capabilities,
    pub max_sessions: u32,
    pub in_use: u32,
}

/// Immutable projection of a registered node for status dumps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub node_id: NodeId,
    pub uri: String,
    pub availability: Availability,
    pub load: f64,
    pub slots: Vec<SlotSummary>,
}

/// Snapshot of the distributor's node directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributorStatus {
    pub nodes: Vec<NodeSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_status_round_trips() {
        let status = NodeStatus {
            node_id: NodeId::random(),
            uri: "http://10.0.0.7:5555".to_string(),
            slots: vec![SlotGroup::new(Capabilities::browser("chrome"), 4)],
            availability: Availability::Up,
            registration_secret: Some("hunter2".to_string()),
        };
        let encoded = serde_json::to_string(&status).unwrap();
        let decoded: NodeStatus = serde_json::from_str(&encoded).unwrap();
        assert_eq!(status, decoded);
    }

    #[test]
    fn availability_uses_snake_case() {
        assert_eq!(
            serde_json::to_string(&Availability::Draining).unwrap(),
            "\"draining\""
        );
    }

    #[test]
    fn missing_secret_decodes_as_none() {
        let raw = r#"{
            "node_id": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
            "uri": "http://n1:5555",
            "slots": [],
            "availability": "up"
        }"#;
        let status: NodeStatus = serde_json::from_str(raw).unwrap();
        assert_eq!(status.registration_secret, None);
    }

    #[test]
    fn describe_joins_all_capability_sets() {
        let request = NewSessionRequest {
            capabilities: vec![
                Capabilities::browser("chrome"),
                Capabilities::browser("firefox"),
            ],
        };
        let described = request.describe();
        assert!(described.contains("chrome"));
        assert!(described.contains("firefox"));
        assert!(described.contains(", "));
    }
}
