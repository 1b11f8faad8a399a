//! Per-node mirror: capacity accounting, health state, reservation.
//!
//! A `NodeHandle` guards its mutable state with its own mutex so health
//! probes can update a single node without touching the distributor's
//! directory lock. The critical sections are all short and lock-free of
//! I/O; the remote create-session call happens in
//! [`Reservation::finalize`], after the directory lock is released.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tracing::{debug, warn};

use hivegrid_core::{
    Availability, Capabilities, GridError, GridResult, NodeId, NodeStatus, NodeSummary, Session,
    SlotSummary,
};

use crate::client::NodeClient;

/// Consecutive probe failures before a node is marked down.
const UNHEALTHY_THRESHOLD: u32 = 3;

struct SlotState {
    stereotype: Capabilities,
    max_sessions: u32,
    in_use: u32,
}

struct NodeState {
    availability: Availability,
    slots: Vec<SlotState>,
    consecutive_failures: u32,
    last_session_created: Option<Instant>,
}

impl NodeState {
    fn apply(&mut self, status: &NodeStatus) {
        // A draining node never leaves that state through a snapshot; its
        // only exit is removal on drain-complete.
        if self.availability != Availability::Draining {
            self.availability = status.availability;
        }
        // The snapshot's per-stereotype active counts are authoritative;
        // in-flight local reservations are reconciled by the node's next
        // status report.
        self.slots = status
            .slots
            .iter()
            .map(|group| SlotState {
                stereotype: group.stereotype.clone(),
                max_sessions: group.max_sessions,
                in_use: group.active.min(group.max_sessions),
            })
            .collect();
        self.consecutive_failures = 0;
    }

    fn load(&self) -> f64 {
        let max: u32 = self.slots.iter().map(|s| s.max_sessions).sum();
        if max == 0 {
            return 0.0;
        }
        let in_use: u32 = self.slots.iter().map(|s| s.in_use).sum();
        f64::from(in_use) / f64::from(max)
    }
}

/// Ordering key read atomically per candidate: `(load, last session
/// created — never-created first, id)`.
pub struct SelectionKey {
    pub load: f64,
    pub last_session_created: Option<Instant>,
    pub id: NodeId,
}

impl SelectionKey {
    pub fn cmp(&self, other: &Self) -> Ordering {
        self.load
            .total_cmp(&other.load)
            .then_with(|| self.last_session_created.cmp(&other.last_session_created))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// A registered worker node as the distributor sees it.
pub struct NodeHandle {
    id: NodeId,
    uri: String,
    client: Arc<dyn NodeClient>,
    state: Mutex<NodeState>,
}

impl NodeHandle {
    pub fn new(client: Arc<dyn NodeClient>, status: &NodeStatus) -> Self {
        let mut state = NodeState {
            availability: status.availability,
            slots: Vec::new(),
            consecutive_failures: 0,
            last_session_created: None,
        };
        state.apply(status);
        Self {
            id: status.node_id,
            uri: status.uri.clone(),
            client,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn availability(&self) -> Availability {
        self.state().availability
    }

    pub fn load(&self) -> f64 {
        self.state().load()
    }

    pub fn last_session_created(&self) -> Option<Instant> {
        self.state().last_session_created
    }

    /// Snapshot the ordering key in one lock acquisition.
    pub fn selection_key(&self) -> SelectionKey {
        let state = self.state();
        SelectionKey {
            load: state.load(),
            last_session_created: state.last_session_created,
            id: self.id,
        }
    }

    /// Whether any matching stereotype has a free slot.
    pub fn has_capacity(&self, capabilities: &Capabilities) -> bool {
        self.state()
            .slots
            .iter()
            .any(|slot| capabilities.satisfied_by(&slot.stereotype) && slot.in_use < slot.max_sessions)
    }

    /// Distinct browser names across this node's advertised stereotypes.
    pub fn stereotype_browsers(&self) -> BTreeSet<String> {
        self.state()
            .slots
            .iter()
            .map(|slot| slot.stereotype.browser_name().to_string())
            .collect()
    }

    /// Atomically claim a free slot for the capabilities. The returned
    /// reservation performs the actual remote creation when finalized; a
    /// failed creation releases the slot.
    pub fn reserve(self: &Arc<Self>, capabilities: &Capabilities) -> GridResult<Reservation> {
        let mut state = self.state();
        if state.availability != Availability::Up {
            return Err(GridError::SessionNotCreated(format!(
                "node {} is not accepting sessions",
                self.id
            )));
        }
        let slot = state
            .slots
            .iter()
            .position(|slot| {
                capabilities.satisfied_by(&slot.stereotype) && slot.in_use < slot.max_sessions
            })
            .ok_or_else(|| {
                GridError::SessionNotCreated(format!(
                    "node {} has no free slot matching {capabilities}",
                    self.id
                ))
            })?;
        state.slots[slot].in_use += 1;
        debug!(node_id = %self.id, slot, "slot reserved");
        Ok(Reservation {
            node: self.clone(),
            slot,
            capabilities: capabilities.clone(),
        })
    }

    pub(crate) fn release(&self, slot: usize) {
        let mut state = self.state();
        if let Some(slot) = state.slots.get_mut(slot) {
            slot.in_use = slot.in_use.saturating_sub(1);
        }
    }

    fn mark_session_created(&self) {
        self.state().last_session_created = Some(Instant::now());
    }

    /// Recompute load, counters, and availability from a fresh snapshot.
    pub fn update(&self, status: &NodeStatus) {
        let mut state = self.state();
        state.apply(status);
        debug!(node_id = %self.id, availability = ?status.availability, "node state refreshed");
    }

    /// Probe the node. A good snapshot feeds [`NodeHandle::update`];
    /// failures beyond the threshold mark the node down.
    pub async fn run_health_check(&self) {
        match self.client.status().await {
            Ok(status) => self.update(&status),
            Err(e) => {
                debug!(node_id = %self.id, error = %e, "health check failed");
                self.record_probe_failure();
            }
        }
    }

    pub(crate) fn record_probe_failure(&self) {
        let mut state = self.state();
        state.consecutive_failures += 1;
        // Health checks only move a node up → down; a draining node keeps
        // its state until drain-complete removes it.
        if state.consecutive_failures >= UNHEALTHY_THRESHOLD
            && state.availability == Availability::Up
        {
            warn!(
                node_id = %self.id,
                failures = state.consecutive_failures,
                "node marked down"
            );
            state.availability = Availability::Down;
        }
    }

    /// Immutable projection for status dumps.
    pub fn as_summary(&self) -> NodeSummary {
        let state = self.state();
        NodeSummary {
            node_id: self.id,
            uri: self.uri.clone(),
            availability: state.availability,
            load: state.load(),
            slots: state
                .slots
                .iter()
                .map(|slot| SlotSummary {
                    stereotype: slot.stereotype.clone(),
                    max_sessions: slot.max_sessions,
                    in_use: slot.in_use,
                })
                .collect(),
        }
    }
}

/// A claimed slot whose remote session creation is still pending.
pub struct Reservation {
    pub(crate) node: Arc<NodeHandle>,
    pub(crate) slot: usize,
    capabilities: Capabilities,
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("node_id", &self.node.id)
            .field("slot", &self.slot)
            .finish()
    }
}

impl Reservation {
    pub fn node_id(&self) -> NodeId {
        self.node.id
    }

    /// Perform the remote create-session call. Never invoked while the
    /// directory lock is held.
    pub async fn finalize(self) -> GridResult<Session> {
        match self.node.client.create_session(&self.capabilities).await {
            Ok(session) => {
                self.node.mark_session_created();
                Ok(session)
            }
            Err(e) => {
                self.node.release(self.slot);
                Err(GridError::SessionNotCreated(format!(
                    "node {} failed to create session: {e}",
                    self.node.id
                )))
            }
        }
    }
}
