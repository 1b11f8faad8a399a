//! The distributor — owns the node directory and serializes registration,
//! removal, and selection.
//!
//! A single fair reader/writer lock protects the directory. Selection and
//! reservation happen under the write lock; the remote create-session call
//! and all event publishing happen after it is released. Bus handlers log
//! and swallow failures, never propagate them.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument, Span};

use hivegrid_core::{
    Availability, DistributorStatus, EventBus, GridError, GridEvent, GridResult,
    NewSessionRequest, NodeId, NodeStatus, Session,
};
use hivegrid_sessionmap::SessionMap;

use crate::client::{NodeClient, NodeClientFactory};
use crate::health::HealthChecker;
use crate::node::NodeHandle;
use crate::selector::prioritize;

pub struct Distributor {
    bus: Arc<dyn EventBus>,
    sessions: Arc<dyn SessionMap>,
    clients: Arc<dyn NodeClientFactory>,
    health: HealthChecker,
    hosts: RwLock<Vec<Arc<NodeHandle>>>,
    registration_secret: Option<String>,
}

impl Distributor {
    pub fn new(
        bus: Arc<dyn EventBus>,
        sessions: Arc<dyn SessionMap>,
        clients: Arc<dyn NodeClientFactory>,
        registration_secret: Option<String>,
    ) -> Self {
        Self {
            bus,
            sessions,
            clients,
            health: HealthChecker::new(),
            hosts: RwLock::new(Vec::new()),
            registration_secret,
        }
    }

    /// Replace the health checker (for tests that shorten the interval).
    pub fn with_health_checker(mut self, health: HealthChecker) -> Self {
        self.health = health;
        self
    }

    /// Subscribe to node lifecycle events. Returns the dispatch task.
    pub fn spawn_bus_bindings(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        let distributor = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(GridEvent::NodeStatus(status)) => {
                        distributor.on_node_status(status).await;
                    }
                    Ok(GridEvent::NodeDrainComplete(node_id)) => {
                        info!(%node_id, "drain complete");
                        distributor.remove(node_id).await;
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "distributor bus listener lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Serve a new-session request: pick a node, reserve a slot, create
    /// the session remotely, and record it in the session map.
    pub async fn new_session(&self, request: &NewSessionRequest) -> GridResult<Session> {
        let span = info_span!("distributor.new_session", error = tracing::field::Empty);
        traced(span, self.do_new_session(request)).await
    }

    async fn do_new_session(&self, request: &NewSessionRequest) -> GridResult<Session> {
        // Only the first capability set is served; the alternatives appear
        // in the failure message but are not tried.
        let Some(first) = request.capabilities.first() else {
            return Err(GridError::SessionNotCreated(
                "no capabilities found".to_string(),
            ));
        };

        let reservation = {
            let hosts = self.hosts.write().await;
            let candidates: Vec<&Arc<NodeHandle>> = hosts
                .iter()
                .filter(|host| {
                    host.availability() == Availability::Up && host.has_capacity(first)
                })
                .collect();

            let keyed: Vec<(usize, BTreeSet<String>)> = candidates
                .iter()
                .enumerate()
                .map(|(index, host)| (index, host.stereotype_browsers()))
                .collect();

            let winner = prioritize(&keyed, first.browser_name())
                .into_iter()
                .map(|index| {
                    let host = candidates[index];
                    (host.selection_key(), host)
                })
                .min_by(|(a, _), (b, _)| a.cmp(b))
                .map(|(_, host)| host.clone());

            match winner {
                Some(host) => host.reserve(first)?,
                None => {
                    return Err(GridError::SessionNotCreated(format!(
                        "unable to find provider for session: {}",
                        request.describe()
                    )))
                }
            }
            // Directory lock released here; the remote call happens outside it.
        };

        let node_id = reservation.node_id();
        let node = reservation.node.clone();
        let slot = reservation.slot;
        let session = reservation.finalize().await?;

        if let Err(e) = self.sessions.add(session.clone()).await {
            // The session lives on its node but is unreachable through the
            // map; release the local slot and leave the orphan to the
            // node's own session timeout. The node's next status snapshot
            // re-asserts the true occupancy either way.
            node.release(slot);
            warn!(
                session_id = %session.id,
                %node_id,
                error = %e,
                "session created but not recorded, orphaned on its node"
            );
            return Err(GridError::Storage(format!(
                "unable to store session {}: {e}",
                session.id
            )));
        }

        info!(session_id = %session.id, %node_id, "session created");
        Ok(session)
    }

    /// Handle a status snapshot from the bus: verify the registration
    /// secret, then update, replace, or add the node.
    async fn on_node_status(&self, status: NodeStatus) {
        if status.registration_secret != self.registration_secret {
            warn!(uri = %status.uri, "node sent wrong registration secret, not registered");
            self.bus.fire(GridEvent::NodeRejected(status.uri));
            return;
        }
        if let Err(e) = self.add(status).await {
            warn!(error = %e, "unable to process node status");
        }
    }

    /// Register a node programmatically. Equivalent to receiving a valid
    /// status for it.
    pub async fn add(&self, status: NodeStatus) -> GridResult<()> {
        let client = self.clients.client_for(&status.uri)?;
        self.add_with_client(client, status).await;
        Ok(())
    }

    /// Register a node with an explicit client.
    pub async fn add_with_client(&self, client: Arc<dyn NodeClient>, status: NodeStatus) {
        let span = info_span!("distributor.add", node_id = %status.node_id);

        async {
            let (replaced, added) = {
                let mut hosts = self.hosts.write().await;

                let known = hosts.iter().position(|h| h.id() == status.node_id);
                if let Some(pos) = known {
                    hosts[pos].update(&status);
                    (None, None)
                } else {
                    // A known uri under a different id is a node restart:
                    // drop the stale entry before adding the new one.
                    let replaced = hosts
                        .iter()
                        .position(|h| h.uri() == status.uri)
                        .map(|pos| hosts.remove(pos).id());

                    let node = Arc::new(NodeHandle::new(client, &status));
                    hosts.push(node.clone());
                    (replaced, Some(node))
                }
            };

            // Events fire after the lock is released; observers may see the
            // directory change before the event.
            if let Some(old_id) = replaced {
                info!(node_id = %old_id, "node re-registered with a new id, old entry removed");
                self.health.deregister(&old_id).await;
                self.bus.fire(GridEvent::NodeRemoved(old_id));
            }
            if let Some(node) = added {
                info!(node_id = %node.id(), uri = %node.uri(), "node added");
                self.health.register(node.clone()).await;
                self.bus.fire(GridEvent::NodeAdded(node.id()));
            }
        }
        .instrument(span)
        .await;
    }

    /// Drop a node from the directory, cancel its health check, and fire
    /// `NODE_REMOVED`. Returns whether the node was present.
    pub async fn remove(&self, node_id: NodeId) -> bool {
        let span = info_span!("distributor.remove", %node_id);

        async {
            let existed = {
                let mut hosts = self.hosts.write().await;
                match hosts.iter().position(|h| h.id() == node_id) {
                    Some(pos) => {
                        hosts.remove(pos);
                        true
                    }
                    None => false,
                }
            };

            self.health.deregister(&node_id).await;
            if existed {
                info!(%node_id, "node removed");
            }
            self.bus.fire(GridEvent::NodeRemoved(node_id));
            existed
        }
        .instrument(span)
        .await
    }

    /// Snapshot of node summaries.
    pub async fn status(&self) -> DistributorStatus {
        let hosts = self.hosts.read().await;
        DistributorStatus {
            nodes: hosts.iter().map(|h| h.as_summary()).collect(),
        }
    }

    /// Trigger an immediate health check on every node.
    pub async fn refresh(&self) {
        self.health.run_all_now().await;
    }

    pub fn is_ready(&self) -> bool {
        self.bus.is_ready() && self.sessions.is_ready()
    }

    pub async fn host_count(&self) -> usize {
        self.hosts.read().await.len()
    }

    /// Stop background work (for shutdown).
    pub async fn shutdown(&self) {
        self.health.stop_all().await;
    }
}

/// Run an operation inside its span, marking the span on failure.
async fn traced<T>(span: Span, fut: impl Future<Output = GridResult<T>>) -> GridResult<T> {
    let result = fut.instrument(span.clone()).await;
    if let Err(e) = &result {
        span.record("error", true);
        span.in_scope(|| warn!(message = %e, "operation failed"));
    }
    result
}
