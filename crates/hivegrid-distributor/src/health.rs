//! Health checker — one recurring probe task per registered node.
//!
//! Tasks are registered when a node joins the directory and deregistered
//! when it leaves. A probe touches only its own node handle; the
//! distributor's directory lock is never held while probing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hivegrid_core::NodeId;

use crate::node::NodeHandle;

/// Time between probes of a node.
const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Hard deadline for a single probe.
const CHECK_DEADLINE: Duration = Duration::from_secs(300);

/// Per-node checker state.
struct CheckSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    node: Arc<NodeHandle>,
}

/// Schedules recurring health checks for every registered node.
pub struct HealthChecker {
    checks: Arc<RwLock<HashMap<NodeId, CheckSlot>>>,
    interval: Duration,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            checks: Arc::new(RwLock::new(HashMap::new())),
            interval: CHECK_INTERVAL,
        }
    }

    /// Override the probe interval (for testing).
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start the recurring check for a node. Replaces any existing task
    /// for the same id.
    pub async fn register(&self, node: Arc<NodeHandle>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interval = self.interval;
        let task_node = node.clone();
        let handle = tokio::spawn(async move {
            run_check_loop(task_node, interval, shutdown_rx).await;
        });

        let mut checks = self.checks.write().await;
        if let Some(old) = checks.insert(
            node.id(),
            CheckSlot {
                handle,
                shutdown_tx,
                node: node.clone(),
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }
        debug!(node_id = %node.id(), "health check scheduled");
    }

    /// Stop and drop the check for a node. Idempotent.
    pub async fn deregister(&self, node_id: &NodeId) {
        let mut checks = self.checks.write().await;
        if let Some(slot) = checks.remove(node_id) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(%node_id, "health check cancelled");
        }
    }

    /// Probe every registered node immediately, off the caller's task.
    pub async fn run_all_now(&self) {
        let nodes: Vec<Arc<NodeHandle>> = {
            let checks = self.checks.read().await;
            checks.values().map(|slot| slot.node.clone()).collect()
        };
        for node in nodes {
            tokio::spawn(async move {
                probe_once(&node).await;
            });
        }
    }

    /// Stop every check task (for shutdown).
    pub async fn stop_all(&self) {
        let mut checks = self.checks.write().await;
        for (node_id, slot) in checks.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(%node_id, "health check cancelled");
        }
        info!("all health checks stopped");
    }

    pub async fn is_registered(&self, node_id: &NodeId) -> bool {
        self.checks.read().await.contains_key(node_id)
    }

    pub async fn registered_count(&self) -> usize {
        self.checks.read().await.len()
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_check_loop(
    node: Arc<NodeHandle>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                probe_once(&node).await;
            }
            _ = shutdown.changed() => {
                debug!(node_id = %node.id(), "check loop shutting down");
                break;
            }
        }
    }
}

/// One probe, bounded by the hard deadline. Idempotent: a timed-out or
/// failed probe only bumps the node's failure streak.
async fn probe_once(node: &Arc<NodeHandle>) {
    if tokio::time::timeout(CHECK_DEADLINE, node.run_health_check())
        .await
        .is_err()
    {
        warn!(node_id = %node.id(), "health check exceeded deadline");
        node.record_probe_failure();
    }
}
