//! In-memory session map.
//!
//! A concurrent map under a fair reader/writer lock. A background task
//! subscribed to the bus removes entries when their `SESSION_CLOSED`
//! event arrives.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use hivegrid_core::{EventBus, GridError, GridEvent, GridResult, Session, SessionId};

use crate::SessionMap;

pub struct MemorySessionMap {
    bus: Arc<dyn EventBus>,
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
    /// Bus listener; aborted on close so the map tears down cleanly.
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl MemorySessionMap {
    /// Create the map and subscribe to `SESSION_CLOSED`.
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        let sessions: Arc<RwLock<HashMap<SessionId, Session>>> =
            Arc::new(RwLock::new(HashMap::new()));

        let mut rx = bus.subscribe();
        let listener_sessions = sessions.clone();
        let listener = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(GridEvent::SessionClosed(id)) => {
                        listener_sessions.write().await.remove(&id);
                        debug!(session_id = %id, "session removed on close event");
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "session map listener lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            bus,
            sessions,
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Deregister the bus listener. Idempotent.
    pub fn close(&self) {
        let mut listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = listener.take() {
            handle.abort();
        }
    }
}

impl Drop for MemorySessionMap {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl SessionMap for MemorySessionMap {
    async fn add(&self, session: Session) -> GridResult<bool> {
        self.sessions.write().await.insert(session.id, session);
        Ok(true)
    }

    async fn get(&self, id: &SessionId) -> GridResult<Session> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| GridError::NoSuchSession(id.to_string()))
    }

    async fn remove(&self, id: &SessionId) -> GridResult<()> {
        self.sessions.write().await.remove(id);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.bus.is_ready()
    }
}
