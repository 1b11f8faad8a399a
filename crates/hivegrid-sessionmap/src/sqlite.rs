//! Relational session map over SQLite.
//!
//! One table, three parameterized statement shapes:
//!
//! ```text
//! CREATE TABLE sessions_map (
//!   session_ids  TEXT PRIMARY KEY,
//!   session_uri  TEXT NOT NULL,
//!   session_caps TEXT NULL        -- JSON
//! );
//! ```
//!
//! `add` is an upsert so a restarted distributor can re-record a session
//! without tripping the primary key. `remove` of a missing id is not an
//! error, keeping bus-driven removal idempotent.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task::JoinHandle;
use tracing::{debug, debug_span, warn};

use hivegrid_core::{
    Capabilities, EventBus, GridError, GridEvent, GridResult, Session, SessionId,
};

use crate::SessionMap;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS sessions_map (
  session_ids  TEXT PRIMARY KEY,
  session_uri  TEXT NOT NULL,
  session_caps TEXT NULL
)";

const INSERT: &str = "INSERT INTO sessions_map (session_ids, session_uri, session_caps) \
     VALUES (?1, ?2, ?3) \
     ON CONFLICT(session_ids) DO UPDATE SET \
       session_uri = excluded.session_uri, \
       session_caps = excluded.session_caps";

const SELECT: &str =
    "SELECT session_uri, session_caps FROM sessions_map WHERE session_ids = ?1 LIMIT 1";

const DELETE: &str = "DELETE FROM sessions_map WHERE session_ids = ?1";

type SharedConnection = Arc<Mutex<Option<Connection>>>;

pub struct SqliteSessionMap {
    conn: SharedConnection,
    /// Bus listener; aborted on close so the map tears down cleanly.
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SqliteSessionMap {
    /// Open (or create) the backing database. The connection string is a
    /// filesystem path or `":memory:"`.
    pub fn open(connection: &str, bus: Arc<dyn EventBus>) -> GridResult<Self> {
        let conn = if connection == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(connection)
        }
        .map_err(|e| GridError::Config(format!("unable to open {connection}: {e}")))?;

        conn.execute(CREATE_TABLE, [])
            .map_err(|e| GridError::Config(format!("unable to create sessions_map: {e}")))?;

        let conn: SharedConnection = Arc::new(Mutex::new(Some(conn)));

        let mut rx = bus.subscribe();
        let listener_conn = conn.clone();
        let listener = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(GridEvent::SessionClosed(id)) => {
                        if let Err(e) = delete_row(&listener_conn, &id) {
                            warn!(session_id = %id, error = %e, "failed to remove closed session");
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "session map listener lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        debug!(connection, "sqlite session map opened");
        Ok(Self {
            conn,
            listener: Mutex::new(Some(listener)),
        })
    }

    /// Deregister the bus listener and release the connection. Idempotent.
    pub fn close(&self) {
        let mut listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = listener.take() {
            handle.abort();
        }
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Drop for SqliteSessionMap {
    fn drop(&mut self) {
        self.close();
    }
}

fn delete_row(conn: &SharedConnection, id: &SessionId) -> GridResult<()> {
    let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
    let conn = guard
        .as_ref()
        .ok_or_else(|| GridError::Storage("connection closed".to_string()))?;
    conn.execute(DELETE, params![id.to_string()])
        .map_err(|e| GridError::Storage(e.to_string()))?;
    Ok(())
}

#[async_trait]
impl SessionMap for SqliteSessionMap {
    async fn add(&self, session: Session) -> GridResult<bool> {
        let _span = debug_span!("sessionmap.add", session_id = %session.id).entered();

        let caps = serde_json::to_string(&session.capabilities)
            .map_err(|e| GridError::Storage(e.to_string()))?;

        let guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = guard
            .as_ref()
            .ok_or_else(|| GridError::Storage("connection closed".to_string()))?;
        let rows = conn
            .execute(INSERT, params![session.id.to_string(), session.uri, caps])
            .map_err(|e| GridError::Storage(e.to_string()))?;
        Ok(rows >= 1)
    }

    async fn get(&self, id: &SessionId) -> GridResult<Session> {
        let _span = debug_span!("sessionmap.get", session_id = %id).entered();

        let row: Option<(String, Option<String>)> = {
            let guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            let conn = guard
                .as_ref()
                .ok_or_else(|| GridError::Storage("connection closed".to_string()))?;
            conn.query_row(SELECT, params![id.to_string()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()
            .map_err(|e| GridError::Storage(e.to_string()))?
        };

        let (raw_uri, raw_caps) =
            row.ok_or_else(|| GridError::NoSuchSession(id.to_string()))?;

        // A row whose uri no longer parses is unusable; report the raw
        // string so the operator can find the bad record.
        if raw_uri.parse::<http::Uri>().is_err() {
            return Err(GridError::NoSuchSession(format!(
                "unable to convert stored uri for session {id}: {raw_uri}"
            )));
        }

        let capabilities = match raw_caps {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| GridError::Storage(e.to_string()))?,
            None => Capabilities::new(),
        };

        Ok(Session {
            id: *id,
            uri: raw_uri,
            capabilities,
        })
    }

    async fn remove(&self, id: &SessionId) -> GridResult<()> {
        let _span = debug_span!("sessionmap.remove", session_id = %id).entered();
        delete_row(&self.conn, id)
    }

    fn is_ready(&self) -> bool {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivegrid_core::LocalBus;
    use std::time::Duration;

    fn test_map() -> (Arc<LocalBus>, SqliteSessionMap) {
        let bus = Arc::new(LocalBus::new());
        let map = SqliteSessionMap::open(":memory:", bus.clone()).unwrap();
        (bus, map)
    }

    fn test_session() -> Session {
        Session {
            id: SessionId::random(),
            uri: "http://10.0.0.7:5555".to_string(),
            capabilities: Capabilities::browser("chrome"),
        }
    }

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let (_bus, map) = test_map();
        let session = test_session();

        assert!(map.add(session.clone()).await.unwrap());
        assert_eq!(map.get(&session.id).await.unwrap(), session);
    }

    #[tokio::test]
    async fn get_missing_fails_with_no_such_session() {
        let (_bus, map) = test_map();
        let err = map.get(&SessionId::random()).await.unwrap_err();
        assert!(matches!(err, GridError::NoSuchSession(_)));
    }

    #[tokio::test]
    async fn duplicate_add_upserts() {
        let (_bus, map) = test_map();
        let mut session = test_session();
        assert!(map.add(session.clone()).await.unwrap());

        session.uri = "http://10.0.0.8:5555".to_string();
        assert!(map.add(session.clone()).await.unwrap());
        assert_eq!(map.get(&session.id).await.unwrap().uri, session.uri);
    }

    #[tokio::test]
    async fn remove_missing_is_not_an_error() {
        let (_bus, map) = test_map();
        map.remove(&SessionId::random()).await.unwrap();
    }

    #[tokio::test]
    async fn unicode_and_quoted_capabilities_round_trip() {
        let (_bus, map) = test_map();
        let session = Session {
            id: SessionId::random(),
            uri: "http://10.0.0.7:5555".to_string(),
            capabilities: Capabilities::browser("chrome")
                .with("se:name", "suite \"smoke\" — ürün テスト")
                .with("se:emoji", "🦀"),
        };

        map.add(session.clone()).await.unwrap();
        assert_eq!(map.get(&session.id).await.unwrap(), session);
    }

    #[tokio::test]
    async fn null_capabilities_decode_as_empty() {
        let (_bus, map) = test_map();
        let id = SessionId::random();
        {
            let guard = map.conn.lock().unwrap();
            let conn = guard.as_ref().unwrap();
            conn.execute(
                "INSERT INTO sessions_map (session_ids, session_uri, session_caps) \
                 VALUES (?1, ?2, NULL)",
                params![id.to_string(), "http://10.0.0.7:5555"],
            )
            .unwrap();
        }

        let session = map.get(&id).await.unwrap();
        assert!(session.capabilities.is_empty());
    }

    #[tokio::test]
    async fn unparseable_uri_surfaces_raw_string() {
        let (_bus, map) = test_map();
        let id = SessionId::random();
        {
            let guard = map.conn.lock().unwrap();
            let conn = guard.as_ref().unwrap();
            conn.execute(
                "INSERT INTO sessions_map (session_ids, session_uri, session_caps) \
                 VALUES (?1, ?2, NULL)",
                params![id.to_string(), "http://exa mple:nope"],
            )
            .unwrap();
        }

        let err = map.get(&id).await.unwrap_err();
        match err {
            GridError::NoSuchSession(msg) => assert!(msg.contains("http://exa mple:nope")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn session_closed_event_removes_row() {
        let (bus, map) = test_map();
        let session = test_session();
        map.add(session.clone()).await.unwrap();

        bus.fire(GridEvent::SessionClosed(session.id));

        for _ in 0..50 {
            if map.get(&session.id).await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session row was not removed after close event");
    }

    #[tokio::test]
    async fn close_releases_the_connection() {
        let (_bus, map) = test_map();
        assert!(map.is_ready());

        map.close();
        assert!(!map.is_ready());

        let err = map.add(test_session()).await.unwrap_err();
        assert!(matches!(err, GridError::Storage(_)));
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        let path = path.to_str().unwrap();
        let session = test_session();

        {
            let bus = Arc::new(LocalBus::new());
            let map = SqliteSessionMap::open(path, bus).unwrap();
            map.add(session.clone()).await.unwrap();
            map.close();
        }

        let bus = Arc::new(LocalBus::new());
        let map = SqliteSessionMap::open(path, bus).unwrap();
        assert_eq!(map.get(&session.id).await.unwrap(), session);
    }
}
