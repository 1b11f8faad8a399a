//! hivegrid-sessionmap — session id → session record lookup.
//!
//! The distributor writes a record here after every confirmed reservation;
//! other grid components query it to route traffic to the owning node.
//! Removal is driven by `SESSION_CLOSED` events, never by the distributor
//! as part of successful creation.
//!
//! Two backends ship in-tree: an in-memory map and a SQLite-backed
//! relational table. Both register a bus listener at construction and must
//! be closed for clean teardown.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use hivegrid_core::{GridResult, Session, SessionId};

pub use memory::MemorySessionMap;
pub use sqlite::SqliteSessionMap;

/// Storage seam for the session registry.
#[async_trait]
pub trait SessionMap: Send + Sync {
    /// Insert or replace a session record. Returns whether the write took
    /// effect (true on both backends, by convention). Backend I/O failures
    /// surface as [`hivegrid_core::GridError::Storage`].
    async fn add(&self, session: Session) -> GridResult<bool>;

    /// Look up a session, failing with
    /// [`hivegrid_core::GridError::NoSuchSession`] on a miss.
    async fn get(&self, id: &SessionId) -> GridResult<Session>;

    /// Remove a session. Idempotent; absent ids are not an error.
    async fn remove(&self, id: &SessionId) -> GridResult<()>;

    fn is_ready(&self) -> bool;
}
