//! hivegrid-core — shared data model for the hivegrid distributor.
//!
//! Defines the capability/stereotype types exchanged between nodes and the
//! distributor, the node and session records, the grid event bus, the error
//! taxonomy, and the configuration surface.
//!
//! # Architecture
//!
//! ```text
//! hivegrid-core
//!   ├── capabilities (opaque JSON maps + stereotype matching)
//!   ├── data         (NodeStatus, Session, summaries)
//!   ├── events       (GridEvent, EventBus, LocalBus)
//!   ├── error        (GridError taxonomy)
//!   └── config       (grid.toml parsing)
//! ```

pub mod capabilities;
pub mod config;
pub mod data;
pub mod error;
pub mod events;

pub use capabilities::Capabilities;
pub use config::GridConfig;
pub use data::*;
pub use error::{GridError, GridResult};
pub use events::{EventBus, GridEvent, LocalBus};
