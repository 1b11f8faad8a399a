//! hivegrid-distributor — node directory and session scheduling.
//!
//! The distributor accepts new-session requests, ranks the registered
//! worker nodes under a load- and scarcity-aware policy, reserves capacity
//! on the winner, and records the resulting session in the session map.
//!
//! # Architecture
//!
//! ```text
//! Distributor
//!   ├── hosts: RwLock<Vec<Arc<NodeHandle>>>   (fair directory lock)
//!   ├── selector (rarity prefilter + load/age/id ordering)
//!   ├── HealthChecker (one recurring probe task per node)
//!   ├── SessionMap (confirmed sessions)
//!   └── EventBus bindings (node-status, drain-complete)
//! ```

pub mod client;
pub mod distributor;
pub mod health;
pub mod node;
pub mod selector;

pub use client::{HttpClientFactory, HttpNodeClient, NodeClient, NodeClientFactory};
pub use distributor::Distributor;
pub use health::HealthChecker;
pub use node::{NodeHandle, Reservation};
pub use selector::prioritize;
