//! # clusterize
//!
//! Join-barrier coordinator for bootstrapping a storage cluster out of a
//! fixed-size pool of freshly provisioned nodes:
//! - Each node registers on first boot (`POST /clusterize`)
//! - Registrations are appended to a shared, versioned join record with
//!   optimistic concurrency; duplicates are no-ops
//! - The registration that fills the record assembles the cluster
//! - Everyone else waits; nodes arriving after that are shut down
//!
//! ## Architecture
//!
//! ```text
//!  node 1   node 2   ...   node N        node N+1
//!    │        │              │              │
//!    ▼        ▼              ▼              ▼
//! ┌────────────────────────────────────────────────┐
//! │ Join Coordinator (stateless, any replica)      │
//! │   conditional append ──► Join State Store      │
//! │   Waiting ─► wait script                       │
//! │   Last    ─► Assembly Planner ─► form script   │
//! │   Overflow ─► shutdown script                  │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! clusterize-coord serve \
//!   --config ./clusterize.toml \
//!   --cluster poc \
//!   --hosts 6 \
//!   --state-dir ./join-state \
//!   --init-state
//! ```
//!
//! ### Register a node
//! ```bash
//! clusterize register --vm "$(instance-name):$(hostname)" | bash
//! ```

#![allow(clippy::result_large_err)]

pub mod cloud;
pub mod common;
pub mod coordinator;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::Coordinator;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
