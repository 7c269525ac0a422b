//! Ring member implementation
//!
//! A node is responsible for:
//! - Its slice of the ring (successor / predecessor references)
//! - Membership tracking and key routing
//! - Local storage of the keys it replicates
//! - Heartbeat monitors on every other member, and ring repair
//! - Join / leave and leader-driven rebalancing

pub mod assembler;
pub mod heartbeat;
pub mod rebalance;
pub mod server;
pub mod state;
pub mod store;

pub use rebalance::{RebalanceReport, ReconcileReport};
pub use server::Node;
pub use state::{NodePhase, NodeRecord};
pub use store::Placement;
