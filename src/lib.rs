//! # ringkv
//!
//! A peer-to-peer key/value store on a consistent-hashing ring:
//! - Node identifiers and keys share a `2^m` identifier space (SHA-256)
//! - Every key lives on its owner plus the owner's two ring neighbours
//! - Heartbeat monitors detect crashed peers and repair the ring
//! - The leader (highest id) rebalances keys after joins and failures
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────┐
//!      ┌────►│ vm-1: 10 │─────┐
//!      │     └──────────┘     │ successor
//! ┌────┴─────┐           ┌────▼─────┐
//! │ vm-3: 90 │◄──────────│ vm-2: 50 │
//! └──────────┘           └──────────┘
//!   leader        key 30 → {50, 10, 90}
//! ```
//!
//! Peers talk through the [`transport::RingPeer`] interface, either over
//! JSON/HTTP ([`transport::http`]) or in-process ([`transport::memory`]).
//!
//! ## Usage
//!
//! ```bash
//! # res/address.txt lists "<host> <id>" for every node
//! ringkv-node --id 1 --address-file res/address.txt
//! ringkv-node --id 2 --address-file res/address.txt --heartbeat-interval 250ms
//! ```
//!
//! Then type `SET k v`, `GET k`, `OWNERS k`, `LIST_LOCAL` or `EXIT` on stdin.

pub mod common;
pub mod console;
pub mod node;
pub mod transport;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use node::Node;
pub use transport::PeerInfo;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
