//! Common utilities and types shared across ringkv

pub mod config;
pub mod error;
pub mod hash;
pub mod utils;

pub use config::{Config, RepairStrategy};
pub use error::{Error, Result};
pub use hash::{hash_key, is_between, ring_space, NodeId};
pub use utils::{load_address_list, node_name, node_port, parse_duration, BootstrapEntry};
