//! Resource Store Adapters
//!
//! - KubeStore: the cluster API through `kube::Client`
//! - InMemoryStore: process memory, with operation log and fault injection

pub mod cluster;
pub mod memory;

pub use cluster::*;
pub use memory::*;
