//! Custom Resource Definitions for the NFD operator
//!
//! - NodeFeatureDiscovery: desired state for one NFD operand deployment

pub mod node_feature_discovery;

pub use node_feature_discovery::*;
