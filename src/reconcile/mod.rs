//! Reconciliation Core
//!
//! Drives the cluster toward one NodeFeatureDiscovery by running an ordered
//! pipeline of steps: bind ownership on the templates, then ensure each
//! managed object exists.

pub mod ensure;
pub mod ownership;
pub mod pipeline;
pub mod reconciler;
pub mod stages;

pub use ensure::*;
pub use ownership::*;
pub use pipeline::*;
pub use reconciler::*;
pub use stages::*;
