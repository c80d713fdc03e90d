//! Domain Ports - Core trait definitions for the NFD operator
//!
//! These traits define the boundary between the reconciliation core and the
//! cluster API. Adapters implement them against a real cluster or in memory.

use crate::crd::NodeFeatureDiscovery;
use crate::error::Result;
use crate::resources::{ManagedResource, ResourceKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Object Key
// =============================================================================

/// Namespace + name of an object; cluster-scoped objects have no namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

// =============================================================================
// Resource Store Port
// =============================================================================

/// Port for reading and creating managed objects in the cluster
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Read the live object of `kind` at `key`.
    ///
    /// Absence is reported as an error for which
    /// [`Error::is_not_found`](crate::error::Error::is_not_found) is true.
    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> Result<ManagedResource>;

    /// Create `resource`; an existing object with the same identity is a
    /// conflict error
    async fn create(&self, resource: &ManagedResource) -> Result<()>;
}

// =============================================================================
// Desired State Source Port
// =============================================================================

/// Port for resolving a spec identity to its NodeFeatureDiscovery object
#[async_trait]
pub trait DesiredStateSource: Send + Sync {
    async fn get_spec(&self, key: &ObjectKey) -> Result<NodeFeatureDiscovery>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ResourceStoreRef = Arc<dyn ResourceStore>;
pub type DesiredStateSourceRef = Arc<dyn DesiredStateSource>;
