//! In-Memory Store
//!
//! A `ResourceStore` and `DesiredStateSource` backed by process memory.
//! Records every call and supports fault injection per kind. Used by the
//! standalone dry run, the benchmark and the tests.

use crate::crd::NodeFeatureDiscovery;
use crate::domain::ports::{DesiredStateSource, ObjectKey, ResourceStore};
use crate::error::{Error, Result};
use crate::resources::{ManagedResource, ResourceKind};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::trace;

// =============================================================================
// Operations & Faults
// =============================================================================

/// A call made against the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOperation {
    Get { kind: ResourceKind, key: ObjectKey },
    Create { kind: ResourceKind, key: ObjectKey },
}

impl StoreOperation {
    pub fn kind(&self) -> ResourceKind {
        match self {
            StoreOperation::Get { kind, .. } | StoreOperation::Create { kind, .. } => *kind,
        }
    }
}

/// Failure to inject into a store call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Transient failure (network, throttling)
    Unavailable,
    /// Permission denied
    Forbidden,
}

impl Fault {
    fn into_error(self, operation: &str, kind: ResourceKind, key: &ObjectKey) -> Error {
        match self {
            Fault::Unavailable => Error::StoreUnavailable {
                reason: format!("{} {} {}: connection refused", operation, kind, key),
            },
            Fault::Forbidden => Error::StoreRejected {
                operation: operation.to_string(),
                reason: format!("{} {} is forbidden", kind, key),
            },
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<(ResourceKind, ObjectKey), ManagedResource>,
    specs: BTreeMap<ObjectKey, NodeFeatureDiscovery>,
    operations: Vec<StoreOperation>,
    get_faults: BTreeMap<ResourceKind, Fault>,
    create_faults: BTreeMap<ResourceKind, Fault>,
    next_uid: u64,
}

impl Inner {
    fn allocate_uid(&mut self) -> String {
        self.next_uid += 1;
        format!("00000000-0000-0000-0000-{:012}", self.next_uid)
    }
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// Store of managed objects and specs held in memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without recording an operation
    pub fn insert(&self, resource: ManagedResource) {
        let key = (resource.kind(), resource.key());
        self.inner.write().objects.insert(key, resource);
    }

    /// Seed a spec, assigning a uid when it has none
    pub fn insert_spec(&self, mut spec: NodeFeatureDiscovery) -> NodeFeatureDiscovery {
        let mut inner = self.inner.write();
        if spec.metadata.uid.is_none() {
            spec.metadata.uid = Some(inner.allocate_uid());
        }
        let key = ObjectKey {
            namespace: spec.metadata.namespace.clone(),
            name: spec.metadata.name.clone().unwrap_or_default(),
        };
        inner.specs.insert(key, spec.clone());
        spec
    }

    pub fn object(&self, kind: ResourceKind, key: &ObjectKey) -> Option<ManagedResource> {
        self.inner.read().objects.get(&(kind, key.clone())).cloned()
    }

    pub fn objects(&self) -> Vec<ManagedResource> {
        self.inner.read().objects.values().cloned().collect()
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.inner
            .read()
            .objects
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().objects.is_empty()
    }

    pub fn operations(&self) -> Vec<StoreOperation> {
        self.inner.read().operations.clone()
    }

    /// Kinds created so far, in call order
    pub fn created_kinds(&self) -> Vec<ResourceKind> {
        self.inner
            .read()
            .operations
            .iter()
            .filter(|op| matches!(op, StoreOperation::Create { .. }))
            .map(StoreOperation::kind)
            .collect()
    }

    pub fn clear_operations(&self) {
        self.inner.write().operations.clear();
    }

    pub fn fail_get(&self, kind: ResourceKind, fault: Fault) {
        self.inner.write().get_faults.insert(kind, fault);
    }

    pub fn fail_create(&self, kind: ResourceKind, fault: Fault) {
        self.inner.write().create_faults.insert(kind, fault);
    }

    pub fn clear_faults(&self) {
        let mut inner = self.inner.write();
        inner.get_faults.clear();
        inner.create_faults.clear();
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> Result<ManagedResource> {
        let mut inner = self.inner.write();
        inner.operations.push(StoreOperation::Get {
            kind,
            key: key.clone(),
        });
        trace!(%kind, %key, "get");

        if let Some(fault) = inner.get_faults.get(&kind) {
            return Err(fault.into_error("get", kind, key));
        }

        inner
            .objects
            .get(&(kind, key.clone()))
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: kind.to_string(),
                name: key.to_string(),
            })
    }

    async fn create(&self, resource: &ManagedResource) -> Result<()> {
        let kind = resource.kind();
        let key = resource.key();
        let mut inner = self.inner.write();
        inner.operations.push(StoreOperation::Create {
            kind,
            key: key.clone(),
        });
        trace!(%kind, %key, "create");

        if let Some(fault) = inner.create_faults.get(&kind) {
            return Err(fault.into_error("create", kind, &key));
        }
        if inner.objects.contains_key(&(kind, key.clone())) {
            return Err(Error::ResourceExists {
                kind: kind.to_string(),
                name: key.to_string(),
            });
        }

        let mut live = resource.clone();
        let uid = inner.allocate_uid();
        let meta = live.meta_mut();
        meta.uid = Some(uid);
        meta.creation_timestamp = Some(Time(Utc::now()));
        inner.objects.insert((kind, key), live);
        Ok(())
    }
}

#[async_trait]
impl DesiredStateSource for InMemoryStore {
    async fn get_spec(&self, key: &ObjectKey) -> Result<NodeFeatureDiscovery> {
        self.inner
            .read()
            .specs
            .get(key)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "NodeFeatureDiscovery".to_string(),
                name: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::fixtures::{owner, templates};
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .get(ResourceKind::ConfigMap, &ObjectKey::namespaced("ns1", "nfd-worker"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.operations().len(), 1);
    }

    #[tokio::test]
    async fn test_create_stamps_metadata_and_conflicts() {
        let store = InMemoryStore::new();
        let templates = templates("ns1");
        let sa = templates.get(ResourceKind::ServiceAccount).unwrap();

        store.create(sa).await.unwrap();
        let live = store.get(ResourceKind::ServiceAccount, &sa.key()).await.unwrap();
        assert!(live.meta().uid.is_some());
        assert!(live.meta().creation_timestamp.is_some());

        let err = store.create(sa).await.unwrap_err();
        assert_matches!(err, Error::ResourceExists { .. });
        assert_eq!(store.count(ResourceKind::ServiceAccount), 1);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let store = InMemoryStore::new();
        let templates = templates("ns1");
        let role = templates.get(ResourceKind::ClusterRole).unwrap();

        store.fail_create(ResourceKind::ClusterRole, Fault::Unavailable);
        assert_matches!(
            store.create(role).await,
            Err(Error::StoreUnavailable { .. })
        );

        store.fail_get(ResourceKind::ClusterRole, Fault::Forbidden);
        assert_matches!(
            store.get(ResourceKind::ClusterRole, &role.key()).await,
            Err(Error::StoreRejected { .. })
        );

        store.clear_faults();
        store.create(role).await.unwrap();
        assert_eq!(store.created_kinds().len(), 2);
    }

    #[tokio::test]
    async fn test_spec_lookup() {
        let store = InMemoryStore::new();
        let mut spec = owner("nfd", "ns1");
        spec.metadata.uid = None;
        let stored = store.insert_spec(spec);
        assert!(stored.metadata.uid.is_some());

        let found = store
            .get_spec(&ObjectKey::namespaced("ns1", "nfd"))
            .await
            .unwrap();
        assert_eq!(found, stored);

        let err = store
            .get_spec(&ObjectKey::namespaced("ns1", "missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
