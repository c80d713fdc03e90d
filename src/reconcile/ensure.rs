//! Resource Controller
//!
//! "Ensure exists" for one template: read the live object, create it from
//! the template when absent, leave it alone when present.

use crate::domain::ports::ResourceStore;
use crate::error::Result;
use crate::resources::ManagedResource;
use tracing::{info, warn};

/// What `ensure_resource` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The object already existed; nothing was written
    Found,
    /// The object was missing and has been created
    Created,
}

/// Make sure an object matching the template's identity exists.
///
/// Existing objects are never updated. A read failure other than not-found
/// is returned unchanged and no create is attempted; a create failure is
/// returned unchanged without re-checking the store.
pub async fn ensure_resource(
    store: &dyn ResourceStore,
    template: &ManagedResource,
) -> Result<EnsureOutcome> {
    let kind = template.kind();
    let key = template.key();

    info!(%kind, name = %key.name, namespace = ?key.namespace, "Looking for resource");
    match store.get(kind, &key).await {
        Ok(_) => {
            info!(%kind, name = %key.name, namespace = ?key.namespace, "Found resource");
            Ok(EnsureOutcome::Found)
        }
        Err(e) if e.is_not_found() => {
            info!(%kind, name = %key.name, namespace = ?key.namespace, "Not found, creating resource");
            if let Err(e) = store.create(template).await {
                warn!(%kind, name = %key.name, namespace = ?key.namespace, error = %e, "Couldn't create resource");
                return Err(e);
            }
            Ok(EnsureOutcome::Created)
        }
        Err(e) => {
            warn!(%kind, name = %key.name, namespace = ?key.namespace, error = %e, "Couldn't read resource");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::reconcile::fixtures::templates;
    use crate::resources::ResourceKind;
    use crate::store::{Fault, InMemoryStore, StoreOperation};
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let store = InMemoryStore::new();
        let templates = templates("ns1");

        for template in templates.iter() {
            let first = ensure_resource(&store, template).await.unwrap();
            assert_eq!(first, EnsureOutcome::Created);
            assert_eq!(store.count(template.kind()), 1);

            store.clear_operations();
            let second = ensure_resource(&store, template).await.unwrap();
            assert_eq!(second, EnsureOutcome::Found);
            assert!(store.created_kinds().is_empty());
            assert_eq!(store.count(template.kind()), 1);
        }
    }

    #[tokio::test]
    async fn test_existing_object_left_untouched() {
        let store = InMemoryStore::new();
        let templates = templates("ns1");
        let cm = templates.get(ResourceKind::ConfigMap).unwrap();

        let mut live = cm.clone();
        live.meta_mut().labels = None;
        store.insert(live.clone());

        assert_eq!(
            ensure_resource(&store, cm).await.unwrap(),
            EnsureOutcome::Found
        );
        assert_eq!(store.object(ResourceKind::ConfigMap, &cm.key()), Some(live));
    }

    #[tokio::test]
    async fn test_read_error_skips_create() {
        let store = InMemoryStore::new();
        let templates = templates("ns1");
        let role = templates.get(ResourceKind::ClusterRole).unwrap();
        store.fail_get(ResourceKind::ClusterRole, Fault::Forbidden);

        let err = ensure_resource(&store, role).await.unwrap_err();
        assert_matches!(err, Error::StoreRejected { .. });
        assert_eq!(
            store.operations(),
            vec![StoreOperation::Get {
                kind: ResourceKind::ClusterRole,
                key: role.key(),
            }]
        );
    }

    #[tokio::test]
    async fn test_create_error_surfaced() {
        let store = InMemoryStore::new();
        let templates = templates("ns1");
        let ds = templates.get(ResourceKind::DaemonSet).unwrap();
        store.fail_create(ResourceKind::DaemonSet, Fault::Unavailable);

        let err = ensure_resource(&store, ds).await.unwrap_err();
        assert_matches!(err, Error::StoreUnavailable { .. });
        assert_eq!(store.count(ResourceKind::DaemonSet), 0);
    }
}
