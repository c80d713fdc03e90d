//! Kubernetes Store
//!
//! `ResourceStore` and `DesiredStateSource` over a `kube::Client`. Typed
//! `Api<K>` for k8s-openapi kinds, `Api<DynamicObject>` for OpenShift
//! SecurityContextConstraints.

use crate::crd::NodeFeatureDiscovery;
use crate::domain::ports::{DesiredStateSource, ObjectKey, ResourceStore};
use crate::error::{Error, Result};
use crate::resources::{security_context_constraints_resource, ManagedResource, ResourceKind};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, PostParams};
use kube::core::{ApiResource, DynamicObject};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

/// Map an API failure onto the store error taxonomy
fn map_api_error(err: kube::Error, operation: &str, kind: &str, key: &ObjectKey) -> Error {
    match err {
        kube::Error::Api(response) if response.code == 404 => Error::ResourceNotFound {
            kind: kind.to_string(),
            name: key.to_string(),
        },
        kube::Error::Api(response) if response.code == 409 => Error::ResourceExists {
            kind: kind.to_string(),
            name: key.to_string(),
        },
        kube::Error::Api(response) if response.code == 401 || response.code == 403 => {
            Error::StoreRejected {
                operation: format!("{} {} {}", operation, kind, key),
                reason: response.message,
            }
        }
        other => Error::Kube(other),
    }
}

/// Store backed by the cluster API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    scc: ApiResource,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            scc: security_context_constraints_resource(),
        }
    }

    fn namespaced<K>(&self, key: &ObjectKey) -> Result<Api<K>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        let namespace = key.namespace.as_deref().ok_or_else(|| {
            Error::Configuration(format!("{} has no namespace", key.name))
        })?;
        Ok(Api::namespaced(self.client.clone(), namespace))
    }

    fn cluster<K>(&self) -> Api<K>
    where
        K: Resource<DynamicType = ()>,
    {
        Api::all(self.client.clone())
    }

    fn scc_api(&self) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &self.scc)
    }
}

async fn fetch<K>(api: Api<K>, kind: ResourceKind, key: &ObjectKey) -> Result<K>
where
    K: Clone + DeserializeOwned + Debug,
{
    api.get(&key.name)
        .await
        .map_err(|e| map_api_error(e, "get", kind.kind(), key))
}

async fn post<K>(api: Api<K>, object: &K, kind: ResourceKind, key: &ObjectKey) -> Result<()>
where
    K: Clone + DeserializeOwned + Debug + serde::Serialize,
{
    api.create(&PostParams::default(), object)
        .await
        .map(|_| ())
        .map_err(|e| map_api_error(e, "create", kind.kind(), key))
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> Result<ManagedResource> {
        debug!(%kind, %key, "GET");
        let resource = match kind {
            ResourceKind::ServiceAccount => ManagedResource::ServiceAccount(
                fetch(self.namespaced::<ServiceAccount>(key)?, kind, key).await?,
            ),
            ResourceKind::ClusterRole => ManagedResource::ClusterRole(
                fetch(self.cluster::<ClusterRole>(), kind, key).await?,
            ),
            ResourceKind::ClusterRoleBinding => ManagedResource::ClusterRoleBinding(
                fetch(self.cluster::<ClusterRoleBinding>(), kind, key).await?,
            ),
            ResourceKind::ConfigMap => ManagedResource::ConfigMap(
                fetch(self.namespaced::<ConfigMap>(key)?, kind, key).await?,
            ),
            ResourceKind::SecurityContextConstraints => {
                ManagedResource::SecurityContextConstraints(
                    fetch(self.scc_api(), kind, key).await?,
                )
            }
            ResourceKind::DaemonSet => ManagedResource::DaemonSet(
                fetch(self.namespaced::<DaemonSet>(key)?, kind, key).await?,
            ),
        };
        Ok(resource)
    }

    async fn create(&self, resource: &ManagedResource) -> Result<()> {
        let kind = resource.kind();
        let key = resource.key();
        debug!(%kind, %key, "POST");
        match resource {
            ManagedResource::ServiceAccount(o) => {
                post(self.namespaced::<ServiceAccount>(&key)?, o, kind, &key).await
            }
            ManagedResource::ClusterRole(o) => {
                post(self.cluster::<ClusterRole>(), o, kind, &key).await
            }
            ManagedResource::ClusterRoleBinding(o) => {
                post(self.cluster::<ClusterRoleBinding>(), o, kind, &key).await
            }
            ManagedResource::ConfigMap(o) => {
                post(self.namespaced::<ConfigMap>(&key)?, o, kind, &key).await
            }
            ManagedResource::SecurityContextConstraints(o) => {
                post(self.scc_api(), o, kind, &key).await
            }
            ManagedResource::DaemonSet(o) => {
                post(self.namespaced::<DaemonSet>(&key)?, o, kind, &key).await
            }
        }
    }
}

#[async_trait]
impl DesiredStateSource for KubeStore {
    async fn get_spec(&self, key: &ObjectKey) -> Result<NodeFeatureDiscovery> {
        let api = self.namespaced::<NodeFeatureDiscovery>(key)?;
        api.get(&key.name)
            .await
            .map_err(|e| map_api_error(e, "get", "NodeFeatureDiscovery", key))
    }
}
