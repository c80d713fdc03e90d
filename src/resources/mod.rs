//! Managed Resources
//!
//! The resource kinds the operator ensures exist, the tagged template type
//! that carries one object of each kind, and the ordered template set handed
//! to every reconciliation pass.

pub mod assets;

pub use assets::*;

use crate::domain::ports::ObjectKey;
use crate::error::{Error, Result};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::Resource;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// =============================================================================
// Resource Kind
// =============================================================================

/// Whether objects of a kind live inside a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceScope {
    Namespaced,
    Cluster,
}

/// Kinds of objects managed on behalf of a NodeFeatureDiscovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    ServiceAccount,
    ClusterRole,
    ClusterRoleBinding,
    ConfigMap,
    SecurityContextConstraints,
    DaemonSet,
}

const SCC_GROUP: &str = "security.openshift.io";
const SCC_VERSION: &str = "v1";
const SCC_KIND: &str = "SecurityContextConstraints";
const SCC_PLURAL: &str = "securitycontextconstraints";

impl ResourceKind {
    /// All kinds, in the order templates are declared
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::ServiceAccount,
        ResourceKind::ClusterRole,
        ResourceKind::ClusterRoleBinding,
        ResourceKind::ConfigMap,
        ResourceKind::SecurityContextConstraints,
        ResourceKind::DaemonSet,
    ];

    /// Kubernetes `kind` string
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceKind::ServiceAccount => <ServiceAccount as k8s_openapi::Resource>::KIND,
            ResourceKind::ClusterRole => <ClusterRole as k8s_openapi::Resource>::KIND,
            ResourceKind::ClusterRoleBinding => <ClusterRoleBinding as k8s_openapi::Resource>::KIND,
            ResourceKind::ConfigMap => <ConfigMap as k8s_openapi::Resource>::KIND,
            ResourceKind::SecurityContextConstraints => SCC_KIND,
            ResourceKind::DaemonSet => <DaemonSet as k8s_openapi::Resource>::KIND,
        }
    }

    /// Kubernetes `apiVersion` string
    pub fn api_version(&self) -> &'static str {
        match self {
            ResourceKind::ServiceAccount => <ServiceAccount as k8s_openapi::Resource>::API_VERSION,
            ResourceKind::ClusterRole => <ClusterRole as k8s_openapi::Resource>::API_VERSION,
            ResourceKind::ClusterRoleBinding => {
                <ClusterRoleBinding as k8s_openapi::Resource>::API_VERSION
            }
            ResourceKind::ConfigMap => <ConfigMap as k8s_openapi::Resource>::API_VERSION,
            ResourceKind::SecurityContextConstraints => "security.openshift.io/v1",
            ResourceKind::DaemonSet => <DaemonSet as k8s_openapi::Resource>::API_VERSION,
        }
    }

    pub fn scope(&self) -> ResourceScope {
        match self {
            ResourceKind::ServiceAccount | ResourceKind::ConfigMap | ResourceKind::DaemonSet => {
                ResourceScope::Namespaced
            }
            ResourceKind::ClusterRole
            | ResourceKind::ClusterRoleBinding
            | ResourceKind::SecurityContextConstraints => ResourceScope::Cluster,
        }
    }

    /// CLI/config spelling of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ServiceAccount => "service-account",
            ResourceKind::ClusterRole => "cluster-role",
            ResourceKind::ClusterRoleBinding => "cluster-role-binding",
            ResourceKind::ConfigMap => "config-map",
            ResourceKind::SecurityContextConstraints => "security-context-constraints",
            ResourceKind::DaemonSet => "daemon-set",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted || k.kind().to_lowercase() == wanted)
            .ok_or_else(|| Error::Configuration(format!("Unknown resource kind: {}", s)))
    }
}

/// API resource descriptor for OpenShift SecurityContextConstraints, which
/// k8s-openapi does not model
pub fn security_context_constraints_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk(SCC_GROUP, SCC_VERSION, SCC_KIND);
    ApiResource::from_gvk_with_plural(&gvk, SCC_PLURAL)
}

// =============================================================================
// Managed Resource
// =============================================================================

/// One object of a managed kind, either a template or a live object read
/// back from the store
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedResource {
    ServiceAccount(ServiceAccount),
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
    ConfigMap(ConfigMap),
    SecurityContextConstraints(DynamicObject),
    DaemonSet(DaemonSet),
}

impl ManagedResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ManagedResource::ServiceAccount(_) => ResourceKind::ServiceAccount,
            ManagedResource::ClusterRole(_) => ResourceKind::ClusterRole,
            ManagedResource::ClusterRoleBinding(_) => ResourceKind::ClusterRoleBinding,
            ManagedResource::ConfigMap(_) => ResourceKind::ConfigMap,
            ManagedResource::SecurityContextConstraints(_) => {
                ResourceKind::SecurityContextConstraints
            }
            ManagedResource::DaemonSet(_) => ResourceKind::DaemonSet,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ManagedResource::ServiceAccount(o) => o.meta(),
            ManagedResource::ClusterRole(o) => o.meta(),
            ManagedResource::ClusterRoleBinding(o) => o.meta(),
            ManagedResource::ConfigMap(o) => o.meta(),
            ManagedResource::SecurityContextConstraints(o) => o.meta(),
            ManagedResource::DaemonSet(o) => o.meta(),
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ManagedResource::ServiceAccount(o) => o.meta_mut(),
            ManagedResource::ClusterRole(o) => o.meta_mut(),
            ManagedResource::ClusterRoleBinding(o) => o.meta_mut(),
            ManagedResource::ConfigMap(o) => o.meta_mut(),
            ManagedResource::SecurityContextConstraints(o) => o.meta_mut(),
            ManagedResource::DaemonSet(o) => o.meta_mut(),
        }
    }

    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    /// Namespace the object lives in; always `None` for cluster-scoped kinds
    pub fn namespace(&self) -> Option<&str> {
        match self.kind().scope() {
            ResourceScope::Namespaced => self.meta().namespace.as_deref(),
            ResourceScope::Cluster => None,
        }
    }

    /// Store key of the object
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            namespace: self.namespace().map(str::to_string),
            name: self.name().to_string(),
        }
    }

    pub fn owner_references(&self) -> &[OwnerReference] {
        self.meta().owner_references.as_deref().unwrap_or_default()
    }
}

// =============================================================================
// Resource Templates
// =============================================================================

/// Ordered set of templates, at most one per kind.
///
/// The identity of every template (kind, namespace, name) is validated once
/// at construction and cannot change afterwards; only metadata such as
/// owner references is mutable through [`ResourceTemplates::iter_mut`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceTemplates {
    items: Vec<ManagedResource>,
}

impl ResourceTemplates {
    pub fn new(items: Vec<ManagedResource>) -> Result<Self> {
        for (idx, item) in items.iter().enumerate() {
            if item.name().is_empty() {
                return Err(Error::Configuration(format!(
                    "{} template has no name",
                    item.kind()
                )));
            }
            if item.kind().scope() == ResourceScope::Namespaced && item.namespace().is_none() {
                return Err(Error::Configuration(format!(
                    "{} template {} has no namespace",
                    item.kind(),
                    item.name()
                )));
            }
            if items[..idx].iter().any(|other| other.kind() == item.kind()) {
                return Err(Error::Configuration(format!(
                    "Duplicate {} template",
                    item.kind()
                )));
            }
        }
        Ok(Self { items })
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&ManagedResource> {
        self.items.iter().find(|item| item.kind() == kind)
    }

    pub fn contains(&self, kind: ResourceKind) -> bool {
        self.get(kind).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManagedResource> {
        self.items.iter()
    }

    /// Mutable access for metadata changes; the kind of each slot is fixed
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ManagedResource> {
        self.items.iter_mut()
    }

    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.items.iter().map(ManagedResource::kind).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
