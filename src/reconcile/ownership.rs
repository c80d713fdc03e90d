//! Ownership Binder
//!
//! Attaches a controller owner reference from the NodeFeatureDiscovery to
//! every template so the cluster garbage collector cascades deletion.

use crate::error::{Error, Result};
use crate::resources::{ManagedResource, ResourceScope, ResourceTemplates};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use std::str::FromStr;
use tracing::{debug, warn};

// =============================================================================
// Scope Policy
// =============================================================================

/// How owner/dependent scope mismatches are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OwnerScopePolicy {
    /// Accept any combination, including a namespaced owner of a
    /// cluster-scoped dependent
    #[default]
    Permissive,
    /// Reject namespaced owners of cluster-scoped dependents and
    /// cross-namespace ownership
    Strict,
}

impl std::fmt::Display for OwnerScopePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnerScopePolicy::Permissive => write!(f, "permissive"),
            OwnerScopePolicy::Strict => write!(f, "strict"),
        }
    }
}

impl FromStr for OwnerScopePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "permissive" => Ok(OwnerScopePolicy::Permissive),
            "strict" => Ok(OwnerScopePolicy::Strict),
            other => Err(Error::Configuration(format!(
                "Unknown owner scope policy: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Owner References
// =============================================================================

/// Controller owner reference pointing at `owner`
pub fn controller_reference<K>(owner: &K) -> Result<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    owner
        .controller_owner_ref(&())
        .map(|r| OwnerReference {
            block_owner_deletion: Some(true),
            ..r
        })
        .ok_or_else(|| Error::Ownership {
            kind: K::kind(&()).to_string(),
            name: owner.meta().name.clone().unwrap_or_default(),
            reason: "owner has no name or uid".to_string(),
        })
}

fn api_group(api_version: &str) -> &str {
    api_version
        .rsplit_once('/')
        .map(|(group, _)| group)
        .unwrap_or_default()
}

fn same_owner(a: &OwnerReference, b: &OwnerReference) -> bool {
    api_group(&a.api_version) == api_group(&b.api_version) && a.kind == b.kind && a.name == b.name
}

/// True when `template` carries exactly one controller reference and it
/// points at `owner`
pub fn is_controlled_by(template: &ManagedResource, owner: &OwnerReference) -> bool {
    let mut controllers = template
        .owner_references()
        .iter()
        .filter(|r| r.controller == Some(true));
    matches!(
        (controllers.next(), controllers.next()),
        (Some(only), None) if only.uid == owner.uid && same_owner(only, owner)
    )
}

// =============================================================================
// Binder
// =============================================================================

/// Binds every template in a set to one owner
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipBinder {
    policy: OwnerScopePolicy,
}

impl OwnershipBinder {
    pub fn new(policy: OwnerScopePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> OwnerScopePolicy {
        self.policy
    }

    /// Attach the owner reference to every template in declared order.
    ///
    /// Stops at the first template that can't be bound; templates before it
    /// stay bound, templates after it are left untouched.
    pub fn bind<K>(&self, owner: &K, templates: &mut ResourceTemplates) -> Result<usize>
    where
        K: Resource<DynamicType = ()>,
    {
        let owner_ref = controller_reference(owner)?;
        let owner_namespace = owner.meta().namespace.as_deref();

        let mut bound = 0;
        for template in templates.iter_mut() {
            if let Err(e) = self.set_controller_reference(&owner_ref, owner_namespace, template) {
                warn!(
                    kind = %template.kind(),
                    name = template.name(),
                    error = %e,
                    "Couldn't set owner references"
                );
                return Err(e);
            }
            bound += 1;
        }

        debug!(owner = %owner_ref.name, bound, "Owner references set");
        Ok(bound)
    }

    fn set_controller_reference(
        &self,
        owner_ref: &OwnerReference,
        owner_namespace: Option<&str>,
        template: &mut ManagedResource,
    ) -> Result<()> {
        let rejected = |template: &ManagedResource, reason: String| Error::Ownership {
            kind: template.kind().to_string(),
            name: template.name().to_string(),
            reason,
        };

        if self.policy == OwnerScopePolicy::Strict {
            if let Some(owner_ns) = owner_namespace {
                match template.kind().scope() {
                    ResourceScope::Cluster => {
                        return Err(rejected(
                            template,
                            format!(
                                "cluster-scoped resource must not have a namespace-scoped owner, owner's namespace {}",
                                owner_ns
                            ),
                        ));
                    }
                    ResourceScope::Namespaced => {
                        let template_ns = template.namespace().unwrap_or_default();
                        if template_ns != owner_ns {
                            return Err(rejected(
                                template,
                                format!(
                                    "cross-namespace owner references are disallowed, owner's namespace {}, obj's namespace {}",
                                    owner_ns, template_ns
                                ),
                            ));
                        }
                    }
                }
            }
        }

        if let Some(other) = template
            .owner_references()
            .iter()
            .find(|r| r.controller == Some(true) && !same_owner(r, owner_ref))
        {
            return Err(rejected(
                template,
                format!("already owned by {} {}", other.kind, other.name),
            ));
        }

        let refs = template
            .meta_mut()
            .owner_references
            .get_or_insert_with(Vec::new);
        match refs.iter_mut().find(|r| same_owner(r, owner_ref)) {
            Some(existing) => *existing = owner_ref.clone(),
            None => refs.push(owner_ref.clone()),
        }
        Ok(())
    }
}
