//! NodeFeatureDiscovery CRD
//!
//! The desired-state object for one NFD deployment. The operator only reads
//! it; its identity becomes the owner of every managed resource.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// NodeFeatureDiscovery CRD
// =============================================================================

/// NodeFeatureDiscovery requests that the NFD operand (worker DaemonSet and
/// its RBAC/config objects) exists in the cluster.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "nfd.openshift.io",
    version = "v1alpha1",
    kind = "NodeFeatureDiscovery",
    plural = "nodefeaturediscoveries",
    shortname = "nfd",
    derive = "PartialEq",
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NodeFeatureDiscoverySpec {
    /// nfd-worker image requested for the operand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operand_image: Option<String>,

    /// Pull policy for the operand image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Raw nfd-worker configuration (YAML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_config: Option<String>,
}
