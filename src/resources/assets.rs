//! Default Templates
//!
//! Compiled-in templates for the NFD operand: the worker ServiceAccount, its
//! RBAC grant and binding, the worker configuration, the OpenShift SCC and
//! the worker DaemonSet.

use super::{security_context_constraints_resource, ManagedResource, ResourceTemplates};
use crate::error::Result;
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EnvVar, EnvVarSource, HostPathVolumeSource,
    ObjectFieldSelector, PodSpec, PodTemplateSpec, ServiceAccount, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// Key of the worker configuration inside the ConfigMap
pub const WORKER_CONFIG_KEY: &str = "nfd-worker.conf";

/// Mount path of the worker configuration inside the worker container
pub const WORKER_CONFIG_DIR: &str = "/etc/kubernetes/node-feature-discovery";

// =============================================================================
// Configuration
// =============================================================================

/// Inputs for the default templates
#[derive(Debug, Clone)]
pub struct TemplateConfig {
    /// Namespace of the namespaced operand objects
    pub namespace: String,
    /// Name shared by all operand objects
    pub name: String,
    /// Worker container image
    pub image: String,
    /// Worker image pull policy
    pub image_pull_policy: String,
    /// Worker label sources configuration
    pub worker: WorkerConfig,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            namespace: "openshift-nfd".to_string(),
            name: "nfd-worker".to_string(),
            image: "quay.io/openshift/origin-node-feature-discovery:latest".to_string(),
            image_pull_policy: "Always".to_string(),
            worker: WorkerConfig::default(),
        }
    }
}

/// nfd-worker configuration file contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    pub sources: WorkerSources,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSources {
    pub pci: PciSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PciSource {
    /// PCI device class prefixes that produce labels
    pub device_class_whitelist: Vec<String>,
    /// Device fields used to build label names
    pub device_label_fields: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            sources: WorkerSources {
                pci: PciSource {
                    device_class_whitelist: vec!["03".into(), "0b40".into(), "12".into()],
                    device_label_fields: vec!["vendor".into()],
                },
            },
        }
    }
}

// =============================================================================
// Template Construction
// =============================================================================

/// Build the default template set in declared order
pub fn default_templates(config: &TemplateConfig) -> Result<ResourceTemplates> {
    ResourceTemplates::new(vec![
        ManagedResource::ServiceAccount(service_account(config)),
        ManagedResource::ClusterRole(cluster_role(config)),
        ManagedResource::ClusterRoleBinding(cluster_role_binding(config)),
        ManagedResource::ConfigMap(config_map(config)?),
        ManagedResource::SecurityContextConstraints(security_context_constraints(config)),
        ManagedResource::DaemonSet(daemon_set(config)),
    ])
}

fn labels(config: &TemplateConfig) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), config.name.clone())])
}

fn namespaced_meta(config: &TemplateConfig) -> ObjectMeta {
    ObjectMeta {
        name: Some(config.name.clone()),
        namespace: Some(config.namespace.clone()),
        labels: Some(labels(config)),
        ..Default::default()
    }
}

fn cluster_meta(config: &TemplateConfig) -> ObjectMeta {
    ObjectMeta {
        name: Some(config.name.clone()),
        labels: Some(labels(config)),
        ..Default::default()
    }
}

fn service_account(config: &TemplateConfig) -> ServiceAccount {
    ServiceAccount {
        metadata: namespaced_meta(config),
        ..Default::default()
    }
}

fn cluster_role(config: &TemplateConfig) -> ClusterRole {
    ClusterRole {
        metadata: cluster_meta(config),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["nodes".to_string()]),
            verbs: vec!["get".into(), "patch".into(), "update".into()],
            ..Default::default()
        }]),
        ..Default::default()
    }
}

fn cluster_role_binding(config: &TemplateConfig) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: cluster_meta(config),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: config.name.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: config.name.clone(),
            namespace: Some(config.namespace.clone()),
            ..Default::default()
        }]),
    }
}

fn config_map(config: &TemplateConfig) -> Result<ConfigMap> {
    let worker_conf = serde_yaml::to_string(&config.worker)?;
    Ok(ConfigMap {
        metadata: namespaced_meta(config),
        data: Some(BTreeMap::from([(WORKER_CONFIG_KEY.to_string(), worker_conf)])),
        ..Default::default()
    })
}

fn security_context_constraints(config: &TemplateConfig) -> DynamicObject {
    let user = format!("system:serviceaccount:{}:{}", config.namespace, config.name);
    let mut scc = DynamicObject::new(&config.name, &security_context_constraints_resource())
        .data(json!({
            "allowHostDirVolumePlugin": true,
            "allowHostIPC": false,
            "allowHostNetwork": true,
            "allowHostPID": false,
            "allowHostPorts": false,
            "allowPrivilegeEscalation": true,
            "allowPrivilegedContainer": false,
            "readOnlyRootFilesystem": false,
            "requiredDropCapabilities": ["KILL", "MKNOD", "SETUID", "SETGID"],
            "fsGroup": { "type": "RunAsAny" },
            "runAsUser": { "type": "RunAsAny" },
            "seLinuxContext": { "type": "RunAsAny" },
            "supplementalGroups": { "type": "RunAsAny" },
            "users": [user],
            "volumes": ["configMap", "hostPath", "secret"],
        }));
    scc.metadata.labels = Some(labels(config));
    scc
}

fn host_path_volume(name: &str, path: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn volume_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

fn daemon_set(config: &TemplateConfig) -> DaemonSet {
    let worker = Container {
        name: config.name.clone(),
        image: Some(config.image.clone()),
        image_pull_policy: Some(config.image_pull_policy.clone()),
        command: Some(vec!["nfd-worker".to_string()]),
        args: Some(vec!["--sleep-interval=60s".to_string()]),
        env: Some(vec![EnvVar {
            name: "NODE_NAME".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "spec.nodeName".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![
            volume_mount("host-boot", "/host-boot"),
            volume_mount("host-os-release", "/host-etc/os-release"),
            volume_mount("host-sys", "/host-sys"),
            volume_mount("config", WORKER_CONFIG_DIR),
        ]),
        ..Default::default()
    };

    DaemonSet {
        metadata: namespaced_meta(config),
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(labels(config)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(config)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(config.name.clone()),
                    host_network: Some(true),
                    containers: vec![worker],
                    volumes: Some(vec![
                        host_path_volume("host-boot", "/boot"),
                        host_path_volume("host-os-release", "/etc/os-release"),
                        host_path_volume("host-sys", "/sys"),
                        Volume {
                            name: "config".to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: Some(config.name.clone()),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
