//! NFD Operator - Declarative Reconciliation Engine
//!
//! A Kubernetes operator that keeps the Node Feature Discovery operand
//! present in the cluster for every NodeFeatureDiscovery object.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                 Controller (kube::runtime, outer loop)               │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                             Reconciler                               │
//! │   clone template prototype ──► run stage pipeline ──► pass report    │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Pipeline (main | driver | device-plugin | monitoring)               │
//! │  ┌────────────────┐  ┌────────┐  ┌────────┐        ┌──────────┐      │
//! │  │ Set owner refs │─►│ Ensure │─►│ Ensure │─► ... ─►│  Ensure  │      │
//! │  │ (all templates)│  │   SA   │  │  Role  │        │ DaemonSet│      │
//! │  └────────────────┘  └────────┘  └────────┘        └──────────┘      │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │          ResourceStore port: KubeStore | InMemoryStore               │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`reconcile`]: ownership binder, resource controllers, pipelines, reconciler
//! - [`resources`]: managed resource kinds and default templates
//! - [`store`]: resource store adapters
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: port definitions
//! - [`controller`]: kube runtime wiring
//! - [`metrics`]: prometheus metrics
//! - [`error`]: Error types and handling

pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod reconcile;
pub mod resources;
pub mod store;

// Re-export commonly used types
pub use crd::{NodeFeatureDiscovery, NodeFeatureDiscoverySpec};

pub use domain::ports::{
    DesiredStateSource, DesiredStateSourceRef, ObjectKey, ResourceStore, ResourceStoreRef,
};

pub use error::{Error, ErrorAction, Result};

pub use metrics::ReconcileMetrics;

pub use reconcile::{
    ensure_resource, ControlStep, EnsureOutcome, OwnerScopePolicy, OwnershipBinder, PassReport,
    Pipeline, PipelineSet, Reconciler, ReconcilerConfig, Stage,
};

pub use resources::{
    default_templates, ManagedResource, ResourceKind, ResourceScope, ResourceTemplates,
    TemplateConfig, WorkerConfig,
};

pub use store::{Fault, InMemoryStore, KubeStore, StoreOperation};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
