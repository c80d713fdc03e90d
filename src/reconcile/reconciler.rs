//! Reconciler
//!
//! Entry point for one reconciliation trigger. Owns the store handle, the
//! pipeline set and the template prototype; every pass clones the
//! prototype, so concurrent passes for different specs never share mutable
//! templates.

use super::ownership::{OwnerScopePolicy, OwnershipBinder};
use super::pipeline::{PassReport, ReconcilePass};
use super::stages::{PipelineSet, Stage};
use crate::crd::NodeFeatureDiscovery;
use crate::domain::ports::{DesiredStateSource, ObjectKey, ResourceStoreRef};
use crate::error::{Error, Result};
use crate::metrics::ReconcileMetrics;
use crate::resources::{ResourceKind, ResourceTemplates};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the reconciler
#[derive(Debug, Clone, Default)]
pub struct ReconcilerConfig {
    /// Owner/dependent scope rules
    pub scope_policy: OwnerScopePolicy,
    /// Register the SecurityContextConstraints step in the main pipeline
    pub security_context_constraints: bool,
    /// Kinds per stage; a configured stage overrides its default pipeline
    pub stages: BTreeMap<Stage, Vec<ResourceKind>>,
}

// =============================================================================
// Reconciler
// =============================================================================

/// Runs pipelines for NodeFeatureDiscovery objects
pub struct Reconciler {
    store: ResourceStoreRef,
    pipelines: PipelineSet,
    binder: OwnershipBinder,
    templates: ResourceTemplates,
    metrics: Option<Arc<ReconcileMetrics>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("pipelines", &self.pipelines)
            .field("binder", &self.binder)
            .field("templates", &self.templates.kinds())
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create a reconciler; every kind any pipeline ensures must have a
    /// template
    pub fn new(
        store: ResourceStoreRef,
        templates: ResourceTemplates,
        config: &ReconcilerConfig,
    ) -> Result<Self> {
        if config.stages.get(&Stage::Main).is_some_and(|kinds| kinds.is_empty()) {
            return Err(Error::Configuration(
                "main stage override ensures no resources".to_string(),
            ));
        }
        let pipelines = PipelineSet::new(config.security_context_constraints, &config.stages);

        for (stage, pipeline) in pipelines.iter() {
            if let Some(missing) = pipeline.kinds().into_iter().find(|k| !templates.contains(*k)) {
                return Err(Error::Configuration(format!(
                    "{} pipeline ensures {} but no template exists for it",
                    stage, missing
                )));
            }
        }

        Ok(Self {
            store,
            pipelines,
            binder: OwnershipBinder::new(config.scope_policy),
            templates,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<ReconcileMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn pipelines(&self) -> &PipelineSet {
        &self.pipelines
    }

    /// Template prototype; never bound to any owner
    pub fn templates(&self) -> &ResourceTemplates {
        &self.templates
    }

    /// Run the main pipeline for `owner`
    pub async fn reconcile(&self, owner: &NodeFeatureDiscovery) -> Result<PassReport> {
        self.reconcile_stage(Stage::Main, owner).await
    }

    /// Resolve `key` through `source` and run the main pipeline.
    ///
    /// Returns `Ok(None)` when the NodeFeatureDiscovery no longer exists.
    pub async fn reconcile_key(
        &self,
        source: &dyn DesiredStateSource,
        key: &ObjectKey,
    ) -> Result<Option<PassReport>> {
        let owner = match source.get_spec(key).await {
            Ok(owner) => owner,
            Err(e) if e.is_not_found() => {
                info!(%key, "NodeFeatureDiscovery not found, nothing to reconcile");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        self.reconcile(&owner).await.map(Some)
    }

    /// Run the pipeline registered for `stage`
    pub async fn reconcile_stage(
        &self,
        stage: Stage,
        owner: &NodeFeatureDiscovery,
    ) -> Result<PassReport> {
        let pipeline = self
            .pipelines
            .get(stage)
            .ok_or_else(|| Error::Internal(format!("No pipeline for stage {}", stage)))?;

        let mut pass = ReconcilePass {
            store: self.store.as_ref(),
            binder: self.binder,
            owner,
            templates: self.templates.clone(),
            metrics: self.metrics.as_deref(),
        };

        let span = info_span!(
            "reconcile",
            stage = %stage,
            name = %owner.name_any(),
            namespace = %owner.namespace().unwrap_or_default()
        );
        let started = Instant::now();
        let result = pipeline.run(&mut pass).instrument(span).await;

        match &result {
            Ok(report) => info!(
                %stage,
                name = %owner.name_any(),
                created = report.created.len(),
                found = report.found.len(),
                "Reconciliation pass complete"
            ),
            Err(e) => warn!(%stage, name = %owner.name_any(), error = %e, "Reconciliation pass failed"),
        }
        if let Some(metrics) = &self.metrics {
            metrics.observe_pass(stage, &result, started.elapsed());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::fixtures::{owner, templates};
    use crate::reconcile::ownership::{controller_reference, is_controlled_by};
    use crate::resources::ManagedResource;
    use crate::store::{Fault, InMemoryStore, StoreOperation};
    use assert_matches::assert_matches;
    use prometheus::Registry;

    const MAIN_KINDS: [ResourceKind; 5] = [
        ResourceKind::ServiceAccount,
        ResourceKind::ClusterRole,
        ResourceKind::ClusterRoleBinding,
        ResourceKind::ConfigMap,
        ResourceKind::DaemonSet,
    ];

    fn reconciler(store: &Arc<InMemoryStore>, config: &ReconcilerConfig) -> Reconciler {
        Reconciler::new(store.clone(), templates("ns1"), config).unwrap()
    }

    #[tokio::test]
    async fn test_scenario_empty_store() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = reconciler(&store, &ReconcilerConfig::default());
        let owner = owner("nfd", "ns1");

        let report = reconciler.reconcile(&owner).await.unwrap();
        assert_eq!(report.created, MAIN_KINDS.to_vec());
        assert_eq!(store.len(), 5);

        let owner_ref = controller_reference(&owner).unwrap();
        for kind in MAIN_KINDS {
            assert_eq!(store.count(kind), 1, "{}", kind);
        }
        assert!(store.objects().iter().all(|o| is_controlled_by(o, &owner_ref)));
        for object in store.objects() {
            let reference = &object.owner_references()[0];
            assert_eq!(reference.name, "nfd");
            assert_eq!(reference.controller, Some(true));
            assert_eq!(reference.block_owner_deletion, Some(true), "{}", object.kind());
        }
        assert_eq!(store.count(ResourceKind::SecurityContextConstraints), 0);
    }

    #[tokio::test]
    async fn test_scenario_preexisting_unowned_account() {
        let store = Arc::new(InMemoryStore::new());
        let prototype = templates("ns1");
        let unowned = prototype
            .get(ResourceKind::ServiceAccount)
            .cloned()
            .unwrap();
        store.insert(unowned.clone());

        let reconciler = reconciler(&store, &ReconcilerConfig::default());
        let report = reconciler.reconcile(&owner("nfd", "ns1")).await.unwrap();

        assert_eq!(report.bound, 6);
        assert_eq!(report.found, vec![ResourceKind::ServiceAccount]);
        assert_eq!(report.created, MAIN_KINDS[1..].to_vec());
        assert_eq!(
            store.object(ResourceKind::ServiceAccount, &unowned.key()),
            Some(unowned)
        );
        assert!(!store.created_kinds().contains(&ResourceKind::ServiceAccount));
    }

    #[tokio::test]
    async fn test_scenario_read_failure_stops_pipeline() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_get(ResourceKind::ClusterRole, Fault::Forbidden);
        let reconciler = reconciler(&store, &ReconcilerConfig::default());

        let result = reconciler.reconcile(&owner("nfd", "ns1")).await;
        assert_matches!(result, Err(Error::StoreRejected { .. }));

        assert_eq!(store.created_kinds(), vec![ResourceKind::ServiceAccount]);
        let touched: Vec<ResourceKind> = store.operations().iter().map(StoreOperation::kind).collect();
        assert!(!touched.contains(&ResourceKind::ClusterRoleBinding));
        assert!(!touched.contains(&ResourceKind::ConfigMap));
        assert!(!touched.contains(&ResourceKind::DaemonSet));
    }

    #[tokio::test]
    async fn test_resume_after_partial_failure() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_create(ResourceKind::ConfigMap, Fault::Unavailable);
        let reconciler = reconciler(&store, &ReconcilerConfig::default());
        let owner = owner("nfd", "ns1");

        assert_matches!(
            reconciler.reconcile(&owner).await,
            Err(Error::StoreUnavailable { .. })
        );
        assert_eq!(store.len(), 3);

        store.clear_faults();
        store.clear_operations();
        let report = reconciler.reconcile(&owner).await.unwrap();

        assert_eq!(report.found, MAIN_KINDS[..3].to_vec());
        assert_eq!(report.created, MAIN_KINDS[3..].to_vec());
        assert_eq!(store.created_kinds(), MAIN_KINDS[3..].to_vec());
        assert_eq!(store.len(), 5);
    }

    #[tokio::test]
    async fn test_prototype_stays_unbound() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = reconciler(&store, &ReconcilerConfig::default());

        reconciler.reconcile(&owner("nfd", "ns1")).await.unwrap();
        assert!(reconciler
            .templates()
            .iter()
            .all(|t| t.owner_references().is_empty()));
    }

    #[tokio::test]
    async fn test_concurrent_passes_share_prototype() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = reconciler(&store, &ReconcilerConfig::default());
        let owner_a = owner("nfd-a", "ns1");
        let owner_b = owner("nfd-b", "ns1");

        let (ra, rb) = tokio::join!(
            reconciler.reconcile_stage(Stage::Main, &owner_a),
            reconciler.reconcile_stage(Stage::Main, &owner_b)
        );
        let (ra, rb) = (ra.unwrap(), rb.unwrap());
        assert_eq!(ra.bound, 6);
        assert_eq!(rb.bound, 6);
        assert_eq!(ra.created.len() + rb.created.len(), 5);
        assert_eq!(store.len(), 5);

        let ref_a = controller_reference(&owner_a).unwrap();
        let ref_b = controller_reference(&owner_b).unwrap();
        assert!(store
            .objects()
            .iter()
            .all(|o| is_controlled_by(o, &ref_a) != is_controlled_by(o, &ref_b)));
        assert!(reconciler
            .templates()
            .iter()
            .all(|t| t.owner_references().is_empty()));
    }

    #[tokio::test]
    async fn test_security_context_constraints_flag() {
        let store = Arc::new(InMemoryStore::new());
        let config = ReconcilerConfig {
            security_context_constraints: true,
            ..Default::default()
        };
        let reconciler = reconciler(&store, &config);

        let report = reconciler.reconcile(&owner("nfd", "ns1")).await.unwrap();
        assert_eq!(report.created.len(), 6);
        assert_eq!(store.count(ResourceKind::SecurityContextConstraints), 1);
        assert_eq!(
            report.created[4],
            ResourceKind::SecurityContextConstraints
        );
    }

    #[tokio::test]
    async fn test_stage_reconciles_subset() {
        let store = Arc::new(InMemoryStore::new());
        let config = ReconcilerConfig {
            stages: BTreeMap::from([(
                Stage::Driver,
                vec![ResourceKind::ServiceAccount, ResourceKind::ConfigMap],
            )]),
            ..Default::default()
        };
        let reconciler = reconciler(&store, &config);
        let owner = owner("nfd", "ns1");

        let report = reconciler
            .reconcile_stage(Stage::Driver, &owner)
            .await
            .unwrap();
        assert_eq!(
            report.created,
            vec![ResourceKind::ServiceAccount, ResourceKind::ConfigMap]
        );
        assert_eq!(store.len(), 2);

        let report = reconciler
            .reconcile_stage(Stage::Monitoring, &owner)
            .await
            .unwrap();
        assert_eq!(report, PassReport::default());

        let report = reconciler.reconcile(&owner).await.unwrap();
        assert_eq!(
            report.found,
            vec![ResourceKind::ServiceAccount, ResourceKind::ConfigMap]
        );
        assert_eq!(store.len(), 5);
    }

    #[tokio::test]
    async fn test_missing_template_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let only_account: Vec<ManagedResource> = templates("ns1")
            .iter()
            .filter(|t| t.kind() == ResourceKind::ServiceAccount)
            .cloned()
            .collect();
        let templates = ResourceTemplates::new(only_account).unwrap();

        let result = Reconciler::new(store, templates, &ReconcilerConfig::default());
        assert_matches!(result, Err(Error::Configuration(_)));
    }

    #[test]
    fn test_empty_main_override_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let config = ReconcilerConfig {
            stages: BTreeMap::from([(Stage::Main, Vec::new())]),
            ..Default::default()
        };
        let result = Reconciler::new(store.clone(), templates("ns1"), &config);
        assert_matches!(result, Err(Error::Configuration(_)));

        let config = ReconcilerConfig {
            stages: BTreeMap::from([(Stage::Monitoring, Vec::new())]),
            ..Default::default()
        };
        let reconciler = Reconciler::new(store, templates("ns1"), &config).unwrap();
        assert!(format!("{:?}", reconciler).contains("Reconciler"));
    }

    #[tokio::test]
    async fn test_reconcile_key() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = reconciler(&store, &ReconcilerConfig::default());
        store.insert_spec(owner("nfd", "ns1"));

        let missing = reconciler
            .reconcile_key(store.as_ref(), &ObjectKey::namespaced("ns1", "gone"))
            .await
            .unwrap();
        assert_eq!(missing, None);
        assert!(store.is_empty());

        let report = reconciler
            .reconcile_key(store.as_ref(), &ObjectKey::namespaced("ns1", "nfd"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.created.len(), 5);
    }

    #[tokio::test]
    async fn test_metrics_recorded() {
        let store = Arc::new(InMemoryStore::new());
        let metrics = Arc::new(ReconcileMetrics::new(&Registry::new()).unwrap());
        let reconciler =
            reconciler(&store, &ReconcilerConfig::default()).with_metrics(metrics.clone());
        let owner = owner("nfd", "ns1");

        reconciler.reconcile(&owner).await.unwrap();
        reconciler.reconcile(&owner).await.unwrap();

        assert_eq!(metrics.passes(Stage::Main, "success"), 2);
        assert_eq!(metrics.created(ResourceKind::DaemonSet), 1);
    }
}
