//! Reconciliation Pipeline
//!
//! An ordered, immutable list of control steps executed one after another
//! against a single NodeFeatureDiscovery. The first failing step ends the
//! pass; nothing already created is rolled back.

use super::ensure::{ensure_resource, EnsureOutcome};
use super::ownership::{controller_reference, is_controlled_by, OwnershipBinder};
use super::stages::Stage;
use crate::crd::NodeFeatureDiscovery;
use crate::domain::ports::ResourceStore;
use crate::error::{Error, Result};
use crate::metrics::ReconcileMetrics;
use crate::resources::{ResourceKind, ResourceTemplates};
use tracing::{debug, debug_span, Instrument};

// =============================================================================
// Control Step
// =============================================================================

/// One unit of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStep {
    /// Bind every template of the pass to the NodeFeatureDiscovery
    SetOwnerReferences,
    /// Ensure the object of one kind exists
    Ensure(ResourceKind),
}

impl std::fmt::Display for ControlStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlStep::SetOwnerReferences => write!(f, "set-owner-references"),
            ControlStep::Ensure(kind) => write!(f, "ensure-{}", kind.as_str()),
        }
    }
}

/// Result of one successful step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Bound(usize),
    Ensured(ResourceKind, EnsureOutcome),
}

/// Everything one pass works on
pub struct ReconcilePass<'a> {
    pub store: &'a dyn ResourceStore,
    pub binder: OwnershipBinder,
    pub owner: &'a NodeFeatureDiscovery,
    /// Templates private to this pass
    pub templates: ResourceTemplates,
    pub metrics: Option<&'a ReconcileMetrics>,
}

impl ControlStep {
    pub async fn execute(&self, pass: &mut ReconcilePass<'_>) -> Result<StepOutcome> {
        match *self {
            ControlStep::SetOwnerReferences => {
                let bound = pass.binder.bind(pass.owner, &mut pass.templates)?;
                Ok(StepOutcome::Bound(bound))
            }
            ControlStep::Ensure(kind) => {
                let template = pass.templates.get(kind).ok_or_else(|| {
                    Error::Configuration(format!("No template registered for {}", kind))
                })?;

                // Nothing reaches the store without its owner reference
                let owner_ref = controller_reference(pass.owner)?;
                if !is_controlled_by(template, &owner_ref) {
                    return Err(Error::Ownership {
                        kind: kind.to_string(),
                        name: template.name().to_string(),
                        reason: format!("template is not bound to owner {}", owner_ref.name),
                    });
                }

                let outcome = ensure_resource(pass.store, template).await?;
                if outcome == EnsureOutcome::Created {
                    if let Some(metrics) = pass.metrics {
                        metrics.record_created(kind);
                    }
                }
                Ok(StepOutcome::Ensured(kind, outcome))
            }
        }
    }
}

// =============================================================================
// Pass Report
// =============================================================================

/// Summary of a completed pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Templates bound to the owner
    pub bound: usize,
    /// Kinds created during the pass, in order
    pub created: Vec<ResourceKind>,
    /// Kinds that already existed
    pub found: Vec<ResourceKind>,
}

impl PassReport {
    fn record(&mut self, outcome: StepOutcome) {
        match outcome {
            StepOutcome::Bound(n) => self.bound = n,
            StepOutcome::Ensured(kind, EnsureOutcome::Created) => self.created.push(kind),
            StepOutcome::Ensured(kind, EnsureOutcome::Found) => self.found.push(kind),
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Ordered list of steps for one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stage: Stage,
    steps: Vec<ControlStep>,
}

impl Pipeline {
    pub fn builder(stage: Stage) -> PipelineBuilder {
        PipelineBuilder {
            stage,
            steps: Vec::new(),
        }
    }

    /// Pipeline with no steps; running it does nothing
    pub fn empty(stage: Stage) -> Self {
        Self {
            stage,
            steps: Vec::new(),
        }
    }

    /// The main pipeline: owner references, then every kind in dependency
    /// order. SecurityContextConstraints only when `with_scc` is set.
    pub fn standard(with_scc: bool) -> Self {
        let mut builder = Pipeline::builder(Stage::Main)
            .step(ControlStep::SetOwnerReferences)
            .ensure(ResourceKind::ServiceAccount)
            .ensure(ResourceKind::ClusterRole)
            .ensure(ResourceKind::ClusterRoleBinding)
            .ensure(ResourceKind::ConfigMap);
        if with_scc {
            builder = builder.ensure(ResourceKind::SecurityContextConstraints);
        }
        builder.ensure(ResourceKind::DaemonSet).into_pipeline()
    }

    /// Owner references followed by `kinds` in the given order
    pub fn for_kinds(stage: Stage, kinds: &[ResourceKind]) -> Self {
        if kinds.is_empty() {
            return Pipeline::empty(stage);
        }
        kinds
            .iter()
            .fold(
                Pipeline::builder(stage).step(ControlStep::SetOwnerReferences),
                |builder, kind| builder.ensure(*kind),
            )
            .into_pipeline()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn steps(&self) -> &[ControlStep] {
        &self.steps
    }

    /// Kinds this pipeline ensures
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                ControlStep::Ensure(kind) => Some(*kind),
                ControlStep::SetOwnerReferences => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order, stopping at the first error
    pub async fn run(&self, pass: &mut ReconcilePass<'_>) -> Result<PassReport> {
        let mut report = PassReport::default();
        for step in &self.steps {
            let span = debug_span!("step", stage = %self.stage, step = %step);
            let outcome = step.execute(pass).instrument(span).await?;
            report.record(outcome);
        }
        debug!(
            stage = %self.stage,
            created = report.created.len(),
            found = report.found.len(),
            "Pipeline complete"
        );
        Ok(report)
    }
}

/// Builder for [`Pipeline`]
#[derive(Debug)]
pub struct PipelineBuilder {
    stage: Stage,
    steps: Vec<ControlStep>,
}

impl PipelineBuilder {
    pub fn step(mut self, step: ControlStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn ensure(self, kind: ResourceKind) -> Self {
        self.step(ControlStep::Ensure(kind))
    }

    /// Finish the pipeline; an `Ensure` step before the first
    /// `SetOwnerReferences` is rejected
    pub fn build(self) -> Result<Pipeline> {
        let first_binding = self
            .steps
            .iter()
            .position(|s| *s == ControlStep::SetOwnerReferences);
        let first_ensure = self
            .steps
            .iter()
            .position(|s| matches!(s, ControlStep::Ensure(_)));

        match (first_binding, first_ensure) {
            (_, None) => {}
            (Some(b), Some(e)) if b < e => {}
            _ => {
                return Err(Error::Configuration(format!(
                    "{} pipeline ensures resources before setting owner references",
                    self.stage
                )))
            }
        }
        Ok(self.into_pipeline())
    }

    fn into_pipeline(self) -> Pipeline {
        Pipeline {
            stage: self.stage,
            steps: self.steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::fixtures::{owner, templates};
    use crate::reconcile::ownership::OwnerScopePolicy;
    use crate::store::{Fault, InMemoryStore};
    use assert_matches::assert_matches;

    fn pass<'a>(
        store: &'a InMemoryStore,
        owner: &'a NodeFeatureDiscovery,
        templates: ResourceTemplates,
    ) -> ReconcilePass<'a> {
        ReconcilePass {
            store,
            binder: OwnershipBinder::default(),
            owner,
            templates,
            metrics: None,
        }
    }

    #[test]
    fn test_builder_rejects_ensure_before_binding() {
        let result = Pipeline::builder(Stage::Main)
            .ensure(ResourceKind::ServiceAccount)
            .step(ControlStep::SetOwnerReferences)
            .build();
        assert_matches!(result, Err(Error::Configuration(_)));

        let result = Pipeline::builder(Stage::Driver)
            .ensure(ResourceKind::ServiceAccount)
            .build();
        assert_matches!(result, Err(Error::Configuration(_)));

        let pipeline = Pipeline::builder(Stage::Main)
            .step(ControlStep::SetOwnerReferences)
            .ensure(ResourceKind::ServiceAccount)
            .build()
            .unwrap();
        assert_eq!(pipeline.kinds(), vec![ResourceKind::ServiceAccount]);
    }

    #[test]
    fn test_standard_order() {
        let pipeline = Pipeline::standard(false);
        assert_eq!(pipeline.steps()[0], ControlStep::SetOwnerReferences);
        assert_eq!(
            pipeline.kinds(),
            vec![
                ResourceKind::ServiceAccount,
                ResourceKind::ClusterRole,
                ResourceKind::ClusterRoleBinding,
                ResourceKind::ConfigMap,
                ResourceKind::DaemonSet,
            ]
        );

        let with_scc = Pipeline::standard(true);
        assert_eq!(
            with_scc.kinds()[4],
            ResourceKind::SecurityContextConstraints
        );
    }

    #[test]
    fn test_step_names() {
        assert_eq!(
            ControlStep::SetOwnerReferences.to_string(),
            "set-owner-references"
        );
        assert_eq!(
            ControlStep::Ensure(ResourceKind::ClusterRoleBinding).to_string(),
            "ensure-cluster-role-binding"
        );
    }

    #[tokio::test]
    async fn test_creates_follow_step_order() {
        let store = InMemoryStore::new();
        let owner = owner("nfd", "ns1");
        let mut pass = pass(&store, &owner, templates("ns1"));

        let report = Pipeline::standard(false).run(&mut pass).await.unwrap();
        assert_eq!(report.bound, 6);
        assert_eq!(report.created, Pipeline::standard(false).kinds());
        assert_eq!(store.created_kinds(), Pipeline::standard(false).kinds());
    }

    #[tokio::test]
    async fn test_failed_dependency_blocks_dependent() {
        let store = InMemoryStore::new();
        let owner = owner("nfd", "ns1");
        store.fail_create(ResourceKind::ClusterRole, Fault::Unavailable);
        let mut pass = pass(&store, &owner, templates("ns1"));

        let result = Pipeline::standard(false).run(&mut pass).await;
        assert_matches!(result, Err(Error::StoreUnavailable { .. }));
        assert!(store
            .operations()
            .iter()
            .all(|op| op.kind() != ResourceKind::ClusterRoleBinding));
    }

    #[tokio::test]
    async fn test_binding_failure_stops_before_store() {
        let store = InMemoryStore::new();
        let owner = owner("nfd", "ns1");
        let mut pass = pass(&store, &owner, templates("ns1"));
        pass.binder = OwnershipBinder::new(OwnerScopePolicy::Strict);

        let result = Pipeline::standard(false).run(&mut pass).await;
        assert_matches!(result, Err(Error::Ownership { .. }));
        assert!(store.operations().is_empty());
    }

    #[tokio::test]
    async fn test_unbound_template_never_reaches_store() {
        let store = InMemoryStore::new();
        let owner = owner("nfd", "ns1");
        let mut pass = pass(&store, &owner, templates("ns1"));

        let result = ControlStep::Ensure(ResourceKind::ConfigMap)
            .execute(&mut pass)
            .await;
        assert_matches!(result, Err(Error::Ownership { .. }));
        assert!(store.operations().is_empty());
    }

    #[tokio::test]
    async fn test_empty_pipeline_is_noop() {
        let store = InMemoryStore::new();
        let owner = owner("nfd", "ns1");
        let mut pass = pass(&store, &owner, templates("ns1"));

        let report = Pipeline::empty(Stage::Monitoring)
            .run(&mut pass)
            .await
            .unwrap();
        assert_eq!(report, PassReport::default());
        assert!(store.operations().is_empty());
    }
}
