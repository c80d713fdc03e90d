//! Operator Controller
//!
//! Wires the reconciler into `kube::runtime::Controller`: watches
//! NodeFeatureDiscovery objects and the namespaced objects they own, and
//! turns reconciliation errors into requeue decisions.

use crate::crd::NodeFeatureDiscovery;
use crate::error::{Error, ErrorAction, Result};
use crate::reconcile::Reconciler;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, ServiceAccount};
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Resync interval after a successful pass
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Base requeue delay for retryable errors
pub const BACKOFF_INTERVAL: Duration = Duration::from_secs(5);

/// Run the controller until a shutdown signal arrives
pub async fn run(client: Client, reconciler: Arc<Reconciler>) -> Result<()> {
    let nfds: Api<NodeFeatureDiscovery> = Api::all(client.clone());

    // Make sure the CRD is installed before watching
    nfds.list(&Default::default()).await.map_err(|e| {
        Error::Configuration(format!("NodeFeatureDiscovery CRD is not queryable: {}", e))
    })?;

    info!("Starting NodeFeatureDiscovery controller");
    Controller::new(nfds, Config::default())
        .owns(Api::<ServiceAccount>::all(client.clone()), Config::default())
        .owns(Api::<ConfigMap>::all(client.clone()), Config::default())
        .owns(Api::<DaemonSet>::all(client), Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => info!(object = %obj.name, ?action, "Reconciled"),
                Err(e) => warn!(error = %e, "Reconcile failed"),
            }
        })
        .await;

    info!("Controller shutdown complete");
    Ok(())
}

async fn reconcile(obj: Arc<NodeFeatureDiscovery>, ctx: Arc<Reconciler>) -> Result<Action> {
    if obj.metadata.deletion_timestamp.is_some() {
        // Owned objects are garbage collected through their owner references
        info!(name = %obj.name_any(), "NodeFeatureDiscovery is being deleted");
        return Ok(Action::await_change());
    }

    ctx.reconcile(&obj).await?;
    Ok(Action::requeue(RESYNC_INTERVAL))
}

fn error_policy(_obj: Arc<NodeFeatureDiscovery>, err: &Error, _ctx: Arc<Reconciler>) -> Action {
    requeue_action(err)
}

/// Requeue decision for a failed pass
pub fn requeue_action(err: &Error) -> Action {
    match err.action() {
        ErrorAction::RequeueWithBackoff => Action::requeue(BACKOFF_INTERVAL),
        ErrorAction::RequeueAfter(delay) => Action::requeue(delay),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_actions() {
        let err = Error::StoreUnavailable {
            reason: "timeout".into(),
        };
        assert_eq!(requeue_action(&err), Action::requeue(BACKOFF_INTERVAL));

        let err = Error::StoreRejected {
            operation: "get".into(),
            reason: "forbidden".into(),
        };
        assert_eq!(
            requeue_action(&err),
            Action::requeue(Duration::from_secs(60))
        );

        let err = Error::Configuration("bad".into());
        assert_eq!(requeue_action(&err), Action::await_change());
    }
}
