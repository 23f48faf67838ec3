//! Controller runtime wiring
//!
//! Drives [`StorageClassReconciler`] from a `kube::runtime::Controller` over
//! LocalStorageClass objects. The runtime supplies the keyed work queue and
//! guarantees at most one concurrent pass per class. Secondary watches map
//! LVMVolumeGroup and StorageClass changes back to the classes they affect.

use futures::StreamExt;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::adapters::kubernetes::KubeCluster;
use crate::controller::reconciler::{ReconcileOutcome, StorageClassReconciler};
use crate::controller::ControllerConfig;
use crate::crd::{LVMVolumeGroup, LocalStorageClass, StorageClass};
use crate::domain::LocalStorageClassApiRef;
use crate::error::{Error, ErrorAction, Result};
use crate::metrics::Metrics;

/// Shared state handed to every pass
pub struct Context {
    pub reconciler: StorageClassReconciler,
    pub local_classes: LocalStorageClassApiRef,
    pub config: ControllerConfig,
}

/// Reconcile entry point for the controller runtime
pub async fn reconcile(class: Arc<LocalStorageClass>, ctx: Arc<Context>) -> Result<Action> {
    let name = class.name().to_string();

    // The cached copy may be stale; work on the live object
    let Some(live) = ctx.local_classes.get(&name).await? else {
        debug!("LocalStorageClass {} no longer exists", name);
        return Ok(Action::await_change());
    };

    match ctx.reconciler.reconcile(&live).await? {
        ReconcileOutcome::Done => Ok(Action::await_change()),
        ReconcileOutcome::Requeue => Ok(Action::requeue(ctx.config.requeue_interval)),
    }
}

/// Map a failed pass to the next requeue
pub fn error_policy(class: Arc<LocalStorageClass>, error: &Error, ctx: Arc<Context>) -> Action {
    match error.action() {
        ErrorAction::NoRequeue => {
            warn!(
                "LocalStorageClass {} needs a change before it can reconcile: {}",
                class.name(),
                error
            );
            Action::await_change()
        }
        ErrorAction::RequeueAfter(delay) => Action::requeue(delay),
        ErrorAction::RequeueWithBackoff => {
            warn!(
                "LocalStorageClass {} reconciliation error, will retry: {}",
                class.name(),
                error
            );
            Action::requeue(ctx.config.requeue_interval)
        }
    }
}

/// Names of the classes whose resolution may change with `group`
pub fn classes_affected_by_group(
    classes: &[Arc<LocalStorageClass>],
    group: &LVMVolumeGroup,
) -> Vec<String> {
    let mut names: Vec<String> = classes
        .iter()
        .filter(|c| c.uses_selector() || c.references_group(group.name()) || c.is_failed())
        .map(|c| c.name().to_string())
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Run the LocalStorageClass controller until a shutdown signal arrives
pub async fn run(client: Client, config: ControllerConfig, metrics: Arc<Metrics>) -> Result<()> {
    let cluster = Arc::new(KubeCluster::new(client.clone()));
    let ctx = Arc::new(Context {
        reconciler: StorageClassReconciler::new(
            cluster.clone(),
            cluster.clone(),
            cluster.clone(),
            metrics,
        ),
        local_classes: cluster,
        config: config.clone(),
    });

    let classes: Api<LocalStorageClass> = Api::all(client.clone());
    let groups: Api<LVMVolumeGroup> = Api::all(client.clone());
    let storage_classes: Api<StorageClass> = Api::all(client);

    let watcher_config = || WatcherConfig::default().timeout(config.watch_timeout_secs);

    info!("Starting LocalStorageClass controller");
    info!("  Requeue interval: {:?}", config.requeue_interval);

    let controller = Controller::new(classes, watcher_config());
    let store = controller.store();

    controller
        .watches(groups, watcher_config(), move |group| {
            let affected = classes_affected_by_group(&store.state(), &group);
            debug!(
                "LVMVolumeGroup {} changed, requeueing {} LocalStorageClasses",
                group.name(),
                affected.len()
            );
            affected
                .into_iter()
                .map(|name| ObjectRef::<LocalStorageClass>::new(&name))
                .collect::<Vec<_>>()
        })
        .watches(storage_classes, watcher_config(), |sc| {
            sc.metadata
                .name
                .as_deref()
                .map(ObjectRef::<LocalStorageClass>::new)
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| {
            match result {
                Ok((object, action)) => debug!("Reconciled {}: {:?}", object.name, action),
                Err(e) => error!("LocalStorageClass reconciliation error: {}", e),
            }
            futures::future::ready(())
        })
        .await;

    info!("LocalStorageClass controller stopped");
    Ok(())
}
