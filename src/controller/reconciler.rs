//! LocalStorageClass reconciliation
//!
//! Each pass classifies a LocalStorageClass against its same-named
//! StorageClass and runs one of four flows:
//!
//! ```text
//!   deletionTimestamp set          -> Delete
//!   no StorageClass                -> Create
//!   owned StorageClass and
//!     selector | diff | Failed     -> Update (delete + create on drift)
//!   otherwise                      -> None
//! ```
//!
//! The pass assumes it is the only writer for its class; the controller
//! runtime serializes passes per object. Mutation failures are recorded in
//! the class status and returned so that the runtime requeues the pass.

use k8s_openapi::api::storage::v1::StorageClass;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::constants::{CONTROLLER_FINALIZER, LEGACY_CONTROLLER_FINALIZER, PROVISIONER};
use crate::controller::resolver::resolve_bindings;
use crate::controller::storage_class::{build_replacement, build_storage_class, has_diff, is_managed};
use crate::controller::validator::validate;
use crate::crd::{LocalStorageClass, LocalStorageClassStatus};
use crate::domain::{LocalStorageClassApiRef, StorageClassApiRef, VolumeGroupInventoryRef};
use crate::error::{Error, Result};
use crate::metrics::Metrics;

/// Flow selected for a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Create,
    Update,
    Delete,
    None,
}

impl std::fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileAction::Create => write!(f, "create"),
            ReconcileAction::Update => write!(f, "update"),
            ReconcileAction::Delete => write!(f, "delete"),
            ReconcileAction::None => write!(f, "none"),
        }
    }
}

/// Result of a pass that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Converged; wait for the next change
    Done,
    /// Another writer raced us; run again after the requeue interval
    Requeue,
}

/// Decide which flow a pass must run
pub fn identify_action(
    class: &LocalStorageClass,
    storage_classes: &[StorageClass],
) -> Result<ReconcileAction> {
    if class.is_being_deleted() {
        return Ok(ReconcileAction::Delete);
    }

    let Some(current) = find_by_name(storage_classes, class.name()) else {
        return Ok(ReconcileAction::Create);
    };

    if !is_managed(current) {
        return Err(Error::Conflict {
            kind: "StorageClass".into(),
            name: class.name().to_string(),
            reason: format!(
                "a storage class {} already exists and does not belong to {} provisioner",
                class.name(),
                PROVISIONER
            ),
        });
    }

    // Selector membership can change without any edit to the class itself
    if class.uses_selector() {
        return Ok(ReconcileAction::Update);
    }

    // Without a selector the inventory does not influence resolution
    let explicit = resolve_bindings(&[], class)?;
    if has_diff(current, class, &explicit)? {
        return Ok(ReconcileAction::Update);
    }

    if class.is_failed() {
        return Ok(ReconcileAction::Update);
    }

    Ok(ReconcileAction::None)
}

fn find_by_name<'a>(classes: &'a [StorageClass], name: &str) -> Option<&'a StorageClass> {
    classes
        .iter()
        .find(|sc| sc.metadata.name.as_deref() == Some(name))
}

/// Runs reconciliation passes against the cluster ports
pub struct StorageClassReconciler {
    storage_classes: StorageClassApiRef,
    local_classes: LocalStorageClassApiRef,
    inventory: VolumeGroupInventoryRef,
    metrics: Arc<Metrics>,
}

impl StorageClassReconciler {
    pub fn new(
        storage_classes: StorageClassApiRef,
        local_classes: LocalStorageClassApiRef,
        inventory: VolumeGroupInventoryRef,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            storage_classes,
            local_classes,
            inventory,
            metrics,
        }
    }

    /// Run one pass for `class`
    pub async fn reconcile(&self, class: &LocalStorageClass) -> Result<ReconcileOutcome> {
        let mut class = class.clone();
        let name = class.name().to_string();

        let storage_classes = self.storage_classes.list().await?;

        let action = match identify_action(&class, &storage_classes) {
            Ok(action) => action,
            Err(e) => {
                error!("Unable to identify reconcile action for LocalStorageClass {}: {}", name, e);
                self.metrics.record_reconcile("identify", false);
                return Err(self.fail(&mut class, e).await);
            }
        };
        debug!("LocalStorageClass {} reconcile action: {}", name, action);

        let result = match action {
            ReconcileAction::Create => self.reconcile_create(&mut class, &storage_classes).await,
            ReconcileAction::Update => self.reconcile_update(&mut class, &storage_classes).await,
            ReconcileAction::Delete => self.reconcile_delete(&mut class, &storage_classes).await,
            ReconcileAction::None => {
                debug!("LocalStorageClass {} is up to date", name);
                Ok(ReconcileOutcome::Done)
            }
        };

        self.metrics
            .record_reconcile(&action.to_string(), result.is_ok());
        result
    }

    // =========================================================================
    // Create
    // =========================================================================

    async fn reconcile_create(
        &self,
        class: &mut LocalStorageClass,
        storage_classes: &[StorageClass],
    ) -> Result<ReconcileOutcome> {
        let name = class.name().to_string();

        // Finalizer first so a crash below cannot orphan a StorageClass
        if class.add_finalizer() {
            *class = self.local_classes.replace(class).await.map_err(|e| {
                error!("Unable to add finalizer to LocalStorageClass {}: {}", name, e);
                e
            })?;
            debug!("Added finalizer to LocalStorageClass {}", name);
        }

        let inventory = match self.inventory.list().await {
            Ok(inventory) => inventory,
            Err(e) => {
                let e = Error::Internal(format!("Unable to list LVMVolumeGroups: {}", e));
                return Err(self.fail(class, e).await);
            }
        };

        let bindings = match resolve_bindings(&inventory, class) {
            Ok(bindings) => bindings,
            Err(e) => return Err(self.fail(class, e).await),
        };
        debug!("Resolved {} LVMVolumeGroups for LocalStorageClass {}", bindings.len(), name);

        let report = validate(class, &bindings, &inventory, storage_classes);
        if let Err(e) = report.into_result() {
            warn!("LocalStorageClass {} is invalid: {}", name, e);
            return Err(self.fail(class, e).await);
        }

        let desired = match build_storage_class(class, &bindings) {
            Ok(desired) => desired,
            Err(e) => return Err(self.fail(class, e).await),
        };

        if find_by_name(storage_classes, &name).is_some() {
            warn!("StorageClass {} already exists, will retry", name);
            return Ok(ReconcileOutcome::Requeue);
        }

        match self.storage_classes.create(&desired).await {
            Ok(_) => info!("Created StorageClass {}", name),
            Err(e) if e.is_already_exists() => {
                warn!("StorageClass {} was created concurrently, will retry", name);
                return Ok(ReconcileOutcome::Requeue);
            }
            Err(e) => {
                error!("Unable to create StorageClass {}: {}", name, e);
                return Err(self.fail(class, e).await);
            }
        }

        self.set_status(class, LocalStorageClassStatus::created()).await?;
        Ok(ReconcileOutcome::Done)
    }

    // =========================================================================
    // Update
    // =========================================================================

    async fn reconcile_update(
        &self,
        class: &mut LocalStorageClass,
        storage_classes: &[StorageClass],
    ) -> Result<ReconcileOutcome> {
        let name = class.name().to_string();

        let inventory = match self.inventory.list().await {
            Ok(inventory) => inventory,
            Err(e) => {
                let e = Error::Internal(format!("Unable to list LVMVolumeGroups: {}", e));
                return Err(self.fail(class, e).await);
            }
        };

        let bindings = match resolve_bindings(&inventory, class) {
            Ok(bindings) => bindings,
            Err(e) => return Err(self.fail(class, e).await),
        };

        let report = validate(class, &bindings, &inventory, storage_classes);
        if let Err(e) = report.into_result() {
            warn!("LocalStorageClass {} is invalid: {}", name, e);
            return Err(self.fail(class, e).await);
        }

        let Some(current) = find_by_name(storage_classes, &name) else {
            let e = Error::ResourceNotFound {
                kind: "StorageClass".into(),
                name: name.clone(),
            };
            return Err(self.fail(class, e).await);
        };

        let drifted = match has_diff(current, class, &bindings) {
            Ok(drifted) => drifted,
            Err(e) => return Err(self.fail(class, e).await),
        };

        if drifted {
            info!(
                "StorageClass {} does not match LocalStorageClass, recreating with {} LVMVolumeGroups",
                name,
                bindings.len()
            );
            let replacement = match build_replacement(class, &bindings, current) {
                Ok(replacement) => replacement,
                Err(e) => return Err(self.fail(class, e).await),
            };
            if let Err(e) = self.recreate(current, &replacement).await {
                error!("Unable to recreate StorageClass {}: {}", name, e);
                return Err(self.fail(class, e).await);
            }
            info!("Recreated StorageClass {}", name);
        }

        self.set_status(class, LocalStorageClassStatus::created()).await?;
        Ok(ReconcileOutcome::Done)
    }

    /// Provisioner parameters are immutable, so drift means delete then create
    async fn recreate(&self, current: &StorageClass, replacement: &StorageClass) -> Result<()> {
        self.delete_storage_class(current).await?;
        self.storage_classes.create(replacement).await?;
        Ok(())
    }

    // =========================================================================
    // Delete
    // =========================================================================

    async fn reconcile_delete(
        &self,
        class: &mut LocalStorageClass,
        storage_classes: &[StorageClass],
    ) -> Result<ReconcileOutcome> {
        let name = class.name().to_string();

        match find_by_name(storage_classes, &name) {
            None => info!("No StorageClass found for LocalStorageClass {}", name),
            Some(current) if !is_managed(current) => info!(
                "StorageClass {} does not belong to {}, leaving it in place",
                name, PROVISIONER
            ),
            Some(current) => {
                if let Err(e) = self.delete_storage_class(current).await {
                    error!("Unable to delete StorageClass {}: {}", name, e);
                    let e = Error::Internal(format!("Unable to delete a storage class, err: {}", e));
                    return Err(self.fail(class, e).await);
                }
                info!("Deleted StorageClass {}", name);
            }
        }

        if class.remove_finalizer() {
            if let Err(e) = self.local_classes.replace(class).await {
                error!("Unable to remove finalizer from LocalStorageClass {}: {}", name, e);
                let e = Error::Internal(format!("Unable to remove a finalizer, err: {}", e));
                return Err(self.fail(class, e).await);
            }
            debug!("Removed finalizer from LocalStorageClass {}", name);
        }

        Ok(ReconcileOutcome::Done)
    }

    /// Strip the finalizer from an owned StorageClass, then delete it
    async fn delete_storage_class(&self, current: &StorageClass) -> Result<()> {
        let name = current.metadata.name.clone().unwrap_or_default();
        if !is_managed(current) {
            return Err(Error::Conflict {
                kind: "StorageClass".into(),
                name: name.clone(),
                reason: format!("a storage class {} does not belong to {} provisioner", name, PROVISIONER),
            });
        }

        let mut current = current.clone();
        if let Some(finalizers) = current.metadata.finalizers.as_mut() {
            let before = finalizers.len();
            finalizers.retain(|f| f != CONTROLLER_FINALIZER && f != LEGACY_CONTROLLER_FINALIZER);
            if finalizers.len() != before {
                self.storage_classes.replace(&current).await?;
            }
        }

        self.storage_classes.delete(&name).await
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Write `status` unless it is already current
    async fn set_status(
        &self,
        class: &mut LocalStorageClass,
        status: LocalStorageClassStatus,
    ) -> Result<()> {
        if class.status.as_ref() == Some(&status) {
            return Ok(());
        }
        class.status = Some(status);
        match self.local_classes.replace_status(class).await {
            Ok(updated) => {
                *class = updated;
                Ok(())
            }
            Err(e) => {
                error!("Unable to update status of LocalStorageClass {}: {}", class.name(), e);
                Err(e)
            }
        }
    }

    /// Record `err` as a Failed status and return the error ending the pass.
    ///
    /// When the status write itself fails, that failure ends the pass instead.
    async fn fail(&self, class: &mut LocalStorageClass, err: Error) -> Error {
        let status = LocalStorageClassStatus::failed(err.status_reason());
        match self.set_status(class, status).await {
            Ok(()) => err,
            Err(status_err) => {
                warn!(
                    "Dropping error for LocalStorageClass {} after failed status write: {}",
                    class.name(),
                    err
                );
                status_err
            }
        }
    }
}
