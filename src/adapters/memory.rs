//! In-memory cluster adapter
//!
//! Implements every domain port over plain maps with the API server
//! behaviors the operator relies on:
//! - resource versions, with `Conflict` on a stale replace
//! - finalizers: deleting a finalized object only sets its deletion
//!   timestamp; it disappears once the last finalizer is removed
//! - status subresource: `replace` keeps the stored status and
//!   `replace_status` changes nothing else
//!
//! Successful writes are journaled in order. Tests can inject one-shot failures and let
//! logical volumes converge on their own after a number of status polls.

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::crd::{
    LVMLogicalVolume, LVMLogicalVolumeStatus, LVMVolumeGroup, LocalStorageClass,
    LogicalVolumePhase, StorageClass,
};
use crate::domain::{
    LocalStorageClassApi, LogicalVolumeEngine, StorageClassApi, VolumeGroupInventory,
};
use crate::error::{Error, Result};

/// API call against the in-memory cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    ListStorageClasses,
    CreateStorageClass(String),
    ReplaceStorageClass(String),
    DeleteStorageClass(String),
    ReplaceLocalStorageClass(String),
    ReplaceLocalStorageClassStatus(String),
    ListVolumeGroups,
    CreateLogicalVolume(String),
    GetLogicalVolume(String),
    ReplaceLogicalVolume(String),
    DeleteLogicalVolume(String),
}

impl Operation {
    /// Whether the call mutates state; only mutations are journaled
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            Operation::ListStorageClasses
                | Operation::ListVolumeGroups
                | Operation::GetLogicalVolume(_)
        )
    }

    /// StorageClass create or delete
    pub fn is_storage_class_lifecycle(&self) -> bool {
        matches!(
            self,
            Operation::CreateStorageClass(_) | Operation::DeleteStorageClass(_)
        )
    }
}

/// Automatic logical volume convergence
#[derive(Debug, Clone, Copy)]
pub struct Convergence {
    /// Status polls before the volume reports Created
    pub after_polls: u32,
    /// Reported sizes are rounded up to this extent size
    pub extent_bytes: u64,
}

type FailureFactory = Box<dyn Fn() -> Error + Send + Sync>;

#[derive(Default)]
struct State {
    storage_classes: BTreeMap<String, StorageClass>,
    local_classes: BTreeMap<String, LocalStorageClass>,
    groups: BTreeMap<String, LVMVolumeGroup>,
    volumes: BTreeMap<String, LVMLogicalVolume>,
    polls: BTreeMap<String, u32>,
    version: u64,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// Cluster state held in memory
pub struct InMemoryCluster {
    state: RwLock<State>,
    journal: Mutex<Vec<Operation>>,
    failures: Mutex<Vec<(Operation, FailureFactory)>>,
    convergence: Mutex<Option<Convergence>>,
}

impl InMemoryCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(State::default()),
            journal: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            convergence: Mutex::new(None),
        })
    }

    // =========================================================================
    // Test Controls
    // =========================================================================

    /// Make the next `operation` fail with the error built by `make`
    pub fn fail_next(&self, operation: Operation, make: impl Fn() -> Error + Send + Sync + 'static) {
        self.failures.lock().push((operation, Box::new(make)));
    }

    /// Let logical volumes converge on their own
    pub fn set_convergence(&self, convergence: Option<Convergence>) {
        *self.convergence.lock() = convergence;
    }

    /// Every write performed so far, in order
    pub fn journal(&self) -> Vec<Operation> {
        self.journal.lock().clone()
    }

    /// Fail with an injected error if one is pending for `operation`
    fn inject(&self, operation: &Operation) -> Result<()> {
        let mut failures = self.failures.lock();
        if let Some(index) = failures.iter().position(|(op, _)| op == operation) {
            let (_, make) = failures.remove(index);
            debug!("Injected failure for {:?}", operation);
            return Err(make());
        }
        Ok(())
    }

    /// Journal `operation` once the write it names has succeeded
    fn commit<T>(&self, operation: Operation, result: Result<T>) -> Result<T> {
        if result.is_ok() && operation.is_write() {
            self.journal.lock().push(operation);
        }
        result
    }

    // =========================================================================
    // Direct State Access
    // =========================================================================

    /// Store a StorageClass as another actor would, bypassing version checks
    pub fn insert_storage_class(&self, class: StorageClass) {
        let mut state = self.state.write();
        let mut class = class;
        class.meta_mut().resource_version = Some(state.next_version());
        state.storage_classes.insert(class.name_any(), class);
    }

    /// Store a LocalStorageClass as its owner would, bypassing version checks
    pub fn insert_local_storage_class(&self, class: LocalStorageClass) {
        let mut state = self.state.write();
        let mut class = class;
        class.meta_mut().resource_version = Some(state.next_version());
        state.local_classes.insert(class.name_any(), class);
    }

    pub fn insert_volume_group(&self, group: LVMVolumeGroup) {
        let mut state = self.state.write();
        let mut group = group;
        group.meta_mut().resource_version = Some(state.next_version());
        state.groups.insert(group.name_any(), group);
    }

    pub fn insert_logical_volume(&self, volume: LVMLogicalVolume) {
        let mut state = self.state.write();
        let mut volume = volume;
        volume.meta_mut().resource_version = Some(state.next_version());
        state.volumes.insert(volume.name_any(), volume);
    }

    /// Delete a LocalStorageClass as its owner would
    pub fn mark_local_storage_class_deleted(&self, name: &str) {
        let mut state = self.state.write();
        let version = state.next_version();
        mark_deleted(&mut state.local_classes, name, version);
    }

    /// Overwrite the status the LVM controller reports for a volume
    pub fn set_volume_status(&self, name: &str, status: LVMLogicalVolumeStatus) {
        let mut state = self.state.write();
        let version = state.next_version();
        if let Some(volume) = state.volumes.get_mut(name) {
            volume.status = Some(status);
            volume.meta_mut().resource_version = Some(version);
        }
    }

    pub fn storage_class(&self, name: &str) -> Option<StorageClass> {
        self.state.read().storage_classes.get(name).cloned()
    }

    pub fn local_storage_class(&self, name: &str) -> Option<LocalStorageClass> {
        self.state.read().local_classes.get(name).cloned()
    }

    pub fn logical_volume(&self, name: &str) -> Option<LVMLogicalVolume> {
        self.state.read().volumes.get(name).cloned()
    }

    /// Advance the simulated LVM controller for one status poll of `name`
    fn poll_volume(&self, state: &mut State, name: &str) -> Result<()> {
        let Some(convergence) = *self.convergence.lock() else {
            return Ok(());
        };
        let polls = state.polls.entry(name.to_string()).or_insert(0);
        *polls += 1;
        if *polls < convergence.after_polls {
            return Ok(());
        }

        let version = state.next_version();
        let Some(volume) = state.volumes.get_mut(name) else {
            return Ok(());
        };
        let requested = volume.requested_size_bytes()?;
        let extent = convergence.extent_bytes.max(1);
        let actual = requested.div_ceil(extent) * extent;

        volume.status = Some(LVMLogicalVolumeStatus {
            phase: Some(LogicalVolumePhase::Created),
            reason: None,
            actual_size: Some(Quantity(actual.to_string())),
        });
        volume.meta_mut().resource_version = Some(version);
        Ok(())
    }
}

// =============================================================================
// Generic Object Semantics
// =============================================================================

fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).to_string()
}

fn create_object<K>(map: &mut BTreeMap<String, K>, object: &K, version: String) -> Result<K>
where
    K: Resource<DynamicType = ()> + Clone,
{
    let name = object.name_any();
    if map.contains_key(&name) {
        return Err(Error::ResourceExists {
            kind: kind_of::<K>(),
            name,
        });
    }
    let mut stored = object.clone();
    stored.meta_mut().resource_version = Some(version);
    stored.meta_mut().deletion_timestamp = None;
    map.insert(name, stored.clone());
    Ok(stored)
}

/// Replace `object`; `merge` decides what is taken from the request
fn replace_object<K>(
    map: &mut BTreeMap<String, K>,
    object: &K,
    version: String,
    merge: impl FnOnce(&K, &K) -> K,
) -> Result<K>
where
    K: Resource<DynamicType = ()> + Clone,
{
    let name = object.name_any();
    let Some(stored) = map.get(&name) else {
        return Err(Error::ResourceNotFound {
            kind: kind_of::<K>(),
            name,
        });
    };

    if let Some(requested) = object.meta().resource_version.as_ref() {
        if stored.meta().resource_version.as_ref() != Some(requested) {
            return Err(Error::Conflict {
                kind: kind_of::<K>(),
                name,
                reason: "the object has been modified; please apply your changes to the latest version".into(),
            });
        }
    }

    let mut updated = merge(stored, object);
    updated.meta_mut().resource_version = Some(version);
    updated.meta_mut().deletion_timestamp = stored.meta().deletion_timestamp.clone();

    if updated.meta().deletion_timestamp.is_some() && updated.finalizers().is_empty() {
        map.remove(&name);
    } else {
        map.insert(name, updated.clone());
    }
    Ok(updated)
}

fn delete_object<K>(map: &mut BTreeMap<String, K>, name: &str, version: String)
where
    K: Resource<DynamicType = ()> + Clone,
{
    mark_deleted(map, name, version);
}

fn mark_deleted<K>(map: &mut BTreeMap<String, K>, name: &str, version: String)
where
    K: Resource<DynamicType = ()> + Clone,
{
    let Some(object) = map.get_mut(name) else {
        return;
    };
    if object.finalizers().is_empty() {
        map.remove(name);
        return;
    }
    if object.meta().deletion_timestamp.is_none() {
        object.meta_mut().deletion_timestamp = Some(Time(Utc::now()));
        object.meta_mut().resource_version = Some(version);
    }
}

fn take_request<K: Clone>(_stored: &K, requested: &K) -> K {
    requested.clone()
}

// =============================================================================
// Port Implementations
// =============================================================================

#[async_trait]
impl StorageClassApi for InMemoryCluster {
    async fn list(&self) -> Result<Vec<StorageClass>> {
        self.inject(&Operation::ListStorageClasses)?;
        Ok(self.state.read().storage_classes.values().cloned().collect())
    }

    async fn get(&self, name: &str) -> Result<Option<StorageClass>> {
        Ok(self.storage_class(name))
    }

    async fn create(&self, class: &StorageClass) -> Result<StorageClass> {
        let operation = Operation::CreateStorageClass(class.name_any());
        self.inject(&operation)?;
        let mut state = self.state.write();
        let version = state.next_version();
        self.commit(operation, create_object(&mut state.storage_classes, class, version))
    }

    async fn replace(&self, class: &StorageClass) -> Result<StorageClass> {
        let operation = Operation::ReplaceStorageClass(class.name_any());
        self.inject(&operation)?;
        let mut state = self.state.write();
        let version = state.next_version();
        let result = replace_object(&mut state.storage_classes, class, version, take_request);
        self.commit(operation, result)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let operation = Operation::DeleteStorageClass(name.to_string());
        self.inject(&operation)?;
        let mut state = self.state.write();
        let version = state.next_version();
        delete_object(&mut state.storage_classes, name, version);
        self.commit(operation, Ok(()))
    }
}

#[async_trait]
impl LocalStorageClassApi for InMemoryCluster {
    async fn list(&self) -> Result<Vec<LocalStorageClass>> {
        Ok(self.state.read().local_classes.values().cloned().collect())
    }

    async fn get(&self, name: &str) -> Result<Option<LocalStorageClass>> {
        Ok(self.local_storage_class(name))
    }

    async fn replace(&self, class: &LocalStorageClass) -> Result<LocalStorageClass> {
        let operation = Operation::ReplaceLocalStorageClass(class.name_any());
        self.inject(&operation)?;
        let mut state = self.state.write();
        let version = state.next_version();
        let result = replace_object(&mut state.local_classes, class, version, |stored, requested| {
            let mut updated = requested.clone();
            updated.status = stored.status.clone();
            updated
        });
        self.commit(operation, result)
    }

    async fn replace_status(&self, class: &LocalStorageClass) -> Result<LocalStorageClass> {
        let operation = Operation::ReplaceLocalStorageClassStatus(class.name_any());
        self.inject(&operation)?;
        let mut state = self.state.write();
        let version = state.next_version();
        let result = replace_object(&mut state.local_classes, class, version, |stored, requested| {
            let mut updated = stored.clone();
            updated.status = requested.status.clone();
            updated
        });
        self.commit(operation, result)
    }
}

#[async_trait]
impl VolumeGroupInventory for InMemoryCluster {
    async fn list(&self) -> Result<Vec<LVMVolumeGroup>> {
        self.inject(&Operation::ListVolumeGroups)?;
        Ok(self.state.read().groups.values().cloned().collect())
    }

    async fn get(&self, name: &str) -> Result<Option<LVMVolumeGroup>> {
        Ok(self.state.read().groups.get(name).cloned())
    }
}

#[async_trait]
impl LogicalVolumeEngine for InMemoryCluster {
    async fn create(&self, volume: &LVMLogicalVolume) -> Result<LVMLogicalVolume> {
        let operation = Operation::CreateLogicalVolume(volume.name_any());
        self.inject(&operation)?;
        let mut state = self.state.write();
        let version = state.next_version();
        let result = create_object(&mut state.volumes, volume, version);
        if let Ok(created) = result.as_ref() {
            state.polls.remove(&created.name_any());
        }
        self.commit(operation, result)
    }

    async fn get(&self, name: &str) -> Result<Option<LVMLogicalVolume>> {
        self.inject(&Operation::GetLogicalVolume(name.to_string()))?;
        let mut state = self.state.write();
        if state.volumes.contains_key(name) {
            self.poll_volume(&mut state, name)?;
        }
        Ok(state.volumes.get(name).cloned())
    }

    async fn replace(&self, volume: &LVMLogicalVolume) -> Result<LVMLogicalVolume> {
        let operation = Operation::ReplaceLogicalVolume(volume.name_any());
        self.inject(&operation)?;
        let mut state = self.state.write();
        let version = state.next_version();
        let resized = state
            .volumes
            .get(&volume.name_any())
            .map(|stored| stored.spec.size != volume.spec.size)
            .unwrap_or(false);

        let result = replace_object(&mut state.volumes, volume, version, |stored, requested| {
            let mut updated = requested.clone();
            updated.status = stored.status.clone();
            if resized {
                if let Some(status) = updated.status.as_mut() {
                    status.phase = Some(LogicalVolumePhase::Resizing);
                }
            }
            updated
        });
        if resized && result.is_ok() {
            state.polls.remove(&volume.name_any());
        }
        self.commit(operation, result)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let operation = Operation::DeleteLogicalVolume(name.to_string());
        self.inject(&operation)?;
        let mut state = self.state.write();
        let version = state.next_version();
        delete_object(&mut state.volumes, name, version);
        state.polls.remove(name);
        self.commit(operation, Ok(()))
    }
}
