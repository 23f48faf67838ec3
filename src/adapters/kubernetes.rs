//! Kubernetes adapter
//!
//! Implements the domain ports over `kube::Api`. Reads are retried with
//! exponential backoff on transient API failures; writes are attempted once
//! and left to the caller's requeue policy.

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::crd::{LVMLogicalVolume, LVMVolumeGroup, LocalStorageClass, StorageClass};
use crate::domain::{
    LocalStorageClassApi, LogicalVolumeEngine, StorageClassApi, VolumeGroupInventory,
};
use crate::error::{Error, Result};

/// Upper bound on the time spent retrying a single read
const READ_RETRY_BUDGET: Duration = Duration::from_secs(10);

/// Cluster access through the Kubernetes API server
#[derive(Clone)]
pub struct KubeCluster {
    storage_classes: Api<StorageClass>,
    local_classes: Api<LocalStorageClass>,
    groups: Api<LVMVolumeGroup>,
    volumes: Api<LVMLogicalVolume>,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self {
            storage_classes: Api::all(client.clone()),
            local_classes: Api::all(client.clone()),
            groups: Api::all(client.clone()),
            volumes: Api::all(client),
        }
    }
}

/// Whether a kube error is worth retrying
fn is_transient(error: &kube::Error) -> bool {
    match error {
        kube::Error::Api(response) => response.code == 429 || response.code >= 500,
        kube::Error::SerdeError(_) => false,
        _ => true,
    }
}

/// Run a read with bounded exponential backoff
async fn read<T, F, Fut>(what: &str, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = kube::Result<T>>,
{
    let policy = ExponentialBackoff {
        max_elapsed_time: Some(READ_RETRY_BUDGET),
        ..Default::default()
    };

    backoff::future::retry(policy, || {
        let attempt = operation();
        async move {
            attempt.await.map_err(|e| {
                if is_transient(&e) {
                    warn!("Transient error reading {}, retrying: {}", what, e);
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        }
    })
    .await
    .map_err(Error::from)
}

fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).to_string()
}

async fn list_all<K>(api: &Api<K>) -> Result<Vec<K>>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    let params = ListParams::default();
    let items = read(&kind_of::<K>(), || api.list(&params)).await?;
    Ok(items.items)
}

async fn get_opt<K>(api: &Api<K>, name: &str) -> Result<Option<K>>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    read(&format!("{}/{}", kind_of::<K>(), name), || api.get_opt(name)).await
}

async fn create<K>(api: &Api<K>, object: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + serde::Serialize + Debug,
{
    match api.create(&PostParams::default(), object).await {
        Ok(created) => Ok(created),
        Err(kube::Error::Api(response)) if response.code == 409 => Err(Error::ResourceExists {
            kind: kind_of::<K>(),
            name: object.name_any(),
        }),
        Err(e) => Err(e.into()),
    }
}

fn conflict<K: Resource<DynamicType = ()>>(name: &str, e: kube::Error) -> Error {
    match e {
        kube::Error::Api(response) if response.code == 409 => Error::Conflict {
            kind: kind_of::<K>(),
            name: name.to_string(),
            reason: response.message,
        },
        e => e.into(),
    }
}

async fn replace<K>(api: &Api<K>, object: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + serde::Serialize + Debug,
{
    let name = object.name_any();
    api.replace(&name, &PostParams::default(), object)
        .await
        .map_err(|e| conflict::<K>(&name, e))
}

async fn delete<K>(api: &Api<K>, name: &str) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(response)) if response.code == 404 => {
            debug!("{} {} already gone", kind_of::<K>(), name);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl StorageClassApi for KubeCluster {
    async fn list(&self) -> Result<Vec<StorageClass>> {
        list_all(&self.storage_classes).await
    }

    async fn get(&self, name: &str) -> Result<Option<StorageClass>> {
        get_opt(&self.storage_classes, name).await
    }

    async fn create(&self, class: &StorageClass) -> Result<StorageClass> {
        create(&self.storage_classes, class).await
    }

    async fn replace(&self, class: &StorageClass) -> Result<StorageClass> {
        replace(&self.storage_classes, class).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        delete(&self.storage_classes, name).await
    }
}

#[async_trait]
impl LocalStorageClassApi for KubeCluster {
    async fn list(&self) -> Result<Vec<LocalStorageClass>> {
        list_all(&self.local_classes).await
    }

    async fn get(&self, name: &str) -> Result<Option<LocalStorageClass>> {
        get_opt(&self.local_classes, name).await
    }

    async fn replace(&self, class: &LocalStorageClass) -> Result<LocalStorageClass> {
        replace(&self.local_classes, class).await
    }

    async fn replace_status(&self, class: &LocalStorageClass) -> Result<LocalStorageClass> {
        let name = class.name_any();
        let body = serde_json::to_vec(class)?;
        self.local_classes
            .replace_status(&name, &PostParams::default(), body)
            .await
            .map_err(|e| conflict::<LocalStorageClass>(&name, e))
    }
}

#[async_trait]
impl VolumeGroupInventory for KubeCluster {
    async fn list(&self) -> Result<Vec<LVMVolumeGroup>> {
        list_all(&self.groups).await
    }

    async fn get(&self, name: &str) -> Result<Option<LVMVolumeGroup>> {
        get_opt(&self.groups, name).await
    }
}

#[async_trait]
impl LogicalVolumeEngine for KubeCluster {
    async fn create(&self, volume: &LVMLogicalVolume) -> Result<LVMLogicalVolume> {
        create(&self.volumes, volume).await
    }

    async fn get(&self, name: &str) -> Result<Option<LVMLogicalVolume>> {
        get_opt(&self.volumes, name).await
    }

    async fn replace(&self, volume: &LVMLogicalVolume) -> Result<LVMLogicalVolume> {
        replace(&self.volumes, volume).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        delete(&self.volumes, name).await
    }
}
