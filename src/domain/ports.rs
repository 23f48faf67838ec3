//! Domain Ports - Core trait definitions for the operator
//!
//! These traits define the boundaries between the reconciliation and
//! provisioning logic and the cluster API. Adapters implement these traits
//! to provide concrete functionality.
//!
//! Conventions shared by every port:
//! - `get` returns `Ok(None)` for a missing object
//! - `create` fails with [`Error::ResourceExists`](crate::Error::ResourceExists)
//!   when the name is taken
//! - `replace` fails with [`Error::Conflict`](crate::Error::Conflict) on a
//!   stale resource version
//! - `delete` of a missing object succeeds

use crate::crd::{LVMLogicalVolume, LVMVolumeGroup, LocalStorageClass, StorageClass};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

// =============================================================================
// Storage Classes
// =============================================================================

/// Platform StorageClass objects
#[async_trait]
pub trait StorageClassApi: Send + Sync {
    /// List every StorageClass in the cluster
    async fn list(&self) -> Result<Vec<StorageClass>>;

    /// Get a StorageClass by name
    async fn get(&self, name: &str) -> Result<Option<StorageClass>>;

    /// Create a StorageClass
    async fn create(&self, class: &StorageClass) -> Result<StorageClass>;

    /// Replace a StorageClass, honoring its resource version
    async fn replace(&self, class: &StorageClass) -> Result<StorageClass>;

    /// Delete a StorageClass
    async fn delete(&self, name: &str) -> Result<()>;
}

/// LocalStorageClass objects; only metadata and status are written
#[async_trait]
pub trait LocalStorageClassApi: Send + Sync {
    async fn list(&self) -> Result<Vec<LocalStorageClass>>;

    async fn get(&self, name: &str) -> Result<Option<LocalStorageClass>>;

    /// Replace the object; used for finalizer edits
    async fn replace(&self, class: &LocalStorageClass) -> Result<LocalStorageClass>;

    /// Replace the status subresource
    async fn replace_status(&self, class: &LocalStorageClass) -> Result<LocalStorageClass>;
}

// =============================================================================
// LVM Inventory and Volumes
// =============================================================================

/// Read-only view of LVMVolumeGroup objects
#[async_trait]
pub trait VolumeGroupInventory: Send + Sync {
    async fn list(&self) -> Result<Vec<LVMVolumeGroup>>;

    async fn get(&self, name: &str) -> Result<Option<LVMVolumeGroup>>;
}

/// LVMLogicalVolume objects, fulfilled by the node-level LVM controller
#[async_trait]
pub trait LogicalVolumeEngine: Send + Sync {
    async fn create(&self, volume: &LVMLogicalVolume) -> Result<LVMLogicalVolume>;

    async fn get(&self, name: &str) -> Result<Option<LVMLogicalVolume>>;

    async fn replace(&self, volume: &LVMLogicalVolume) -> Result<LVMLogicalVolume>;

    async fn delete(&self, name: &str) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc-wrapped traits
// =============================================================================

pub type StorageClassApiRef = Arc<dyn StorageClassApi>;
pub type LocalStorageClassApiRef = Arc<dyn LocalStorageClassApi>;
pub type VolumeGroupInventoryRef = Arc<dyn VolumeGroupInventory>;
pub type LogicalVolumeEngineRef = Arc<dyn LogicalVolumeEngine>;
