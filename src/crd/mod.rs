//! Custom Resource Definitions for the Local Volume Operator
//!
//! This module contains all CRD types:
//! - LocalStorageClass: desired local storage tier, owned by this operator
//! - LVMVolumeGroup: volume group inventory, read-only
//! - LVMLogicalVolume: logical volume requests created by the provisioner

pub mod local_storage_class;
pub mod lvm_logical_volume;
pub mod lvm_volume_group;

pub use local_storage_class::*;
pub use lvm_logical_volume::*;
pub use lvm_volume_group::*;

// Re-export common types for convenience
pub use k8s_openapi::api::storage::v1::StorageClass;
pub use std::collections::BTreeMap;
