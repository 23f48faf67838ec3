//! LVMVolumeGroup CRD
//!
//! Inventory entry published by the node-level LVM controller. This operator
//! only reads it: labels for selection, nodes for placement, sizes for
//! capacity checks.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::domain::quantity::quantity_bytes;
use crate::error::Result;

/// LVMVolumeGroup describes one LVM volume group on one or more nodes
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "storage.deckhouse.io",
    version = "v1alpha1",
    kind = "LVMVolumeGroup",
    plural = "lvmvolumegroups",
    status = "LVMVolumeGroupStatus",
    schema = "disabled",
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct LVMVolumeGroupSpec {
    /// Name of the volume group as seen by LVM on the node
    #[serde(rename = "actualVGNameOnTheNode", default)]
    pub actual_vg_name_on_the_node: String,
}

/// Observed state of the volume group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LVMVolumeGroupStatus {
    #[serde(default)]
    pub nodes: Vec<LVMVolumeGroupNode>,

    #[serde(rename = "vgSize", default, skip_serializing_if = "Option::is_none")]
    pub vg_size: Option<Quantity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated_size: Option<Quantity>,

    #[serde(default)]
    pub thin_pools: Vec<LVMVolumeGroupThinPool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LVMVolumeGroupNode {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LVMVolumeGroupThinPool {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_size: Option<Quantity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_size: Option<Quantity>,
}

impl LVMVolumeGroup {
    /// Get the name of this volume group
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    /// Names of the nodes the group spans
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.status
            .iter()
            .flat_map(|s| s.nodes.iter())
            .map(|n| n.name.as_str())
    }

    /// Node hosting the group; local groups live on exactly one node
    pub fn primary_node(&self) -> Option<&str> {
        self.node_names().next()
    }

    /// Whether the group currently hosts the named thin pool
    pub fn has_thin_pool(&self, pool: &str) -> bool {
        self.thin_pool(pool).is_some()
    }

    fn thin_pool(&self, pool: &str) -> Option<&LVMVolumeGroupThinPool> {
        self.status
            .as_ref()
            .and_then(|s| s.thin_pools.iter().find(|tp| tp.name == pool))
    }

    /// Unallocated bytes in the volume group
    pub fn free_bytes(&self) -> Result<u64> {
        let Some(status) = self.status.as_ref() else {
            return Ok(0);
        };
        let size = quantity_bytes(status.vg_size.as_ref())?;
        let allocated = quantity_bytes(status.allocated_size.as_ref())?;
        Ok(size.saturating_sub(allocated))
    }

    /// Unused bytes in the named thin pool, `None` if the pool is absent
    pub fn thin_pool_free_bytes(&self, pool: &str) -> Result<Option<u64>> {
        let Some(tp) = self.thin_pool(pool) else {
            return Ok(None);
        };
        let actual = quantity_bytes(tp.actual_size.as_ref())?;
        let used = quantity_bytes(tp.used_size.as_ref())?;
        Ok(Some(actual.saturating_sub(used)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> LVMVolumeGroup {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "storage.deckhouse.io/v1alpha1",
            "kind": "LVMVolumeGroup",
            "metadata": {"name": "vg-1-on-worker-0", "labels": {"tier": "fast"}},
            "spec": {"actualVGNameOnTheNode": "vg-1"},
            "status": {
                "nodes": [{"name": "worker-0"}],
                "vgSize": "100Gi",
                "allocatedSize": "40Gi",
                "thinPools": [{"name": "pool", "actualSize": "20Gi", "usedSize": "5Gi"}]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_capacity_helpers() {
        let lvg = group();
        assert_eq!(lvg.name(), "vg-1-on-worker-0");
        assert_eq!(lvg.spec.actual_vg_name_on_the_node, "vg-1");
        assert_eq!(lvg.primary_node(), Some("worker-0"));
        assert_eq!(lvg.free_bytes().unwrap(), 60 * 1024 * 1024 * 1024);
        assert_eq!(
            lvg.thin_pool_free_bytes("pool").unwrap(),
            Some(15 * 1024 * 1024 * 1024)
        );
        assert_eq!(lvg.thin_pool_free_bytes("missing").unwrap(), None);
        assert!(lvg.has_thin_pool("pool"));
    }

    #[test]
    fn test_group_without_status() {
        let mut lvg = group();
        lvg.status = None;
        assert_eq!(lvg.primary_node(), None);
        assert_eq!(lvg.free_bytes().unwrap(), 0);
        assert!(!lvg.has_thin_pool("pool"));
    }
}
