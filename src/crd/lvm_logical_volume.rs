//! LVMLogicalVolume CRD
//!
//! Request for one logical volume, fulfilled by the node-level LVM
//! controller. The provisioner creates these objects, resizes them by
//! editing `spec.size`, and watches `status` for convergence.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::core::ObjectMeta;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::constants::PROVISIONER_FINALIZER;
use crate::crd::{LvmType, ThinPoolRef};
use crate::domain::quantity::{parse_quantity, quantity_bytes};
use crate::error::Result;

/// LVMLogicalVolume describes one logical volume inside a volume group
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "storage.deckhouse.io",
    version = "v1alpha1",
    kind = "LVMLogicalVolume",
    plural = "lvmlogicalvolumes",
    status = "LVMLogicalVolumeStatus",
    schema = "disabled",
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct LVMLogicalVolumeSpec {
    /// Name of the logical volume as created by LVM on the node
    #[serde(rename = "actualLVNameOnTheNode")]
    pub actual_lv_name_on_the_node: String,

    #[serde(rename = "type")]
    pub lvm_type: LvmType,

    /// Requested size
    pub size: Quantity,

    /// LVMVolumeGroup object hosting the volume
    pub lvm_volume_group_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thin: Option<ThinPoolRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thick: Option<ThickLogicalVolumeSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThickLogicalVolumeSpec {
    #[serde(default)]
    pub contiguous: bool,
}

/// Observed state reported by the LVM controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LVMLogicalVolumeStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<LogicalVolumePhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_size: Option<Quantity>,
}

/// Logical volume lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalVolumePhase {
    Pending,
    Created,
    Resizing,
    Failed,
    /// Any phase the volume engine reports that this operator does not act on
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for LogicalVolumePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicalVolumePhase::Pending => write!(f, "Pending"),
            LogicalVolumePhase::Created => write!(f, "Created"),
            LogicalVolumePhase::Resizing => write!(f, "Resizing"),
            LogicalVolumePhase::Failed => write!(f, "Failed"),
            LogicalVolumePhase::Unknown => write!(f, "Unknown"),
        }
    }
}

impl LVMLogicalVolume {
    /// Build a new logical volume request carrying the provisioner finalizer
    pub fn with_finalizer(name: &str, spec: LVMLogicalVolumeSpec) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                finalizers: Some(vec![PROVISIONER_FINALIZER.to_string()]),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    /// Get the name of this logical volume
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    pub fn phase(&self) -> Option<LogicalVolumePhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    /// Reported size, zero until the LVM controller reports one
    pub fn actual_size_bytes(&self) -> Result<u64> {
        quantity_bytes(self.status.as_ref().and_then(|s| s.actual_size.as_ref()))
    }

    pub fn requested_size_bytes(&self) -> Result<u64> {
        parse_quantity(&self.spec.size.0)
    }

    /// Failure reason reported by the LVM controller
    pub fn failure_reason(&self) -> String {
        self.status
            .as_ref()
            .and_then(|s| s.reason.clone())
            .unwrap_or_default()
    }

    /// Strip the provisioner finalizer; returns true if it was present
    pub fn remove_finalizer(&mut self) -> bool {
        let Some(finalizers) = self.metadata.finalizers.as_mut() else {
            return false;
        };
        let before = finalizers.len();
        finalizers.retain(|f| f != PROVISIONER_FINALIZER);
        finalizers.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> LVMLogicalVolumeSpec {
        LVMLogicalVolumeSpec {
            actual_lv_name_on_the_node: "pvc-1".into(),
            lvm_type: LvmType::Thick,
            size: Quantity("10Gi".into()),
            lvm_volume_group_name: "vg-1".into(),
            thin: None,
            thick: Some(ThickLogicalVolumeSpec { contiguous: true }),
        }
    }

    #[test]
    fn test_with_finalizer() {
        let mut llv = LVMLogicalVolume::with_finalizer("pvc-1", spec());
        assert_eq!(llv.name(), "pvc-1");
        assert_eq!(
            llv.metadata.finalizers,
            Some(vec![PROVISIONER_FINALIZER.to_string()])
        );
        assert!(llv.remove_finalizer());
        assert!(!llv.remove_finalizer());
    }

    #[test]
    fn test_sizes() {
        let mut llv = LVMLogicalVolume::with_finalizer("pvc-1", spec());
        assert_eq!(llv.requested_size_bytes().unwrap(), 10 * 1024 * 1024 * 1024);
        assert_eq!(llv.actual_size_bytes().unwrap(), 0);

        llv.status = Some(LVMLogicalVolumeStatus {
            phase: Some(LogicalVolumePhase::Created),
            reason: None,
            actual_size: Some(Quantity("10244Mi".into())),
        });
        assert_eq!(llv.actual_size_bytes().unwrap(), 10244 * 1024 * 1024);
        assert_eq!(llv.phase(), Some(LogicalVolumePhase::Created));
    }

    #[test]
    fn test_decode_unrecognised_phase() {
        let llv: LVMLogicalVolume = serde_json::from_value(serde_json::json!({
            "apiVersion": "storage.deckhouse.io/v1alpha1",
            "kind": "LVMLogicalVolume",
            "metadata": {"name": "pvc-1"},
            "spec": {
                "actualLVNameOnTheNode": "pvc-1",
                "type": "Thick",
                "size": "1Gi",
                "lvmVolumeGroupName": "vg-1"
            },
            "status": {"phase": "Cleaning", "actualSize": "1Gi"}
        }))
        .unwrap();
        assert_eq!(llv.phase(), Some(LogicalVolumePhase::Unknown));
    }

    #[test]
    fn test_wire_format() {
        let llv = LVMLogicalVolume::with_finalizer("pvc-1", spec());
        let value = serde_json::to_value(&llv).unwrap();
        assert_eq!(value["spec"]["actualLVNameOnTheNode"], "pvc-1");
        assert_eq!(value["spec"]["type"], "Thick");
        assert_eq!(value["spec"]["lvmVolumeGroupName"], "vg-1");
        assert_eq!(value["spec"]["thick"]["contiguous"], true);
    }
}
