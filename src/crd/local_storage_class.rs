//! LocalStorageClass CRD
//!
//! Declares a node-local LVM storage tier. The controller materializes each
//! LocalStorageClass into a same-named StorageClass bound to the local
//! volume provisioner.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::constants::{CONTROLLER_FINALIZER, LEGACY_CONTROLLER_FINALIZER};

// =============================================================================
// LocalStorageClass CRD
// =============================================================================

/// LocalStorageClass declares which LVM volume groups back a storage class
/// and how volumes carved from them behave.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.deckhouse.io",
    version = "v1alpha1",
    kind = "LocalStorageClass",
    plural = "localstorageclasses",
    shortname = "lsc",
    status = "LocalStorageClassStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Reason", "type": "string", "jsonPath": ".status.reason", "priority": 1}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct LocalStorageClassSpec {
    /// Reclaim policy copied into the managed StorageClass
    pub reclaim_policy: ReclaimPolicy,

    /// Binding mode copied into the managed StorageClass
    pub volume_binding_mode: VolumeBindingMode,

    /// LVM configuration; required for the class to be materialized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lvm: Option<LvmSpec>,

    /// Filesystem for volumes of this class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_type: Option<String>,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// LVM settings of a LocalStorageClass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LvmSpec {
    /// Thick or Thin provisioning
    #[serde(rename = "type")]
    pub lvm_type: LvmType,

    /// Explicitly listed volume groups
    #[serde(default)]
    pub lvm_volume_groups: Vec<LvmVolumeGroupRef>,

    /// Label selector over LVMVolumeGroup objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lvm_volume_group_selector: Option<LabelSelector>,

    /// Thin pool used for groups matched by the selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thin_pool_name: Option<String>,

    /// Cleanup policy applied to deleted volumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_cleanup: Option<String>,

    /// Thick provisioning options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thick: Option<ThickSpec>,
}

/// Reference to a volume group, optionally narrowed to one of its thin pools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LvmVolumeGroupRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thin: Option<ThinPoolRef>,
}

/// Thin pool reference
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ThinPoolRef {
    pub pool_name: String,
}

/// Thick provisioning options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ThickSpec {
    #[serde(default)]
    pub contiguous: bool,
}

/// LVM allocation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum LvmType {
    Thick,
    Thin,
}

impl std::fmt::Display for LvmType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LvmType::Thick => write!(f, "Thick"),
            LvmType::Thin => write!(f, "Thin"),
        }
    }
}

impl std::str::FromStr for LvmType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Thick" => Ok(LvmType::Thick),
            "Thin" => Ok(LvmType::Thin),
            other => Err(format!("unknown LVM type: {}", other)),
        }
    }
}

/// StorageClass reclaim policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ReclaimPolicy {
    #[default]
    Delete,
    Retain,
}

impl std::fmt::Display for ReclaimPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReclaimPolicy::Delete => write!(f, "Delete"),
            ReclaimPolicy::Retain => write!(f, "Retain"),
        }
    }
}

/// When a volume is bound to a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum VolumeBindingMode {
    Immediate,
    #[default]
    WaitForFirstConsumer,
}

impl std::fmt::Display for VolumeBindingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeBindingMode::Immediate => write!(f, "Immediate"),
            VolumeBindingMode::WaitForFirstConsumer => write!(f, "WaitForFirstConsumer"),
        }
    }
}

impl std::str::FromStr for VolumeBindingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Immediate" => Ok(VolumeBindingMode::Immediate),
            "WaitForFirstConsumer" => Ok(VolumeBindingMode::WaitForFirstConsumer),
            other => Err(format!("unknown volume binding mode: {}", other)),
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Status of the LocalStorageClass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalStorageClassStatus {
    /// Current phase; absent until the first pass finishes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<LocalStorageClassPhase>,

    /// Why the class is not Created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// LocalStorageClass lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum LocalStorageClassPhase {
    /// Empty phase, as written before the first pass finishes
    #[serde(rename = "")]
    Pending,
    Created,
    Failed,
}

impl std::fmt::Display for LocalStorageClassPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalStorageClassPhase::Pending => Ok(()),
            LocalStorageClassPhase::Created => write!(f, "Created"),
            LocalStorageClassPhase::Failed => write!(f, "Failed"),
        }
    }
}

impl LocalStorageClassStatus {
    pub fn created() -> Self {
        Self {
            phase: Some(LocalStorageClassPhase::Created),
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            phase: Some(LocalStorageClassPhase::Failed),
            reason: Some(reason.into()),
        }
    }
}

// =============================================================================
// Implementations
// =============================================================================

impl LocalStorageClass {
    /// Get the name of this class
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    /// Whether a deletion timestamp is set
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the controller finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .map(|f| f.iter().any(|x| x == CONTROLLER_FINALIZER))
            .unwrap_or(false)
    }

    /// Add the controller finalizer; returns false when already present
    pub fn add_finalizer(&mut self) -> bool {
        if self.has_finalizer() {
            return false;
        }
        self.metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(CONTROLLER_FINALIZER.to_string());
        true
    }

    /// Strip both the current and the legacy finalizer; returns true if any was removed
    pub fn remove_finalizer(&mut self) -> bool {
        let Some(finalizers) = self.metadata.finalizers.as_mut() else {
            return false;
        };
        let before = finalizers.len();
        finalizers.retain(|f| f != CONTROLLER_FINALIZER && f != LEGACY_CONTROLLER_FINALIZER);
        finalizers.len() != before
    }

    /// Whether the class selects groups by label
    pub fn uses_selector(&self) -> bool {
        self.spec
            .lvm
            .as_ref()
            .map(|lvm| lvm.lvm_volume_group_selector.is_some())
            .unwrap_or(false)
    }

    /// Whether the class names the given group explicitly
    pub fn references_group(&self, group: &str) -> bool {
        self.spec
            .lvm
            .as_ref()
            .map(|lvm| lvm.lvm_volume_groups.iter().any(|g| g.name == group))
            .unwrap_or(false)
    }

    /// Current phase, if any pass has finished
    pub fn phase(&self) -> Option<LocalStorageClassPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    /// Whether the last pass failed
    pub fn is_failed(&self) -> bool {
        self.phase() == Some(LocalStorageClassPhase::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;

    fn class(finalizers: Vec<&str>) -> LocalStorageClass {
        LocalStorageClass {
            metadata: ObjectMeta {
                name: Some("local-thick".into()),
                finalizers: Some(finalizers.into_iter().map(String::from).collect()),
                ..Default::default()
            },
            spec: LocalStorageClassSpec {
                reclaim_policy: ReclaimPolicy::Delete,
                volume_binding_mode: VolumeBindingMode::Immediate,
                lvm: None,
                fs_type: None,
            },
            status: None,
        }
    }

    #[test]
    fn test_deserialize_empty_phase() {
        let lsc: LocalStorageClass = serde_json::from_value(serde_json::json!({
            "apiVersion": "storage.deckhouse.io/v1alpha1",
            "kind": "LocalStorageClass",
            "metadata": {"name": "local-thick"},
            "spec": {
                "reclaimPolicy": "Delete",
                "volumeBindingMode": "Immediate",
                "lvm": {"type": "Thick", "lvmVolumeGroups": [{"name": "vg-1"}]}
            },
            "status": {"phase": ""}
        }))
        .unwrap();
        assert_eq!(lsc.phase(), Some(LocalStorageClassPhase::Pending));
        assert!(!lsc.is_failed());

        let value = serde_json::to_value(lsc.status.as_ref().unwrap()).unwrap();
        assert_eq!(value["phase"], "");
    }

    #[test]
    fn test_deserialize_from_manifest() {
        let manifest = r#"{
            "apiVersion": "storage.deckhouse.io/v1alpha1",
            "kind": "LocalStorageClass",
            "metadata": {"name": "local-thin"},
            "spec": {
                "reclaimPolicy": "Retain",
                "volumeBindingMode": "WaitForFirstConsumer",
                "lvm": {
                    "type": "Thin",
                    "lvmVolumeGroups": [{"name": "vg-1", "thin": {"poolName": "pool"}}],
                    "lvmVolumeGroupSelector": {"matchLabels": {"tier": "fast"}},
                    "thinPoolName": "pool",
                    "volumeCleanup": "RandomFillSinglePass"
                }
            }
        }"#;

        let lsc: LocalStorageClass = serde_json::from_str(manifest).unwrap();
        assert_eq!(lsc.name(), "local-thin");
        assert_eq!(lsc.spec.reclaim_policy, ReclaimPolicy::Retain);

        let lvm = lsc.spec.lvm.as_ref().unwrap();
        assert_eq!(lvm.lvm_type, LvmType::Thin);
        assert_eq!(
            lvm.lvm_volume_groups[0].thin,
            Some(ThinPoolRef {
                pool_name: "pool".into()
            })
        );
        assert!(lsc.uses_selector());
        assert!(lsc.references_group("vg-1"));
        assert!(!lsc.references_group("vg-2"));
    }

    #[test]
    fn test_finalizer_helpers() {
        let mut lsc = class(vec![]);
        assert!(!lsc.has_finalizer());
        assert!(lsc.add_finalizer());
        assert!(!lsc.add_finalizer());
        assert!(lsc.has_finalizer());

        let mut legacy = class(vec![LEGACY_CONTROLLER_FINALIZER, "other"]);
        assert!(legacy.remove_finalizer());
        assert_eq!(legacy.metadata.finalizers, Some(vec!["other".to_string()]));
        assert!(!legacy.remove_finalizer());
    }

    #[test]
    fn test_status_helpers() {
        let mut lsc = class(vec![]);
        assert_eq!(lsc.phase(), None);

        lsc.status = Some(LocalStorageClassStatus::failed("boom"));
        assert!(lsc.is_failed());
        assert_eq!(format!("{}", lsc.phase().unwrap()), "Failed");

        lsc.status = Some(LocalStorageClassStatus::created());
        assert!(!lsc.is_failed());
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("Thin".parse::<LvmType>().unwrap(), LvmType::Thin);
        assert!("thin".parse::<LvmType>().is_err());
        assert_eq!(
            "WaitForFirstConsumer".parse::<VolumeBindingMode>().unwrap(),
            VolumeBindingMode::WaitForFirstConsumer
        );
    }
}
