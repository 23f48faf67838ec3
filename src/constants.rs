//! Identifiers shared by the storage class controller and the provisioner
//!
//! Everything here is fixed at compile time. Parameter keys are derived from
//! the provisioner name so that managed storage classes stay self-describing.

/// Provisioner name written into every managed StorageClass
pub const PROVISIONER: &str = "local.csi.storage.deckhouse.io";

// =============================================================================
// StorageClass Parameters
// =============================================================================

/// Parameter carrying the volume kind (always [`LVM_TYPE_VALUE`])
pub const TYPE_PARAM_KEY: &str = "local.csi.storage.deckhouse.io/type";

/// Value of [`TYPE_PARAM_KEY`]
pub const LVM_TYPE_VALUE: &str = "lvm";

/// Parameter carrying Thick or Thin
pub const LVM_TYPE_PARAM_KEY: &str = "local.csi.storage.deckhouse.io/lvm-type";

/// Parameter carrying the binding mode
pub const BINDING_MODE_PARAM_KEY: &str = "local.csi.storage.deckhouse.io/volume-binding-mode";

/// Parameter carrying the YAML encoded volume group bindings
pub const LVM_VOLUME_GROUPS_PARAM_KEY: &str = "local.csi.storage.deckhouse.io/lvm-volume-groups";

/// Parameter set to "true" when thick volumes must be contiguous
pub const LVM_THICK_CONTIGUOUS_PARAM_KEY: &str =
    "local.csi.storage.deckhouse.io/lvm-thick-contiguous";

/// Parameter carrying the volume cleanup policy
pub const LVM_VOLUME_CLEANUP_PARAM_KEY: &str = "local.csi.storage.deckhouse.io/lvm-volume-cleanup";

/// Filesystem parameter understood by the CSI sidecars
pub const FS_TYPE_PARAM_KEY: &str = "csi.storage.k8s.io/fstype";

/// Filesystem used when the LocalStorageClass does not name one
pub const DEFAULT_FS_TYPE: &str = "ext4";

// =============================================================================
// Finalizers, Labels and Annotations
// =============================================================================

/// Finalizer placed on LocalStorageClass and managed StorageClass objects
pub const CONTROLLER_FINALIZER: &str = "storage.deckhouse.io/local-storage-class-controller";

/// Finalizer written by older releases; removed together with the current one
pub const LEGACY_CONTROLLER_FINALIZER: &str = "localstorageclass.storage.deckhouse.io";

/// Finalizer placed on LVMLogicalVolume objects created by the provisioner
pub const PROVISIONER_FINALIZER: &str = "storage.deckhouse.io/sds-local-volume-csi";

/// Label marking a StorageClass as managed
pub const MANAGED_BY_LABEL_KEY: &str = "storage.deckhouse.io/managed-by";

/// Value of [`MANAGED_BY_LABEL_KEY`]
pub const MANAGED_BY_LABEL_VALUE: &str = "d8-sds-local-volume-storage-class-controller";

/// Annotation naming the snapshot class for managed StorageClasses
pub const SNAPSHOT_CLASS_ANNOTATION_KEY: &str = "storage.deckhouse.io/volumesnapshotclass";

/// Value of [`SNAPSHOT_CLASS_ANNOTATION_KEY`]
pub const SNAPSHOT_CLASS_ANNOTATION_VALUE: &str = "sds-local-volume-snapshot-class";

// =============================================================================
// Provisioning
// =============================================================================

/// Topology segment key identifying a node
pub const TOPOLOGY_KEY: &str = "topology.sds-local-volume-csi/node";

/// Volume context key: directory of the volume on the node
pub const SUB_PATH_CONTEXT_KEY: &str = "subPath";

/// Volume context key: volume group name on the node
pub const VG_NAME_CONTEXT_KEY: &str = "vgname";

/// Volume context key: thin pool, empty for thick volumes
pub const THIN_POOL_NAME_CONTEXT_KEY: &str = "thinPoolName";

/// Size tolerance absorbing extent rounding by the volume engine
pub const DEFAULT_RESIZE_DELTA: &str = "32Mi";

/// Interval between logical volume status polls, in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Upper bound for a single convergence wait, in seconds
pub const DEFAULT_CONVERGENCE_TIMEOUT_SECS: u64 = 300;

/// Controller requeue interval, in seconds
pub const DEFAULT_REQUEUE_INTERVAL_SECS: u64 = 10;
