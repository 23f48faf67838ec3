//! Local Volume Operator
//!
//! Node-local LVM storage for Kubernetes: turns LocalStorageClass objects
//! into managed StorageClasses and provisions logical volumes on the nodes
//! those classes point at.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                       LocalStorageClass Controller                       │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────────────┐  │
//! │  │   Resolver   │──▶│  Validator   │──▶│  Reconciler                  │  │
//! │  │ list+selector│   │ all checks   │   │  create / update / delete    │  │
//! │  └──────────────┘   └──────────────┘   └──────────────┬───────────────┘  │
//! │                                                       │                  │
//! │                                        StorageClass (managed, finalized) │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │                         Volume Provisioner                               │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────────────┐  │
//! │  │   REST API   │──▶│  Placement   │──▶│  Orchestrator                │  │
//! │  │ create/expand│   │ node + group │   │  LVMLogicalVolume + polling  │  │
//! │  └──────────────┘   └──────────────┘   └──────────────────────────────┘  │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │                              Ports                                       │
//! │   StorageClassApi · LocalStorageClassApi · VolumeGroupInventory ·        │
//! │   LogicalVolumeEngine          (Kubernetes adapter / in-memory adapter)  │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: LocalStorageClass reconciliation
//! - [`provisioning`]: volume placement and provisioning
//! - [`api`]: HTTP provisioning API
//! - [`adapters`]: port implementations
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod adapters;
pub mod api;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod provisioning;

// Re-export commonly used types
pub use adapters::{InMemoryCluster, KubeCluster};

pub use api::{ApiServer, ApiServerConfig, RestRouter};

pub use controller::{
    identify_action, resolve_bindings, validate, ControllerConfig, ReconcileAction,
    ReconcileOutcome, StorageClassReconciler, ValidationReport,
};

pub use crd::{
    LVMLogicalVolume, LVMLogicalVolumeSpec, LVMLogicalVolumeStatus, LVMVolumeGroup,
    LocalStorageClass, LocalStorageClassSpec, LocalStorageClassStatus, LvmType,
    VolumeBindingMode,
};

pub use domain::{
    decode_bindings, encode_bindings, parse_quantity, Clock, ClockRef, ManualClock,
    ResolvedBinding, TokioClock,
};

pub use error::{Error, ErrorAction, Result};

pub use metrics::Metrics;

pub use provisioning::{
    CreateVolumeRequest, CreatedVolume, ExpandVolumeRequest, ExpandedVolume, PlacementEngine,
    ProvisionerConfig, VolumeParameters, VolumeProvisioner,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
