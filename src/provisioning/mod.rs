//! Volume provisioning
//!
//! - [`params`]: storage class parameters carried by each request
//! - [`placement`]: node and volume group selection
//! - [`orchestrator`]: logical volume create/expand/delete with convergence waits

pub mod orchestrator;
pub mod params;
pub mod placement;

pub use orchestrator::{
    sizes_equal_within_delta, CreateVolumeRequest, CreatedVolume, ExpandVolumeRequest,
    ExpandedVolume, ProvisionerConfig, VolumeProvisioner,
};
pub use params::VolumeParameters;
pub use placement::{PlacementCandidate, PlacementDecision, PlacementEngine};
