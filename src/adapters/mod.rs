//! Port implementations
//!
//! - [`kubernetes`]: the live cluster through `kube::Api`
//! - [`memory`]: an in-process cluster for tests and local runs

pub mod kubernetes;
pub mod memory;

pub use kubernetes::KubeCluster;
pub use memory::{Convergence, InMemoryCluster, Operation};
