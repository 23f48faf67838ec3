//! LocalStorageClass controller
//!
//! - [`resolver`]: explicit list plus label selector into ordered bindings
//! - [`validator`]: admissibility checks, all violations reported together
//! - [`storage_class`]: managed StorageClass construction and drift detection
//! - [`reconciler`]: per-pass create/update/delete state machine
//! - [`runner`]: `kube::runtime::Controller` wiring

pub mod reconciler;
pub mod resolver;
pub mod runner;
pub mod selector;
pub mod storage_class;
pub mod validator;

pub use reconciler::{identify_action, ReconcileAction, ReconcileOutcome, StorageClassReconciler};
pub use resolver::resolve_bindings;
pub use selector::Selector;
pub use validator::{validate, ValidationReport};

use std::time::Duration;

use crate::constants::DEFAULT_REQUEUE_INTERVAL_SECS;

/// Watcher timeout (seconds); must stay below the client read timeout
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Delay before a retryable or raced pass runs again
    pub requeue_interval: Duration,
    /// Server-side watch timeout
    pub watch_timeout_secs: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            requeue_interval: Duration::from_secs(DEFAULT_REQUEUE_INTERVAL_SECS),
            watch_timeout_secs: WATCH_TIMEOUT_SECS,
        }
    }
}
