//! Error types for the Local Volume Operator
//!
//! Provides structured error types for the storage class controller,
//! the provisioning service and the Kubernetes adapters.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Conflict on {kind}/{name}: {reason}")]
    Conflict {
        kind: String,
        name: String,
        reason: String,
    },

    // =========================================================================
    // Storage Class Reconciliation Errors
    // =========================================================================
    #[error("{0}")]
    Resolution(String),

    #[error("validation failed: {0}")]
    Validation(String),

    // =========================================================================
    // Provisioning Errors
    // =========================================================================
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No candidate volume group: {0}")]
    NoCandidate(String),

    #[error("Insufficient capacity: requested {requested} bytes, available {available} bytes")]
    InsufficientCapacity { requested: u64, available: u64 },

    #[error("Timed out after {attempts} attempts waiting for logical volume {volume_name}")]
    Timeout { volume_name: String, attempts: u32 },

    #[error("Operation on logical volume {volume_name} was cancelled")]
    Cancelled { volume_name: String },

    #[error("Logical volume {volume_name} failed: {reason}")]
    VolumeFailed { volume_name: String, reason: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Quantity parse error: {0}")]
    QuantityParse(String),

    #[error("Unable to decode volume group bindings: {0}")]
    Encoding(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_) | Error::Conflict { .. } | Error::ResourceExists { .. } => {
                ErrorAction::RequeueWithBackoff
            }

            // Provisioning waits - retry later
            Error::Timeout { .. } | Error::Cancelled { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(30))
            }

            // Capacity issues - medium retry
            Error::InsufficientCapacity { .. } | Error::NoCandidate(_) => {
                ErrorAction::RequeueAfter(Duration::from_secs(60))
            }

            // User input errors - wait for the object or the inventory to change
            Error::Resolution(_)
            | Error::Validation(_)
            | Error::InvalidArgument(_)
            | Error::QuantityParse(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if the API server rejected the request because the object already exists
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::ResourceExists { .. } => true,
            Error::Kube(kube::Error::Api(response)) => {
                response.code == 409 && response.reason == "AlreadyExists"
            }
            _ => false,
        }
    }

    /// Check if the error reports a missing object
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound { .. } => true,
            Error::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }

    /// Text recorded in a LocalStorageClass status when this error ends a pass.
    ///
    /// Validation failures and wrapped API errors are recorded verbatim,
    /// without the variant prefix.
    pub fn status_reason(&self) -> String {
        match self {
            Error::Validation(reason) | Error::Resolution(reason) | Error::Internal(reason) => {
                reason.clone()
            }
            other => other.to_string(),
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::Timeout {
            volume_name: "pvc-1".into(),
            attempts: 12,
        };
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(30))
        );

        let err = Error::Validation("No LVMVolumeGroups found".into());
        assert_eq!(err.action(), ErrorAction::NoRequeue);

        let err = Error::InsufficientCapacity {
            requested: 1000,
            available: 500,
        };
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_conflicts_requeue_and_resolution_waits() {
        let conflict = Error::Conflict {
            kind: "LocalStorageClass".into(),
            name: "local-thick".into(),
            reason: "the object has been modified".into(),
        };
        assert_eq!(conflict.action(), ErrorAction::RequeueWithBackoff);

        let resolution = Error::Resolution("LVM spec is nil".into());
        assert_eq!(resolution.action(), ErrorAction::NoRequeue);
    }

    #[test]
    fn test_status_reason_strips_prefix() {
        let err = Error::Validation("Some LVMVolumeGroups are nonexistent\n".into());
        assert_eq!(err.to_string(), "validation failed: Some LVMVolumeGroups are nonexistent\n");
        assert_eq!(err.status_reason(), "Some LVMVolumeGroups are nonexistent\n");

        let err = Error::ResourceNotFound {
            kind: "StorageClass".into(),
            name: "local".into(),
        };
        assert_eq!(err.status_reason(), "Resource not found: StorageClass/local");
    }

    #[test]
    fn test_classification_helpers() {
        let exists = Error::ResourceExists {
            kind: "LVMLogicalVolume".into(),
            name: "pvc-1".into(),
        };
        assert!(exists.is_already_exists());
        assert!(!exists.is_not_found());

        let missing = Error::ResourceNotFound {
            kind: "LVMLogicalVolume".into(),
            name: "pvc-1".into(),
        };
        assert!(missing.is_not_found());
    }
}
