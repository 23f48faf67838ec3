//! Resolved volume group bindings
//!
//! A binding ties a storage class to one LVMVolumeGroup and, for thin
//! classes, to one of its thin pools. Bindings are stored in StorageClass
//! parameters as a YAML list:
//!
//! ```yaml
//! - name: vg-1-on-worker-0
//!   thin:
//!     poolName: pool
//! ```

use serde::{Deserialize, Serialize};

use crate::crd::{LvmVolumeGroupRef, ThinPoolRef};
use crate::error::{Error, Result};

/// One volume group selected for a storage class
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedBinding {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thin: Option<ThinPoolRef>,
}

impl ResolvedBinding {
    pub fn thick(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            thin: None,
        }
    }

    pub fn thin(name: impl Into<String>, pool: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            thin: Some(ThinPoolRef {
                pool_name: pool.into(),
            }),
        }
    }

    /// Thin pool name, if any
    pub fn pool_name(&self) -> Option<&str> {
        self.thin.as_ref().map(|t| t.pool_name.as_str())
    }
}

impl From<&LvmVolumeGroupRef> for ResolvedBinding {
    fn from(group: &LvmVolumeGroupRef) -> Self {
        Self {
            name: group.name.clone(),
            thin: group.thin.clone(),
        }
    }
}

/// Encode bindings for the StorageClass parameter map
pub fn encode_bindings(bindings: &[ResolvedBinding]) -> Result<String> {
    Ok(serde_yaml::to_string(bindings)?)
}

/// Decode bindings from a StorageClass parameter value
pub fn decode_bindings(encoded: &str) -> Result<Vec<ResolvedBinding>> {
    if encoded.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_yaml::from_str(encoded).map_err(|e| Error::Encoding(e.to_string()))
}
