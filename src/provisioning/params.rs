//! Storage class parameters carried by a provisioning request

use std::collections::BTreeMap;

use crate::constants::{
    BINDING_MODE_PARAM_KEY, LVM_THICK_CONTIGUOUS_PARAM_KEY, LVM_TYPE_PARAM_KEY, LVM_TYPE_VALUE,
    LVM_VOLUME_GROUPS_PARAM_KEY, TYPE_PARAM_KEY,
};
use crate::crd::{LvmType, VolumeBindingMode};
use crate::domain::{decode_bindings, ResolvedBinding};
use crate::error::{Error, Result};

/// Parsed and checked request parameters
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeParameters {
    pub lvm_type: LvmType,
    pub binding_mode: VolumeBindingMode,
    /// Candidate volume groups, as encoded by the managed StorageClass
    pub bindings: Vec<ResolvedBinding>,
    /// Thick volumes only
    pub contiguous: bool,
}

impl VolumeParameters {
    /// Parse request parameters; nothing is read from the cluster
    pub fn from_parameters(parameters: &BTreeMap<String, String>) -> Result<Self> {
        let get = |key: &str| parameters.get(key).map(String::as_str).unwrap_or_default();

        if get(TYPE_PARAM_KEY) != LVM_TYPE_VALUE {
            return Err(Error::InvalidArgument("Unsupported Storage Class type".into()));
        }

        let lvm_type: LvmType = get(LVM_TYPE_PARAM_KEY)
            .parse()
            .map_err(Error::InvalidArgument)?;
        let binding_mode: VolumeBindingMode = get(BINDING_MODE_PARAM_KEY)
            .parse()
            .map_err(Error::InvalidArgument)?;

        let encoded = get(LVM_VOLUME_GROUPS_PARAM_KEY);
        if encoded.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "no LVMVolumeGroups specified in a storage class's parameters".into(),
            ));
        }
        let bindings =
            decode_bindings(encoded).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        if bindings.is_empty() {
            return Err(Error::InvalidArgument(
                "no LVMVolumeGroups specified in a storage class's parameters".into(),
            ));
        }

        let contiguous =
            lvm_type == LvmType::Thick && get(LVM_THICK_CONTIGUOUS_PARAM_KEY) == "true";

        Ok(Self {
            lvm_type,
            binding_mode,
            bindings,
            contiguous,
        })
    }
}
