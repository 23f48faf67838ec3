//! Managed StorageClass construction and drift detection

use k8s_openapi::api::storage::v1::StorageClass;
use kube::core::ObjectMeta;
use std::collections::BTreeMap;

use crate::constants::*;
use crate::crd::{LocalStorageClass, LvmType};
use crate::domain::{decode_bindings, encode_bindings, ResolvedBinding};
use crate::error::{Error, Result};

/// Build the StorageClass materializing `class` with `bindings`
pub fn build_storage_class(
    class: &LocalStorageClass,
    bindings: &[ResolvedBinding],
) -> Result<StorageClass> {
    let lvm = class.spec.lvm.as_ref().ok_or_else(|| {
        Error::Resolution("unable to identify the LocalStorageClass type".into())
    })?;

    let fs_type = class
        .spec
        .fs_type
        .as_deref()
        .filter(|fs| !fs.is_empty())
        .unwrap_or(DEFAULT_FS_TYPE);

    let mut parameters = BTreeMap::from([
        (TYPE_PARAM_KEY.to_string(), LVM_TYPE_VALUE.to_string()),
        (LVM_TYPE_PARAM_KEY.to_string(), lvm.lvm_type.to_string()),
        (
            BINDING_MODE_PARAM_KEY.to_string(),
            class.spec.volume_binding_mode.to_string(),
        ),
        (
            LVM_VOLUME_GROUPS_PARAM_KEY.to_string(),
            encode_bindings(bindings)?,
        ),
        (FS_TYPE_PARAM_KEY.to_string(), fs_type.to_string()),
    ]);

    if lvm.thick.as_ref().map_or(false, |t| t.contiguous) {
        parameters.insert(LVM_THICK_CONTIGUOUS_PARAM_KEY.to_string(), "true".to_string());
    }

    if let Some(cleanup) = lvm.volume_cleanup.as_deref().filter(|c| !c.is_empty()) {
        parameters.insert(LVM_VOLUME_CLEANUP_PARAM_KEY.to_string(), cleanup.to_string());
    }

    let mut labels = class.metadata.labels.clone().unwrap_or_default();
    labels.insert(
        MANAGED_BY_LABEL_KEY.to_string(),
        MANAGED_BY_LABEL_VALUE.to_string(),
    );

    Ok(StorageClass {
        metadata: ObjectMeta {
            name: Some(class.name().to_string()),
            labels: Some(labels),
            annotations: Some(BTreeMap::from([(
                SNAPSHOT_CLASS_ANNOTATION_KEY.to_string(),
                SNAPSHOT_CLASS_ANNOTATION_VALUE.to_string(),
            )])),
            finalizers: Some(vec![CONTROLLER_FINALIZER.to_string()]),
            ..Default::default()
        },
        provisioner: PROVISIONER.to_string(),
        parameters: Some(parameters),
        reclaim_policy: Some(class.spec.reclaim_policy.to_string()),
        volume_binding_mode: Some(class.spec.volume_binding_mode.to_string()),
        allow_volume_expansion: Some(true),
        ..Default::default()
    })
}

/// Build the replacement for `current`, keeping annotations the new object does not set
pub fn build_replacement(
    class: &LocalStorageClass,
    bindings: &[ResolvedBinding],
    current: &StorageClass,
) -> Result<StorageClass> {
    let mut replacement = build_storage_class(class, bindings)?;
    if let Some(old) = current.metadata.annotations.as_ref() {
        let annotations = replacement.metadata.annotations.get_or_insert_with(BTreeMap::new);
        for (key, value) in old {
            annotations
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
    Ok(replacement)
}

/// Whether the StorageClass belongs to this provisioner
pub fn is_managed(class: &StorageClass) -> bool {
    class.provisioner == PROVISIONER
}

fn parameter<'a>(class: &'a StorageClass, key: &str) -> Option<&'a str> {
    class
        .parameters
        .as_ref()
        .and_then(|p| p.get(key))
        .map(String::as_str)
}

/// Bindings currently encoded in a managed StorageClass
pub fn current_bindings(class: &StorageClass) -> Result<Vec<ResolvedBinding>> {
    decode_bindings(parameter(class, LVM_VOLUME_GROUPS_PARAM_KEY).unwrap_or_default())
}

/// Whether `current` differs from what `class` with `bindings` would produce.
///
/// Only the cleanup policy and the bindings are compared; thin pools are
/// compared for Thin classes only. A binding list that cannot be decoded is
/// an error rather than a difference.
pub fn has_diff(
    current: &StorageClass,
    class: &LocalStorageClass,
    bindings: &[ResolvedBinding],
) -> Result<bool> {
    let existing = current_bindings(current)?;

    let lvm = class.spec.lvm.as_ref();
    let desired_cleanup = lvm.and_then(|l| l.volume_cleanup.as_deref()).unwrap_or_default();
    let current_cleanup = parameter(current, LVM_VOLUME_CLEANUP_PARAM_KEY).unwrap_or_default();
    if desired_cleanup != current_cleanup {
        return Ok(true);
    }

    if existing.len() != bindings.len() {
        return Ok(true);
    }

    let is_thin = lvm.map_or(false, |l| l.lvm_type == LvmType::Thin);
    let existing: BTreeMap<&str, &ResolvedBinding> =
        existing.iter().map(|b| (b.name.as_str(), b)).collect();

    for desired in bindings {
        let Some(current) = existing.get(desired.name.as_str()) else {
            return Ok(true);
        };
        if is_thin && current.thin != desired.thin {
            return Ok(true);
        }
    }

    Ok(false)
}
