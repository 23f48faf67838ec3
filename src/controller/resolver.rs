//! Volume group resolution
//!
//! Turns the explicit group list and the label selector of a
//! LocalStorageClass into one ordered, deduplicated binding list. Explicit
//! entries take precedence over selector matches for the same group; the
//! result is sorted by group name so unchanged inputs always resolve to the
//! same encoded parameter.

use std::collections::BTreeMap;

use crate::controller::selector::Selector;
use crate::crd::{LVMVolumeGroup, LocalStorageClass, LvmType, ThinPoolRef};
use crate::domain::ResolvedBinding;
use crate::error::{Error, Result};

/// Resolve the bindings of `class` against the current inventory
pub fn resolve_bindings(
    inventory: &[LVMVolumeGroup],
    class: &LocalStorageClass,
) -> Result<Vec<ResolvedBinding>> {
    let lvm = class
        .spec
        .lvm
        .as_ref()
        .ok_or_else(|| Error::Resolution("LVM spec is nil".into()))?;

    // A later duplicate of the same explicit name replaces an earlier one
    let mut resolved: BTreeMap<&str, ResolvedBinding> = lvm
        .lvm_volume_groups
        .iter()
        .map(|group| (group.name.as_str(), ResolvedBinding::from(group)))
        .collect();

    if let Some(label_selector) = lvm.lvm_volume_group_selector.as_ref() {
        let selector = Selector::compile(label_selector)?;
        if selector.is_empty() {
            return Err(Error::Resolution(
                "empty lvmVolumeGroupSelector would match all LVGs; specify matchLabels or matchExpressions to select specific LVGs".into(),
            ));
        }

        let default_pool = match (lvm.lvm_type, lvm.thin_pool_name.as_deref()) {
            (LvmType::Thin, Some(pool)) if !pool.is_empty() => Some(ThinPoolRef {
                pool_name: pool.to_string(),
            }),
            _ => None,
        };

        let empty = BTreeMap::new();
        for group in inventory {
            let labels = group.metadata.labels.as_ref().unwrap_or(&empty);
            if !selector.matches(labels) {
                continue;
            }
            resolved
                .entry(group.name())
                .or_insert_with(|| ResolvedBinding {
                    name: group.name().to_string(),
                    thin: default_pool.clone(),
                });
        }
    }

    Ok(resolved.into_values().collect())
}
