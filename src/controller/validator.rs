//! LocalStorageClass admissibility checks
//!
//! Every check runs on every pass; the report lists all violations at once
//! so a single status update tells the user everything that is wrong.

use std::collections::{BTreeMap, BTreeSet};

use crate::constants::PROVISIONER;
use crate::crd::{LVMVolumeGroup, LocalStorageClass, LvmType, StorageClass};
use crate::domain::ResolvedBinding;
use crate::error::{Error, Result};

/// Outcome of validating one LocalStorageClass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    violations: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// All violations, one per line
    pub fn reason(&self) -> String {
        self.violations.iter().map(|v| format!("{}\n", v)).collect()
    }

    /// Convert into `Err(Error::Validation)` when any check failed
    pub fn into_result(self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::Validation(self.reason()))
        }
    }

    fn push(&mut self, violation: String) {
        self.violations.push(violation);
    }
}

/// Validate `class` with its resolved bindings against the inventory and
/// the StorageClasses already present in the cluster
pub fn validate(
    class: &LocalStorageClass,
    bindings: &[ResolvedBinding],
    inventory: &[LVMVolumeGroup],
    storage_classes: &[StorageClass],
) -> ValidationReport {
    let mut report = ValidationReport::default();

    if let Some(name) = find_unmanaged_duplicate(class, storage_classes) {
        report.push(format!(
            "There already is a storage class with the same name: {} but it is not managed by the LocalStorageClass controller",
            name
        ));
    }

    let Some(lvm) = class.spec.lvm.as_ref() else {
        report.push(format!(
            "Unable to identify a type of LocalStorageClass {}",
            class.name()
        ));
        return report;
    };

    if lvm.lvm_volume_groups.is_empty() && lvm.lvm_volume_group_selector.is_none() {
        report.push("Either lvmVolumeGroups or lvmVolumeGroupSelector must be specified".into());
    }

    if bindings.is_empty() {
        report.push("No LVMVolumeGroups found matching the specified criteria".into());
    }

    let pool_missing = lvm.thin_pool_name.as_deref().map_or(true, str::is_empty);
    if lvm.lvm_type == LvmType::Thin && lvm.lvm_volume_group_selector.is_some() && pool_missing {
        report.push("thinPoolName is required when using lvmVolumeGroupSelector with Thin type".into());
    }

    let shared = find_groups_sharing_nodes(inventory, bindings);
    if !shared.is_empty() {
        report.push(format!(
            "Some LVMVolumeGroups use the same node (|node: LVG names): {}",
            shared.concat()
        ));
    }

    let groups: BTreeMap<&str, &LVMVolumeGroup> =
        inventory.iter().map(|g| (g.name(), g)).collect();

    let nonexistent: Vec<&str> = bindings
        .iter()
        .filter(|b| !groups.contains_key(b.name.as_str()))
        .map(|b| b.name.as_str())
        .collect();
    if !nonexistent.is_empty() {
        report.push(format!(
            "Some of selected LVMVolumeGroups are nonexistent, LVG names: {}",
            nonexistent.join(",")
        ));
    }

    match lvm.lvm_type {
        LvmType::Thin => {
            let missing_pools: Vec<&str> = bindings
                .iter()
                .filter(|b| {
                    let hosted = b.pool_name().and_then(|pool| {
                        groups
                            .get(b.name.as_str())
                            .map(|group| group.has_thin_pool(pool))
                    });
                    hosted != Some(true)
                })
                .map(|b| b.name.as_str())
                .collect();
            if !missing_pools.is_empty() {
                report.push(format!(
                    "Some LVMVolumeGroups use nonexistent thin pools, LVG names: {}",
                    missing_pools.join(",")
                ));
            }
        }
        LvmType::Thick => {
            let with_pools: Vec<&str> = bindings
                .iter()
                .filter(|b| b.thin.is_some())
                .map(|b| b.name.as_str())
                .collect();
            if !with_pools.is_empty() {
                report.push(format!(
                    "Some LVMVolumeGroups use thin pools though device type is Thick, LVG names: {}",
                    with_pools.join(",")
                ));
            }
        }
    }

    report
}

fn find_unmanaged_duplicate<'a>(
    class: &LocalStorageClass,
    storage_classes: &'a [StorageClass],
) -> Option<&'a str> {
    storage_classes
        .iter()
        .find(|sc| sc.metadata.name.as_deref() == Some(class.name()) && sc.provisioner != PROVISIONER)
        .and_then(|sc| sc.metadata.name.as_deref())
}

/// One `|node: g1,g2,` fragment per node hosting more than one bound group
fn find_groups_sharing_nodes(
    inventory: &[LVMVolumeGroup],
    bindings: &[ResolvedBinding],
) -> Vec<String> {
    let bound: BTreeSet<&str> = bindings.iter().map(|b| b.name.as_str()).collect();

    let mut by_node: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for group in inventory.iter().filter(|g| bound.contains(g.name())) {
        for node in group.node_names() {
            by_node.entry(node).or_default().insert(group.name());
        }
    }

    by_node
        .into_iter()
        .filter(|(_, groups)| groups.len() > 1)
        .map(|(node, groups)| {
            let names: String = groups.iter().map(|g| format!("{},", g)).collect();
            format!("|{}: {}", node, names)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::resolver::tests::{class, group};
    use crate::crd::{LVMVolumeGroupNode, LVMVolumeGroupStatus, LVMVolumeGroupThinPool, LvmVolumeGroupRef};
    use assert_matches::assert_matches;
    use kube::core::ObjectMeta;

    fn on_node(name: &str, node: &str, pools: &[&str]) -> LVMVolumeGroup {
        let mut lvg = group(name, &[]);
        lvg.status = Some(LVMVolumeGroupStatus {
            nodes: vec![LVMVolumeGroupNode { name: node.into() }],
            thin_pools: pools
                .iter()
                .map(|p| LVMVolumeGroupThinPool {
                    name: p.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        });
        lvg
    }

    fn explicit(names: &[&str]) -> Vec<LvmVolumeGroupRef> {
        names
            .iter()
            .map(|n| LvmVolumeGroupRef {
                name: n.to_string(),
                thin: None,
            })
            .collect()
    }

    fn storage_class(name: &str, provisioner: &str) -> StorageClass {
        StorageClass {
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            provisioner: provisioner.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_thick_class() {
        let inventory = vec![on_node("vg-1", "node-1", &[]), on_node("vg-2", "node-2", &[])];
        let lsc = class(LvmType::Thick, explicit(&["vg-1", "vg-2"]));
        let bindings = vec![ResolvedBinding::thick("vg-1"), ResolvedBinding::thick("vg-2")];

        let report = validate(&lsc, &bindings, &inventory, &[storage_class("local", PROVISIONER)]);
        assert!(report.is_valid(), "{}", report.reason());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_thick_with_thin_pool_is_invalid() {
        let inventory = vec![on_node("vg-1", "node-1", &["pool"])];
        let lsc = class(LvmType::Thick, explicit(&["vg-1"]));
        let bindings = vec![ResolvedBinding::thin("vg-1", "pool")];

        let report = validate(&lsc, &bindings, &inventory, &[]);
        assert!(!report.is_valid());
        assert_eq!(
            report.reason(),
            "Some LVMVolumeGroups use thin pools though device type is Thick, LVG names: vg-1\n"
        );
    }

    #[test]
    fn test_shared_node_names_the_node() {
        let inventory = vec![
            on_node("vg-b", "node-1", &[]),
            on_node("vg-a", "node-1", &[]),
            on_node("vg-c", "node-2", &[]),
        ];
        let lsc = class(LvmType::Thick, explicit(&["vg-a", "vg-b", "vg-c"]));
        let bindings = vec![
            ResolvedBinding::thick("vg-a"),
            ResolvedBinding::thick("vg-b"),
            ResolvedBinding::thick("vg-c"),
        ];

        let report = validate(&lsc, &bindings, &inventory, &[]);
        assert_eq!(
            report.violations(),
            &["Some LVMVolumeGroups use the same node (|node: LVG names): |node-1: vg-a,vg-b,".to_string()]
        );
    }

    #[test]
    fn test_all_violations_are_reported() {
        let inventory = vec![on_node("vg-1", "node-1", &["other"])];
        let mut lsc = class(LvmType::Thin, explicit(&[]));
        lsc.spec.lvm.as_mut().unwrap().lvm_volume_group_selector = Some(Default::default());
        let bindings = vec![
            ResolvedBinding::thin("vg-1", "pool"),
            ResolvedBinding::thin("vg-9", "pool"),
        ];

        let report = validate(&lsc, &bindings, &inventory, &[storage_class("local", "other.csi")]);
        assert_eq!(
            report.violations(),
            &[
                "There already is a storage class with the same name: local but it is not managed by the LocalStorageClass controller".to_string(),
                "thinPoolName is required when using lvmVolumeGroupSelector with Thin type".to_string(),
                "Some of selected LVMVolumeGroups are nonexistent, LVG names: vg-9".to_string(),
                "Some LVMVolumeGroups use nonexistent thin pools, LVG names: vg-1,vg-9".to_string(),
            ]
        );
        assert_matches!(report.into_result(), Err(Error::Validation(reason)) if reason.lines().count() == 4);
    }

    #[test]
    fn test_no_source_and_no_bindings() {
        let lsc = class(LvmType::Thick, explicit(&[]));
        let report = validate(&lsc, &[], &[], &[]);
        assert_eq!(
            report.reason(),
            "Either lvmVolumeGroups or lvmVolumeGroupSelector must be specified\nNo LVMVolumeGroups found matching the specified criteria\n"
        );
    }

    #[test]
    fn test_thin_binding_without_pool() {
        let inventory = vec![on_node("vg-1", "node-1", &["pool"])];
        let lsc = class(LvmType::Thin, explicit(&["vg-1"]));
        let report = validate(&lsc, &[ResolvedBinding::thick("vg-1")], &inventory, &[]);
        assert_eq!(
            report.violations(),
            &["Some LVMVolumeGroups use nonexistent thin pools, LVG names: vg-1".to_string()]
        );
    }
}
