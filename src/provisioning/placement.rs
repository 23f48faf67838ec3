//! Placement
//!
//! Picks the node and volume group for a new logical volume.
//!
//! With `Immediate` binding the node is chosen here: the one whose best
//! candidate group has the most free space. With `WaitForFirstConsumer` the
//! scheduler already chose it and passed it as the topology preference.
//! Either way the group is then the candidate on that node with the most
//! free space, ties broken by group name.

use std::collections::BTreeMap;
use tracing::debug;

use crate::crd::{LVMVolumeGroup, LvmType, VolumeBindingMode};
use crate::error::{Error, Result};
use crate::provisioning::params::VolumeParameters;

// =============================================================================
// Placement Candidate
// =============================================================================

/// A volume group the request may land on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementCandidate {
    /// LVMVolumeGroup object name
    pub group_name: String,
    /// Node hosting the group
    pub node_name: String,
    /// Volume group name on the node
    pub vg_name_on_node: String,
    /// Thin pool the volume is carved from; `None` for thick volumes
    pub thin_pool: Option<String>,
    /// Free bytes: raw group space for thick, pool space for thin
    pub free_bytes: u64,
}

// =============================================================================
// Placement Decision
// =============================================================================

/// Where a volume goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementDecision {
    pub node_name: String,
    pub group_name: String,
    pub vg_name_on_node: String,
    pub thin_pool: Option<String>,
}

impl From<&PlacementCandidate> for PlacementDecision {
    fn from(candidate: &PlacementCandidate) -> Self {
        Self {
            node_name: candidate.node_name.clone(),
            group_name: candidate.group_name.clone(),
            vg_name_on_node: candidate.vg_name_on_node.clone(),
            thin_pool: candidate.thin_pool.clone(),
        }
    }
}

// =============================================================================
// Placement Engine
// =============================================================================

/// Engine for choosing volume placement
pub struct PlacementEngine;

impl PlacementEngine {
    /// Build candidates from the inventory entries named by the bindings
    ///
    /// Groups missing from the inventory or not yet reporting a node are
    /// skipped, as are thin groups whose pool is not (yet) present.
    pub fn candidates(
        inventory: &[LVMVolumeGroup],
        params: &VolumeParameters,
    ) -> Result<Vec<PlacementCandidate>> {
        let by_name: BTreeMap<&str, &LVMVolumeGroup> =
            inventory.iter().map(|g| (g.name(), g)).collect();

        let mut candidates = Vec::with_capacity(params.bindings.len());
        for binding in &params.bindings {
            let Some(group) = by_name.get(binding.name.as_str()) else {
                debug!("LVMVolumeGroup {} not found, skipping", binding.name);
                continue;
            };
            let Some(node) = group.primary_node() else {
                debug!("LVMVolumeGroup {} reports no nodes, skipping", binding.name);
                continue;
            };

            let (thin_pool, free_bytes) = match params.lvm_type {
                LvmType::Thick => (None, group.free_bytes()?),
                LvmType::Thin => {
                    let pool = binding.pool_name().ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "thin pool name for lvg {} not found in storage class parameters",
                            binding.name
                        ))
                    })?;
                    match group.thin_pool_free_bytes(pool)? {
                        Some(free) => (Some(pool.to_string()), free),
                        None => {
                            debug!(
                                "Thin pool {} not found in LVMVolumeGroup {}, skipping",
                                pool, binding.name
                            );
                            continue;
                        }
                    }
                }
            };

            candidates.push(PlacementCandidate {
                group_name: binding.name.clone(),
                node_name: node.to_string(),
                vg_name_on_node: group.spec.actual_vg_name_on_the_node.clone(),
                thin_pool,
                free_bytes,
            });
        }

        candidates.sort_by(|a, b| a.group_name.cmp(&b.group_name));
        Ok(candidates)
    }

    /// Choose a node and group for `required_bytes`
    pub fn select(
        candidates: &[PlacementCandidate],
        lvm_type: LvmType,
        binding_mode: VolumeBindingMode,
        required_bytes: u64,
        preferred_node: Option<&str>,
    ) -> Result<PlacementDecision> {
        let node = match binding_mode {
            VolumeBindingMode::Immediate => {
                let (node, free) = Self::node_with_max_free_space(candidates).ok_or_else(|| {
                    Error::NoCandidate(
                        "no LVMVolumeGroup of the storage class is available on any node".into(),
                    )
                })?;
                debug!("Selected node {} with {} free bytes", node, free);

                if lvm_type == LvmType::Thick && required_bytes > free {
                    return Err(Error::InsufficientCapacity {
                        requested: required_bytes,
                        available: free,
                    });
                }
                node
            }
            VolumeBindingMode::WaitForFirstConsumer => preferred_node
                .filter(|n| !n.is_empty())
                .ok_or_else(|| {
                    Error::NoCandidate(
                        "no preferred node supplied for WaitForFirstConsumer binding".into(),
                    )
                })?
                .to_string(),
        };

        Self::select_group(candidates, &node).map(PlacementDecision::from)
    }

    /// Node whose best group has the most free space; ties go to the lowest name
    fn node_with_max_free_space(candidates: &[PlacementCandidate]) -> Option<(String, u64)> {
        let mut per_node: BTreeMap<&str, u64> = BTreeMap::new();
        for candidate in candidates {
            let best = per_node.entry(candidate.node_name.as_str()).or_insert(0);
            *best = (*best).max(candidate.free_bytes);
        }

        let mut selected: Option<(&str, u64)> = None;
        for (node, free) in per_node {
            if selected.map_or(true, |(_, max)| free > max) {
                selected = Some((node, free));
            }
        }
        selected.map(|(node, free)| (node.to_string(), free))
    }

    /// Group on `node` with the most free space; ties go to the lowest name
    fn select_group<'a>(
        candidates: &'a [PlacementCandidate],
        node: &str,
    ) -> Result<&'a PlacementCandidate> {
        candidates
            .iter()
            .filter(|c| c.node_name == node)
            .fold(None, |best: Option<&PlacementCandidate>, c| match best {
                Some(b) if b.free_bytes > c.free_bytes => Some(b),
                Some(b) if b.free_bytes == c.free_bytes && b.group_name <= c.group_name => Some(b),
                _ => Some(c),
            })
            .ok_or_else(|| Error::NoCandidate(format!("no LVMVolumeGroup found for node {}", node)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::ResolvedBinding;
    use assert_matches::assert_matches;

    const GIB: u64 = 1024 * 1024 * 1024;

    /// Inventory entry with capacity data; thin pools are `(name, size, used)`
    pub(crate) fn capacity_group(
        name: &str,
        node: &str,
        vg_size: &str,
        allocated: &str,
        thin_pools: &[(&str, &str, &str)],
    ) -> LVMVolumeGroup {
        let pools: Vec<_> = thin_pools
            .iter()
            .map(|(pool, size, used)| {
                serde_json::json!({"name": pool, "actualSize": size, "usedSize": used})
            })
            .collect();
        serde_json::from_value(serde_json::json!({
            "apiVersion": "storage.deckhouse.io/v1alpha1",
            "kind": "LVMVolumeGroup",
            "metadata": {"name": name},
            "spec": {"actualVGNameOnTheNode": format!("{}-vg", name)},
            "status": {
                "nodes": [{"name": node}],
                "vgSize": vg_size,
                "allocatedSize": allocated,
                "thinPools": pools,
            }
        }))
        .unwrap()
    }

    fn thick_params(mode: VolumeBindingMode, groups: &[&str]) -> VolumeParameters {
        VolumeParameters {
            lvm_type: LvmType::Thick,
            binding_mode: mode,
            bindings: groups.iter().map(|g| ResolvedBinding::thick(*g)).collect(),
            contiguous: false,
        }
    }

    fn two_nodes() -> Vec<PlacementCandidate> {
        let inventory = vec![
            capacity_group("vg-small", "node-a", "10Gi", "0", &[]),
            capacity_group("vg-large", "node-b", "60Gi", "10Gi", &[]),
        ];
        let params = thick_params(VolumeBindingMode::Immediate, &["vg-small", "vg-large"]);
        PlacementEngine::candidates(&inventory, &params).unwrap()
    }

    #[test]
    fn test_immediate_picks_node_with_most_free_space() {
        let decision = PlacementEngine::select(
            &two_nodes(),
            LvmType::Thick,
            VolumeBindingMode::Immediate,
            20 * GIB,
            None,
        )
        .unwrap();

        assert_eq!(decision.node_name, "node-b");
        assert_eq!(decision.group_name, "vg-large");
        assert_eq!(decision.vg_name_on_node, "vg-large-vg");
        assert_eq!(decision.thin_pool, None);
    }

    #[test]
    fn test_immediate_thick_rejects_oversized_request() {
        let result = PlacementEngine::select(
            &two_nodes(),
            LvmType::Thick,
            VolumeBindingMode::Immediate,
            60 * GIB,
            None,
        );
        assert_matches!(
            result,
            Err(Error::InsufficientCapacity { requested, available })
                if requested == 60 * GIB && available == 50 * GIB
        );
    }

    #[test]
    fn test_deferred_honors_preferred_node() {
        let candidates = two_nodes();
        let decision = PlacementEngine::select(
            &candidates,
            LvmType::Thick,
            VolumeBindingMode::WaitForFirstConsumer,
            60 * GIB,
            Some("node-a"),
        )
        .unwrap();
        assert_eq!(decision.group_name, "vg-small");

        assert_matches!(
            PlacementEngine::select(
                &candidates,
                LvmType::Thick,
                VolumeBindingMode::WaitForFirstConsumer,
                GIB,
                None,
            ),
            Err(Error::NoCandidate(_))
        );
        assert_matches!(
            PlacementEngine::select(
                &candidates,
                LvmType::Thick,
                VolumeBindingMode::WaitForFirstConsumer,
                GIB,
                Some("node-z"),
            ),
            Err(Error::NoCandidate(msg)) if msg == "no LVMVolumeGroup found for node node-z"
        );
    }

    #[test]
    fn test_thin_uses_pool_free_space() {
        let inventory = vec![
            capacity_group("vg-1", "node-a", "100Gi", "90Gi", &[("pool", "80Gi", "10Gi")]),
            capacity_group("vg-2", "node-b", "100Gi", "0", &[("pool", "20Gi", "0")]),
        ];
        let params = VolumeParameters {
            lvm_type: LvmType::Thin,
            binding_mode: VolumeBindingMode::Immediate,
            bindings: vec![
                ResolvedBinding::thin("vg-1", "pool"),
                ResolvedBinding::thin("vg-2", "pool"),
            ],
            contiguous: false,
        };
        let candidates = PlacementEngine::candidates(&inventory, &params).unwrap();

        // Thin volumes may overcommit, so no capacity check applies
        let decision = PlacementEngine::select(
            &candidates,
            LvmType::Thin,
            VolumeBindingMode::Immediate,
            500 * GIB,
            None,
        )
        .unwrap();
        assert_eq!(decision.node_name, "node-a");
        assert_eq!(decision.thin_pool.as_deref(), Some("pool"));
    }

    #[test]
    fn test_candidates_skip_unusable_groups() {
        let mut nodeless = capacity_group("vg-2", "node-b", "10Gi", "0", &[]);
        nodeless.status.as_mut().unwrap().nodes.clear();
        let inventory = vec![capacity_group("vg-1", "node-a", "10Gi", "0", &[]), nodeless];

        let params = thick_params(VolumeBindingMode::Immediate, &["vg-1", "vg-2", "vg-absent"]);
        let candidates = PlacementEngine::candidates(&inventory, &params).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].group_name, "vg-1");

        let params = VolumeParameters {
            lvm_type: LvmType::Thin,
            bindings: vec![ResolvedBinding::thick("vg-1")],
            ..params
        };
        assert_matches!(
            PlacementEngine::candidates(&inventory, &params),
            Err(Error::InvalidArgument(_))
        );
    }

    #[test]
    fn test_group_tie_breaks_by_name() {
        let inventory = vec![
            capacity_group("vg-b", "node-a", "10Gi", "0", &[]),
            capacity_group("vg-a", "node-a", "10Gi", "0", &[]),
        ];
        let params = thick_params(VolumeBindingMode::Immediate, &["vg-b", "vg-a"]);
        let candidates = PlacementEngine::candidates(&inventory, &params).unwrap();

        let decision = PlacementEngine::select(
            &candidates,
            LvmType::Thick,
            VolumeBindingMode::Immediate,
            GIB,
            None,
        )
        .unwrap();
        assert_eq!(decision.group_name, "vg-a");
    }

    #[test]
    fn test_no_candidates() {
        assert_matches!(
            PlacementEngine::select(&[], LvmType::Thick, VolumeBindingMode::Immediate, GIB, None),
            Err(Error::NoCandidate(_))
        );
    }
}
