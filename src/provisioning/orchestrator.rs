//! Volume provisioning
//!
//! Turns placement decisions into LVMLogicalVolume requests and waits for the
//! node-level LVM controller to report them converged. The engine only
//! exposes status, so every wait is a bounded poll: a fixed interval through
//! the injected [`Clock`](crate::domain::Clock), a deadline, and a
//! cancellation token that ends the wait promptly.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::constants::{
    DEFAULT_CONVERGENCE_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL_MS, SUB_PATH_CONTEXT_KEY,
    THIN_POOL_NAME_CONTEXT_KEY, TOPOLOGY_KEY, VG_NAME_CONTEXT_KEY,
};
use crate::crd::{
    LVMLogicalVolume, LVMLogicalVolumeSpec, LogicalVolumePhase, LvmType, ThickLogicalVolumeSpec,
    ThinPoolRef,
};
use crate::domain::{ClockRef, LogicalVolumeEngineRef, VolumeGroupInventoryRef};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::provisioning::params::VolumeParameters;
use crate::provisioning::placement::PlacementEngine;

/// Default size tolerance: 32Mi
pub const DEFAULT_RESIZE_DELTA_BYTES: u64 = 32 * 1024 * 1024;

/// Provisioner configuration
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Delay between status polls
    pub poll_interval: Duration,
    /// Deadline for one convergence wait
    pub convergence_timeout: Duration,
    /// Absolute size tolerance, in bytes
    pub resize_delta: u64,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            convergence_timeout: Duration::from_secs(DEFAULT_CONVERGENCE_TIMEOUT_SECS),
            resize_delta: DEFAULT_RESIZE_DELTA_BYTES,
        }
    }
}

// =============================================================================
// Requests and Responses
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct CreateVolumeRequest {
    pub name: String,
    pub capacity_bytes: u64,
    pub parameters: BTreeMap<String, String>,
    /// Node chosen by the scheduler, for `WaitForFirstConsumer` classes
    pub preferred_node: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedVolume {
    pub volume_id: String,
    pub capacity_bytes: u64,
    pub volume_context: BTreeMap<String, String>,
    pub accessible_topology: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExpandVolumeRequest {
    pub volume_id: String,
    pub capacity_bytes: u64,
    /// Raw block volumes carry no filesystem to grow
    pub block: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandedVolume {
    pub capacity_bytes: u64,
    pub node_expansion_required: bool,
}

/// Whether two sizes are closer than `delta`
pub fn sizes_equal_within_delta(left: u64, right: u64, delta: u64) -> bool {
    left.abs_diff(right) < delta
}

// =============================================================================
// Provisioner
// =============================================================================

/// Creates, expands and deletes logical volumes
pub struct VolumeProvisioner {
    inventory: VolumeGroupInventoryRef,
    volumes: LogicalVolumeEngineRef,
    clock: ClockRef,
    metrics: Arc<Metrics>,
    config: ProvisionerConfig,
}

impl VolumeProvisioner {
    pub fn new(
        inventory: VolumeGroupInventoryRef,
        volumes: LogicalVolumeEngineRef,
        clock: ClockRef,
        metrics: Arc<Metrics>,
        config: ProvisionerConfig,
    ) -> Self {
        Self {
            inventory,
            volumes,
            clock,
            metrics,
            config,
        }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Place and create a logical volume, then wait for it to converge
    pub async fn create_volume(
        &self,
        request: &CreateVolumeRequest,
        cancel: &CancellationToken,
    ) -> Result<CreatedVolume> {
        let start = self.clock.now();
        let result = self.create(request, cancel).await;
        self.metrics
            .record_provisioning("create_volume", result.is_ok(), self.clock.now() - start);
        result
    }

    /// Grow a logical volume, then wait for it to converge
    pub async fn expand_volume(
        &self,
        request: &ExpandVolumeRequest,
        cancel: &CancellationToken,
    ) -> Result<ExpandedVolume> {
        let start = self.clock.now();
        let result = self.expand(request, cancel).await;
        self.metrics
            .record_provisioning("expand_volume", result.is_ok(), self.clock.now() - start);
        result
    }

    /// Release a logical volume; an absent volume is already deleted
    pub async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        let start = self.clock.now();
        let result = if volume_id.is_empty() {
            Err(Error::InvalidArgument("Volume id cannot be empty".into()))
        } else {
            self.delete_logical_volume(volume_id).await
        };
        self.metrics
            .record_provisioning("delete_volume", result.is_ok(), self.clock.now() - start);
        result
    }

    async fn create(
        &self,
        request: &CreateVolumeRequest,
        cancel: &CancellationToken,
    ) -> Result<CreatedVolume> {
        if request.name.is_empty() {
            return Err(Error::InvalidArgument("Volume Name cannot be empty".into()));
        }
        let params = VolumeParameters::from_parameters(&request.parameters)?;
        info!(
            "Creating volume {}: {} bytes, {} {}",
            request.name, request.capacity_bytes, params.lvm_type, params.binding_mode
        );

        let inventory = self.inventory.list().await?;
        let candidates = PlacementEngine::candidates(&inventory, &params)?;
        let decision = PlacementEngine::select(
            &candidates,
            params.lvm_type,
            params.binding_mode,
            request.capacity_bytes,
            request.preferred_node.as_deref(),
        )?;
        info!(
            "Volume {} placed on node {} in LVMVolumeGroup {}",
            request.name, decision.node_name, decision.group_name
        );

        // The logical volume shares the request name on both sides
        let spec = LVMLogicalVolumeSpec {
            actual_lv_name_on_the_node: request.name.clone(),
            lvm_type: params.lvm_type,
            size: Quantity(request.capacity_bytes.to_string()),
            lvm_volume_group_name: decision.group_name.clone(),
            thin: decision
                .thin_pool
                .clone()
                .map(|pool_name| ThinPoolRef { pool_name }),
            thick: match params.lvm_type {
                LvmType::Thick => Some(ThickLogicalVolumeSpec {
                    contiguous: params.contiguous,
                }),
                LvmType::Thin => None,
            },
        };

        match self
            .volumes
            .create(&LVMLogicalVolume::with_finalizer(&request.name, spec))
            .await
        {
            Ok(_) => debug!("LVMLogicalVolume {} created", request.name),
            Err(e) if e.is_already_exists() => {
                info!("LVMLogicalVolume {} already exists", request.name)
            }
            Err(e) => return Err(e),
        }

        if let Err(e) = self
            .wait_for_convergence(&request.name, request.capacity_bytes, "create_volume", cancel)
            .await
        {
            warn!(
                "Volume {} did not converge, deleting LVMLogicalVolume: {}",
                request.name, e
            );
            if let Err(delete_err) = self.delete_logical_volume(&request.name).await {
                error!(
                    "Failed to delete LVMLogicalVolume {}: {}",
                    request.name, delete_err
                );
            }
            return Err(e);
        }

        let mut volume_context = request.parameters.clone();
        volume_context.insert(SUB_PATH_CONTEXT_KEY.to_string(), request.name.clone());
        volume_context.insert(VG_NAME_CONTEXT_KEY.to_string(), decision.vg_name_on_node);
        volume_context.insert(
            THIN_POOL_NAME_CONTEXT_KEY.to_string(),
            decision.thin_pool.unwrap_or_default(),
        );

        Ok(CreatedVolume {
            volume_id: request.name.clone(),
            capacity_bytes: request.capacity_bytes,
            volume_context,
            accessible_topology: BTreeMap::from([(TOPOLOGY_KEY.to_string(), decision.node_name)]),
        })
    }

    async fn expand(
        &self,
        request: &ExpandVolumeRequest,
        cancel: &CancellationToken,
    ) -> Result<ExpandedVolume> {
        if request.volume_id.is_empty() {
            return Err(Error::InvalidArgument("Volume id cannot be empty".into()));
        }

        let mut volume = self
            .volumes
            .get(&request.volume_id)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "LVMLogicalVolume".into(),
                name: request.volume_id.clone(),
            })?;

        let requested = request.capacity_bytes;
        let actual = volume.actual_size_bytes()?;
        let delta = self.config.resize_delta;
        let node_expansion_required = !request.block;

        if actual > requested.saturating_add(delta)
            || sizes_equal_within_delta(requested, actual, delta)
        {
            info!(
                "Volume {} already has {} bytes (requested {}), no resize needed",
                request.volume_id, actual, requested
            );
            return Ok(ExpandedVolume {
                capacity_bytes: actual,
                node_expansion_required,
            });
        }

        if volume.spec.lvm_type == LvmType::Thick {
            let group_name = &volume.spec.lvm_volume_group_name;
            let group = self
                .inventory
                .get(group_name)
                .await?
                .ok_or_else(|| Error::ResourceNotFound {
                    kind: "LVMVolumeGroup".into(),
                    name: group_name.clone(),
                })?;

            let free = group.free_bytes()?;
            let growth = requested.saturating_sub(actual);
            if free < growth {
                return Err(Error::InsufficientCapacity {
                    requested: growth,
                    available: free,
                });
            }
        }

        info!(
            "Resizing volume {} from {} to {} bytes",
            request.volume_id, actual, requested
        );
        volume.spec.size = Quantity(requested.to_string());
        self.volumes.replace(&volume).await?;

        self.wait_for_convergence(&request.volume_id, requested, "expand_volume", cancel)
            .await?;

        Ok(ExpandedVolume {
            capacity_bytes: requested,
            node_expansion_required,
        })
    }

    /// Strip the provisioner finalizer, then delete
    async fn delete_logical_volume(&self, name: &str) -> Result<()> {
        let Some(mut volume) = self.volumes.get(name).await? else {
            debug!("LVMLogicalVolume {} not found, nothing to delete", name);
            return Ok(());
        };

        if volume.remove_finalizer() {
            match self.volumes.replace(&volume).await {
                Ok(_) => debug!("Removed finalizer from LVMLogicalVolume {}", name),
                Err(e) if e.is_not_found() => {
                    debug!("LVMLogicalVolume {} disappeared before deletion", name);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        } else {
            warn!("LVMLogicalVolume {} carries no provisioner finalizer", name);
        }

        self.volumes.delete(name).await?;
        info!("Deleted LVMLogicalVolume {}", name);
        Ok(())
    }

    /// Poll until the volume is Created within tolerance of `requested`
    ///
    /// Returns the number of polls taken.
    async fn wait_for_convergence(
        &self,
        name: &str,
        requested: u64,
        operation: &str,
        cancel: &CancellationToken,
    ) -> Result<u32> {
        let deadline = self.clock.now() + self.config.convergence_timeout;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(Error::Cancelled { volume_name: name.to_string() });
                }
                _ = self.clock.sleep(self.config.poll_interval) => {}
            }

            let volume = self
                .volumes
                .get(name)
                .await?
                .ok_or_else(|| Error::ResourceNotFound {
                    kind: "LVMLogicalVolume".into(),
                    name: name.to_string(),
                })?;

            if attempts % 10 == 0 {
                debug!(
                    "Waiting for LVMLogicalVolume {}: attempt {}, phase {:?}",
                    name,
                    attempts,
                    volume.phase()
                );
            }

            match volume.phase() {
                Some(LogicalVolumePhase::Failed) => {
                    return Err(Error::VolumeFailed {
                        volume_name: name.to_string(),
                        reason: volume.failure_reason(),
                    });
                }
                Some(LogicalVolumePhase::Created) => {
                    let actual = volume.actual_size_bytes()?;
                    if sizes_equal_within_delta(requested, actual, self.config.resize_delta) {
                        debug!("LVMLogicalVolume {} converged after {} polls", name, attempts);
                        self.metrics.record_convergence(operation, attempts);
                        return Ok(attempts);
                    }
                }
                _ => {}
            }

            if self.clock.now() >= deadline {
                return Err(Error::Timeout {
                    volume_name: name.to_string(),
                    attempts,
                });
            }
        }
    }
}
