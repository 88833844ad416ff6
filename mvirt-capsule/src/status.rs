//! Capsule status aggregation.
//!
//! A capsule's status mirrors its sandbox container as reported by the
//! compute backend. Failures to observe the sandbox never surface to the
//! caller; they turn into `Unknown` until the next successful sync.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::compute::ComputeBackend;
use crate::error::{CapsuleError, Result};
use crate::locks::CapsuleLocks;
use crate::model::{Capsule, Container, ContainerStatus};
use crate::store::{CapsuleStore, ContainerStore, DataStore};

pub struct StatusAggregator {
    store: Arc<dyn DataStore>,
    compute: Arc<dyn ComputeBackend>,
    locks: Arc<CapsuleLocks>,
}

impl StatusAggregator {
    pub fn new(
        store: Arc<dyn DataStore>,
        compute: Arc<dyn ComputeBackend>,
        locks: Arc<CapsuleLocks>,
    ) -> Self {
        Self {
            store,
            compute,
            locks,
        }
    }

    /// Refresh one capsule's status from its sandbox and persist it.
    ///
    /// Returns the capsule with its members resolved, or `None` when it was
    /// deleted before the sync got its turn. Sync failures never surface.
    pub async fn sync_one(&self, capsule: Capsule) -> Option<Capsule> {
        let _guard = self.locks.acquire(&capsule.uuid).await;

        let mut current = match self.store.get_capsule(&capsule.uuid).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                debug!(capsule = %capsule.uuid, "Capsule vanished before status sync");
                return None;
            }
            Err(e) => {
                warn!(capsule = %capsule.uuid, error = %e, "Failed to reload capsule for status sync");
                return Some(unknown(capsule));
            }
        };
        current.containers = self.resolve_members(&current).await;

        let status = match self.observe(&current).await {
            Ok(status) => status,
            Err(e) => {
                warn!(capsule = %current.uuid, error = %e, "Failed to query sandbox status");
                ContainerStatus::Unknown
            }
        };

        if status != ContainerStatus::Unknown {
            self.record_sandbox_status(&mut current, status).await;
        }

        if current.status == status {
            return Some(current);
        }

        current.status = status;
        match self.store.save_capsule(&current).await {
            Ok(saved) => Some(saved),
            Err(e) => {
                warn!(capsule = %current.uuid, error = %e, "Failed to persist capsule status");
                Some(current)
            }
        }
    }

    /// Sync every capsule independently. One failing member does not affect
    /// the others; capsules deleted in the meantime are left out.
    pub async fn sync_many(&self, capsules: Vec<Capsule>) -> Vec<Capsule> {
        join_all(capsules.into_iter().map(|c| self.sync_one(c)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Load member records in stored order, skipping any that are gone.
    pub async fn resolve_members(&self, capsule: &Capsule) -> Vec<Container> {
        let mut members = Vec::with_capacity(capsule.containers_uuids.len());
        for uuid in &capsule.containers_uuids {
            match self.store.get_container(uuid).await {
                Ok(Some(container)) => members.push(container),
                Ok(None) => debug!(capsule = %capsule.uuid, container = %uuid, "Member record missing"),
                Err(e) => {
                    warn!(capsule = %capsule.uuid, container = %uuid, error = %e, "Failed to load member")
                }
            }
        }
        members
    }

    async fn observe(&self, capsule: &Capsule) -> Result<ContainerStatus> {
        let sandbox_uuid = capsule.sandbox_uuid().ok_or_else(|| {
            CapsuleError::NotFound(format!("capsule {} has no sandbox", capsule.uuid))
        })?;
        let sandbox = capsule
            .containers
            .iter()
            .find(|c| c.uuid == sandbox_uuid)
            .ok_or_else(|| CapsuleError::NotFound(format!("sandbox container {}", sandbox_uuid)))?;

        let live = self.compute.container_show(sandbox).await?;
        Ok(live.status)
    }

    async fn record_sandbox_status(&self, capsule: &mut Capsule, status: ContainerStatus) {
        let Some(sandbox) = capsule.containers.first_mut() else {
            return;
        };
        if sandbox.status == status {
            return;
        }

        let mut updated = sandbox.clone();
        updated.status = status;
        match self.store.save_container(&updated).await {
            Ok(saved) => *sandbox = saved,
            Err(e) => {
                warn!(container = %updated.uuid, error = %e, "Failed to persist sandbox status")
            }
        }
    }
}

fn unknown(mut capsule: Capsule) -> Capsule {
    capsule.status = ContainerStatus::Unknown;
    capsule
}
