//! Capsule lifecycle orchestrator.
//!
//! Creates a capsule as one unit (sandbox first, then one container per
//! template), hands it to the compute backend, and tears it down again in
//! stored order. Reads go through the status aggregator.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::audit::CapsuleAuditLogger;
use crate::compute::{ComputeBackend, ComputeError};
use crate::error::{CapsuleError, Result};
use crate::locks::CapsuleLocks;
use crate::model::{
    Capsule, CapsuleTemplate, Container, ContainerRequest, ContainerStatus, RequestContext,
    TaskState,
};
use crate::names::NameGenerator;
use crate::status::StatusAggregator;
use crate::store::{
    CapsuleFilters, CapsuleStore, ContainerStore, DataStore, ListParams, SortDir, SortKey,
    StoreError,
};
use crate::translator::{self, string_or_none};

/// States a capsule may be deleted from without `force`.
const DELETABLE: &[ContainerStatus] = &[
    ContainerStatus::Created,
    ContainerStatus::Error,
    ContainerStatus::Stopped,
    ContainerStatus::Deleted,
    ContainerStatus::Dead,
];

/// States a capsule may be deleted from with `force`.
const FORCE_DELETABLE: &[ContainerStatus] = &[
    ContainerStatus::Created,
    ContainerStatus::Error,
    ContainerStatus::Stopped,
    ContainerStatus::Deleted,
    ContainerStatus::Dead,
    ContainerStatus::Creating,
    ContainerStatus::Running,
    ContainerStatus::Unknown,
    ContainerStatus::Restarting,
    ContainerStatus::Rebuilding,
];

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Restart policy applied when a create request names none.
    pub default_restart_policy: Option<String>,
    /// Largest page a list request may ask for; also the default page size.
    pub max_limit: usize,
    /// Destroy the records of a failed create instead of leaving them for inspection.
    pub rollback_on_failure: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_restart_policy: Some("always".to_string()),
            max_limit: 1000,
            rollback_on_failure: false,
        }
    }
}

/// Listing query as received from a caller, not yet validated.
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub limit: Option<usize>,
    pub marker: Option<String>,
    pub sort_key: Option<String>,
    pub sort_dir: Option<String>,
    pub project_id: Option<String>,
}

/// One page of synced capsules.
#[derive(Debug, Clone)]
pub struct CapsulePage {
    pub capsules: Vec<Capsule>,
    /// Marker for the following page, set when this page is full.
    pub next_marker: Option<String>,
    pub limit: usize,
}

/// Records persisted so far by a create, in creation order.
#[derive(Default)]
struct Progress {
    capsule: Option<String>,
    containers: Vec<String>,
}

pub struct Orchestrator {
    store: Arc<dyn DataStore>,
    compute: Arc<dyn ComputeBackend>,
    names: Arc<dyn NameGenerator>,
    audit: Arc<CapsuleAuditLogger>,
    locks: Arc<CapsuleLocks>,
    status: StatusAggregator,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn DataStore>,
        compute: Arc<dyn ComputeBackend>,
        names: Arc<dyn NameGenerator>,
        audit: Arc<CapsuleAuditLogger>,
        config: OrchestratorConfig,
    ) -> Self {
        let locks = Arc::new(CapsuleLocks::new());
        let status = StatusAggregator::new(
            Arc::clone(&store),
            Arc::clone(&compute),
            Arc::clone(&locks),
        );
        Self {
            store,
            compute,
            names,
            audit,
            locks,
            status,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Create a capsule from a pod-style template and ask the backend to realize it.
    pub async fn create(&self, ctx: &RequestContext, template: CapsuleTemplate) -> Result<Capsule> {
        if template.spec.containers.is_empty() {
            return Err(CapsuleError::InvalidInput(
                "capsule needs at least one container".to_string(),
            ));
        }

        let uuid = uuid::Uuid::new_v4().to_string();
        let restart_policy = string_or_none(template.spec.restart_policy.as_deref())
            .or_else(|| self.config.default_restart_policy.clone());
        let requests = translator::translate(
            &uuid,
            &template.spec,
            restart_policy.as_deref(),
            self.names.as_ref(),
        )?;

        let _guard = self.locks.acquire(&uuid).await;

        let mut progress = Progress::default();
        let capsule = match self
            .persist_unit(ctx, &uuid, &template, restart_policy, requests, &mut progress)
            .await
        {
            Ok(capsule) => capsule,
            Err(e) => {
                warn!(capsule = %uuid, error = %e, "Capsule create failed");
                self.audit.capsule_create_failed(&uuid, &e.to_string());
                if self.config.rollback_on_failure {
                    self.compensate(&progress).await;
                }
                return Err(e);
            }
        };

        let capsule = self.realize(capsule).await?;

        info!(
            capsule = %capsule.uuid,
            containers = capsule.containers_uuids.len(),
            "Created capsule"
        );
        self.audit.capsule_created(
            &capsule.uuid,
            capsule.name.as_deref().or(capsule.meta_name.as_deref()),
            capsule.containers_uuids.len(),
        );
        Ok(capsule)
    }

    async fn persist_unit(
        &self,
        ctx: &RequestContext,
        uuid: &str,
        template: &CapsuleTemplate,
        restart_policy: Option<String>,
        requests: Vec<ContainerRequest>,
        progress: &mut Progress,
    ) -> Result<Capsule> {
        let mut capsule = Capsule::new(
            uuid.to_string(),
            ctx,
            string_or_none(template.name.as_deref()),
            restart_policy,
        );
        if let Some(metadata) = &template.spec.metadata {
            capsule.meta_name = string_or_none(metadata.name.as_deref());
            capsule.meta_labels = metadata.labels.clone();
        }

        let mut capsule = self.store.create_capsule(capsule).await?;
        progress.capsule = Some(capsule.uuid.clone());

        let sandbox = self
            .store
            .create_container(Container::sandbox(ctx, uuid))
            .await?;
        debug!(capsule = %uuid, sandbox = %sandbox.uuid, "Created sandbox container");
        progress.containers.push(sandbox.uuid.clone());
        capsule.attach(sandbox);

        for request in requests {
            translator::ensure_image(self.compute.as_ref(), &request).await?;
            let container = self
                .store
                .create_container(Container::from_request(ctx, uuid, request))
                .await?;
            debug!(capsule = %uuid, container = %container.uuid, "Created workload container");
            progress.containers.push(container.uuid.clone());
            capsule.attach(container);
        }

        Ok(self.store.save_capsule(&capsule).await?)
    }

    async fn realize(&self, mut capsule: Capsule) -> Result<Capsule> {
        let Err(e) = self.compute.capsule_create(&capsule).await else {
            return Ok(capsule);
        };

        error!(capsule = %capsule.uuid, error = %e, "Compute backend rejected capsule");
        self.audit.capsule_create_failed(&capsule.uuid, &e.to_string());
        capsule.status = ContainerStatus::Error;
        if let Err(save_err) = self.store.save_capsule(&capsule).await {
            warn!(capsule = %capsule.uuid, error = %save_err, "Failed to mark capsule as errored");
        }
        Err(CapsuleError::BackendUnavailable(format!(
            "failed to realize capsule {}: {}",
            capsule.uuid, e
        )))
    }

    async fn compensate(&self, progress: &Progress) {
        for uuid in progress.containers.iter().rev() {
            if let Err(e) = self.store.destroy_container(uuid).await {
                warn!(container = %uuid, error = %e, "Rollback could not destroy container");
            }
        }
        if let Some(uuid) = &progress.capsule {
            if let Err(e) = self.store.destroy_capsule(uuid).await {
                warn!(capsule = %uuid, error = %e, "Rollback could not destroy capsule");
            }
            info!(capsule = %uuid, containers = progress.containers.len(), "Rolled back capsule create");
        }
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// Look a capsule up by UUID, then by name.
    async fn resolve(&self, id: &str) -> Result<Capsule> {
        if let Some(capsule) = self.store.get_capsule(id).await? {
            return Ok(capsule);
        }
        self.store
            .get_capsule_by_name(id)
            .await?
            .ok_or_else(|| CapsuleError::NotFound(format!("capsule {}", id)))
    }

    /// Get a capsule by UUID or name with a fresh status.
    pub async fn get(&self, id: &str) -> Result<Capsule> {
        let capsule = self.resolve(id).await?;
        self.status
            .sync_one(capsule)
            .await
            .ok_or_else(|| CapsuleError::NotFound(format!("capsule {}", id)))
    }

    /// List one page of capsules with fresh statuses.
    pub async fn list(&self, request: ListRequest) -> Result<CapsulePage> {
        let limit = match request.limit {
            None => self.config.max_limit,
            Some(0) => {
                return Err(CapsuleError::InvalidInput(
                    "limit must be a positive integer".to_string(),
                ));
            }
            Some(limit) => limit.min(self.config.max_limit),
        };
        let sort_key = request
            .sort_key
            .as_deref()
            .map(str::parse::<SortKey>)
            .transpose()
            .map_err(CapsuleError::InvalidInput)?
            .unwrap_or_default();
        let sort_dir = request
            .sort_dir
            .as_deref()
            .map(str::parse::<SortDir>)
            .transpose()
            .map_err(CapsuleError::InvalidInput)?
            .unwrap_or_default();

        let params = ListParams {
            limit,
            marker: request.marker,
            sort_key,
            sort_dir,
            filters: CapsuleFilters {
                project_id: request.project_id,
            },
        };
        let capsules = self
            .store
            .list_capsules(&params)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(msg) => CapsuleError::InvalidInput(msg),
                other => other.into(),
            })?;

        let full = capsules.len() == limit;
        // Capsules deleted while syncing drop out; the marker must still exist.
        let capsules = self.status.sync_many(capsules).await;
        let next_marker = if full {
            capsules.last().map(|c| c.uuid.clone())
        } else {
            None
        };

        Ok(CapsulePage {
            capsules,
            next_marker,
            limit,
        })
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a capsule and its containers, sandbox first.
    ///
    /// On failure the capsule keeps `task_state = deleting`; calling delete
    /// again resumes where the previous attempt stopped.
    pub async fn delete(&self, id: &str, force: bool) -> Result<()> {
        let uuid = self.resolve(id).await?.uuid;

        let guard = self.locks.acquire(&uuid).await;
        let result = self.teardown(&uuid, force).await;
        drop(guard);

        if result.is_ok() {
            info!(capsule = %uuid, force, "Deleted capsule");
            self.audit.capsule_deleted(&uuid, force);
        }
        result
    }

    async fn teardown(&self, uuid: &str, force: bool) -> Result<()> {
        let mut capsule = self
            .store
            .get_capsule(uuid)
            .await?
            .ok_or_else(|| CapsuleError::NotFound(format!("capsule {}", uuid)))?;

        if capsule.task_state == Some(TaskState::Deleting) {
            info!(capsule = %uuid, "Resuming interrupted delete");
        } else {
            check_deletable(&capsule, force)?;
            capsule.task_state = Some(TaskState::Deleting);
            capsule = self.store.save_capsule(&capsule).await?;
        }

        for container_uuid in capsule.containers_uuids.clone() {
            let Some(container) = self.store.get_container(&container_uuid).await? else {
                debug!(capsule = %uuid, container = %container_uuid, "Container already removed");
                continue;
            };

            if let Err(e) = self.remove_from_backend(&container, force).await {
                error!(capsule = %uuid, container = %container_uuid, error = %e, "Failed to delete container");
                self.audit
                    .capsule_delete_failed(uuid, &container_uuid, &e.to_string());
                return Err(e.into());
            }
            self.store.destroy_container(&container_uuid).await?;
        }

        capsule.task_state = None;
        let capsule = self.store.save_capsule(&capsule).await?;
        self.store.destroy_capsule(&capsule.uuid).await?;
        Ok(())
    }

    /// Delete on the backend. A container the backend never knew counts as deleted.
    async fn remove_from_backend(
        &self,
        container: &Container,
        force: bool,
    ) -> std::result::Result<(), ComputeError> {
        match self.compute.container_delete(container, force).await {
            Ok(()) => Ok(()),
            Err(ComputeError::ContainerNotFound(_)) => {
                debug!(container = %container.uuid, "Container unknown to backend");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Remove what a failed create left behind.
    ///
    /// Only capsules whose member list was never recorded qualify; anything
    /// else goes through [`Orchestrator::delete`]. Returns the number of
    /// containers removed.
    pub async fn purge_incomplete(&self, uuid: &str) -> Result<usize> {
        let guard = self.locks.acquire(uuid).await;

        let capsule = self
            .store
            .get_capsule(uuid)
            .await?
            .ok_or_else(|| CapsuleError::NotFound(format!("capsule {}", uuid)))?;
        if !capsule.containers_uuids.is_empty() {
            return Err(CapsuleError::ConflictingState(format!(
                "capsule {} was fully created, delete it instead",
                uuid
            )));
        }

        let leftovers = self.store.list_containers_by_capsule(uuid).await?;
        for container in leftovers.iter().rev() {
            self.remove_from_backend(container, true).await?;
            self.store.destroy_container(&container.uuid).await?;
        }
        self.store.destroy_capsule(uuid).await?;

        drop(guard);
        self.audit.capsule_purged(uuid, leftovers.len());
        Ok(leftovers.len())
    }
}

fn check_deletable(capsule: &Capsule, force: bool) -> Result<()> {
    let allowed = if force { FORCE_DELETABLE } else { DELETABLE };
    if allowed.contains(&capsule.status) {
        return Ok(());
    }

    let hint = if !force && FORCE_DELETABLE.contains(&capsule.status) {
        ", retry with force"
    } else {
        ""
    };
    Err(CapsuleError::ConflictingState(format!(
        "cannot delete capsule {} in status {}{}",
        capsule.uuid, capsule.status, hint
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::Image;
    use crate::model::{CapsuleMetadata, CapsuleSpec, ContainerTemplate, RestartPolicy};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Compute fake that records delete order and fails on demand.
    struct RecordingCompute {
        images: Vec<String>,
        /// Status reported by `container_show`; `None` makes it fail.
        show: Option<ContainerStatus>,
        fail_realize: bool,
        fail_delete: Mutex<HashSet<String>>,
        realized: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
    }

    impl RecordingCompute {
        fn new(images: &[&str], show: Option<ContainerStatus>) -> Self {
            Self {
                images: images.iter().map(|s| s.to_string()).collect(),
                show,
                fail_realize: false,
                fail_delete: Mutex::new(HashSet::new()),
                realized: Mutex::new(Vec::new()),
                deleted: Mutex::new(Vec::new()),
            }
        }

        fn deleted(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ComputeBackend for RecordingCompute {
        async fn image_search(
            &self,
            image: &str,
            _image_driver: Option<&str>,
            _exact: bool,
        ) -> std::result::Result<Vec<Image>, ComputeError> {
            Ok(self
                .images
                .iter()
                .filter(|i| i.as_str() == image)
                .map(|i| Image {
                    repo: i.clone(),
                    tag: "latest".to_string(),
                    driver: "docker".to_string(),
                })
                .collect())
        }

        async fn container_show(
            &self,
            container: &Container,
        ) -> std::result::Result<Container, ComputeError> {
            let status = self
                .show
                .ok_or_else(|| ComputeError::Unavailable("compute host down".to_string()))?;
            let mut live = container.clone();
            live.status = status;
            Ok(live)
        }

        async fn container_delete(
            &self,
            container: &Container,
            _force: bool,
        ) -> std::result::Result<(), ComputeError> {
            if self.fail_delete.lock().unwrap().contains(&container.uuid) {
                return Err(ComputeError::Unavailable("compute host down".to_string()));
            }
            self.deleted.lock().unwrap().push(container.uuid.clone());
            Ok(())
        }

        async fn capsule_create(&self, capsule: &Capsule) -> std::result::Result<(), ComputeError> {
            if self.fail_realize {
                return Err(ComputeError::Driver("scheduler rejected capsule".to_string()));
            }
            self.realized.lock().unwrap().push(capsule.uuid.clone());
            Ok(())
        }
    }

    struct FixedNames;

    impl NameGenerator for FixedNames {
        fn generate(&self) -> String {
            "zeta-22".to_string()
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        compute: Arc<RecordingCompute>,
        orchestrator: Arc<Orchestrator>,
    }

    fn harness(compute: RecordingCompute, config: OrchestratorConfig) -> Harness {
        let store = Arc::new(MemoryStore::default());
        let compute = Arc::new(compute);
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            compute.clone(),
            Arc::new(FixedNames),
            Arc::new(CapsuleAuditLogger::new_noop()),
            config,
        ));
        Harness {
            store,
            compute,
            orchestrator,
        }
    }

    fn default_harness() -> Harness {
        harness(
            RecordingCompute::new(&["nginx", "busybox"], Some(ContainerStatus::Running)),
            OrchestratorConfig::default(),
        )
    }

    fn ctx() -> RequestContext {
        RequestContext::new("p1", "u1")
    }

    fn template(images: &[&str]) -> CapsuleTemplate {
        CapsuleTemplate {
            name: Some("web".to_string()),
            spec: CapsuleSpec {
                containers: images
                    .iter()
                    .map(|image| ContainerTemplate {
                        image: Some(image.to_string()),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            },
        }
    }

    async fn only_capsule(store: &MemoryStore) -> Option<Capsule> {
        let params = ListParams {
            limit: 10,
            marker: None,
            sort_key: SortKey::Id,
            sort_dir: SortDir::Asc,
            filters: CapsuleFilters::default(),
        };
        store.list_capsules(&params).await.unwrap().into_iter().next()
    }

    #[tokio::test]
    async fn test_create_puts_sandbox_first() {
        let h = default_harness();
        let capsule = h
            .orchestrator
            .create(&ctx(), template(&["nginx", "busybox"]))
            .await
            .unwrap();

        assert_eq!(capsule.containers_uuids.len(), 3);
        assert_eq!(capsule.containers.len(), 3);
        assert!(capsule.containers[0].is_sandbox());
        assert_eq!(capsule.sandbox_uuid(), Some(capsule.containers[0].uuid.as_str()));
        assert_eq!(capsule.containers[1].image.as_deref(), Some("nginx"));
        assert_eq!(capsule.containers[2].image.as_deref(), Some("busybox"));
        for container in &capsule.containers[1..] {
            assert_eq!(container.status, ContainerStatus::Creating);
            assert_eq!(container.restart_policy, Some(RestartPolicy::named("always")));
            let name = container.name.as_deref().unwrap();
            assert_eq!(name, format!("capsule-{}-zeta-22", capsule.uuid));
        }

        let stored = h.store.get_capsule(&capsule.uuid).await.unwrap().unwrap();
        assert_eq!(stored.containers_uuids, capsule.containers_uuids);
        assert_eq!(stored.restart_policy.as_deref(), Some("always"));
        assert_eq!(*h.compute.realized.lock().unwrap(), vec![capsule.uuid.clone()]);
        assert_eq!(h.orchestrator.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_create_applies_metadata() {
        let h = default_harness();
        let mut t = template(&["nginx"]);
        t.name = None;
        t.spec.metadata = Some(CapsuleMetadata {
            name: Some("frontend".to_string()),
            labels: HashMap::from([("tier".to_string(), "web".to_string())]),
        });

        let capsule = h.orchestrator.create(&ctx(), t).await.unwrap();
        assert_eq!(capsule.meta_name.as_deref(), Some("frontend"));
        assert_eq!(capsule.meta_labels.get("tier").map(String::as_str), Some("web"));

        let fetched = h.orchestrator.get("frontend").await.unwrap();
        assert_eq!(fetched.uuid, capsule.uuid);
    }

    #[tokio::test]
    async fn test_create_rejects_empty_and_bad_policy() {
        let h = default_harness();
        let result = h.orchestrator.create(&ctx(), template(&[])).await;
        assert!(matches!(result, Err(CapsuleError::InvalidInput(_))));

        let mut t = template(&["nginx"]);
        t.spec.restart_policy = Some("sometimes".to_string());
        let result = h.orchestrator.create(&ctx(), t).await;
        assert!(matches!(result, Err(CapsuleError::InvalidConfiguration(_))));
        assert!(only_capsule(&h.store).await.is_none());
    }

    #[tokio::test]
    async fn test_missing_image_leaves_purgeable_records() {
        let h = default_harness();
        let result = h
            .orchestrator
            .create(&ctx(), template(&["nginx", "ghost"]))
            .await;
        assert!(matches!(result, Err(CapsuleError::ImageNotFound(ref image)) if image == "ghost"));
        assert!(h.compute.realized.lock().unwrap().is_empty());

        let leftover = only_capsule(&h.store).await.unwrap();
        assert!(leftover.containers_uuids.is_empty());
        let members = h.store.list_containers_by_capsule(&leftover.uuid).await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(members[0].is_sandbox());

        let purged = h.orchestrator.purge_incomplete(&leftover.uuid).await.unwrap();
        assert_eq!(purged, 2);
        assert!(only_capsule(&h.store).await.is_none());
        assert!(
            h.store
                .list_containers_by_capsule(&leftover.uuid)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_rollback_removes_partial_records() {
        let h = harness(
            RecordingCompute::new(&["nginx"], Some(ContainerStatus::Running)),
            OrchestratorConfig {
                rollback_on_failure: true,
                ..Default::default()
            },
        );
        let mut events = h.store.subscribe();

        let result = h
            .orchestrator
            .create(&ctx(), template(&["nginx", "ghost"]))
            .await;
        assert!(matches!(result, Err(CapsuleError::ImageNotFound(_))));
        assert!(only_capsule(&h.store).await.is_none());
        assert_eq!(h.orchestrator.locks.len(), 0);

        let mut capsule_uuid = None;
        while let Ok(event) = events.try_recv() {
            if let crate::store::Event::CapsuleCreated(c) = event {
                capsule_uuid = Some(c.uuid);
            }
        }
        let capsule_uuid = capsule_uuid.unwrap();
        assert!(
            h.store
                .list_containers_by_capsule(&capsule_uuid)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_purge_refuses_complete_capsule() {
        let h = default_harness();
        let capsule = h.orchestrator.create(&ctx(), template(&["nginx"])).await.unwrap();
        let result = h.orchestrator.purge_incomplete(&capsule.uuid).await;
        assert!(matches!(result, Err(CapsuleError::ConflictingState(_))));
    }

    #[tokio::test]
    async fn test_realize_failure_marks_error() {
        let mut compute = RecordingCompute::new(&["nginx"], Some(ContainerStatus::Stopped));
        compute.fail_realize = true;
        let h = harness(compute, OrchestratorConfig::default());

        let result = h.orchestrator.create(&ctx(), template(&["nginx"])).await;
        assert!(matches!(result, Err(CapsuleError::BackendUnavailable(_))));

        let stored = only_capsule(&h.store).await.unwrap();
        assert_eq!(stored.status, ContainerStatus::Error);
        assert_eq!(stored.containers_uuids.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_order_is_sandbox_first() {
        let h = default_harness();
        let capsule = h
            .orchestrator
            .create(&ctx(), template(&["nginx", "busybox"]))
            .await
            .unwrap();

        h.orchestrator.delete(&capsule.uuid, true).await.unwrap();

        assert_eq!(h.compute.deleted(), capsule.containers_uuids);
        assert!(h.store.get_capsule(&capsule.uuid).await.unwrap().is_none());
        for uuid in &capsule.containers_uuids {
            assert!(h.store.get_container(uuid).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_second_delete_is_not_found() {
        let h = default_harness();
        let capsule = h.orchestrator.create(&ctx(), template(&["nginx"])).await.unwrap();

        h.orchestrator.delete("web", true).await.unwrap();
        let result = h.orchestrator.delete(&capsule.uuid, true).await;
        assert!(matches!(result, Err(CapsuleError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_racing_deletes_leave_no_lock_behind() {
        let h = default_harness();
        let capsule = h.orchestrator.create(&ctx(), template(&["nginx"])).await.unwrap();

        // Both deletes resolve the capsule, then queue on its lock.
        let guard = h.orchestrator.locks.acquire(&capsule.uuid).await;
        let deletes: Vec<_> = (0..2)
            .map(|_| {
                let orchestrator = Arc::clone(&h.orchestrator);
                let uuid = capsule.uuid.clone();
                tokio::spawn(async move { orchestrator.delete(&uuid, true).await })
            })
            .collect();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(guard);

        let mut ok = 0;
        let mut not_found = 0;
        for delete in deletes {
            match delete.await.unwrap() {
                Ok(()) => ok += 1,
                Err(CapsuleError::NotFound(_)) => not_found += 1,
                Err(e) => panic!("unexpected delete error: {}", e),
            }
        }
        assert_eq!((ok, not_found), (1, 1));
        assert_eq!(h.compute.deleted(), capsule.containers_uuids);
        assert_eq!(h.orchestrator.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_reads_wait_for_teardown() {
        let h = default_harness();
        let capsule = h.orchestrator.create(&ctx(), template(&["nginx"])).await.unwrap();

        let guard = h.orchestrator.locks.acquire(&capsule.uuid).await;
        let get = {
            let orchestrator = Arc::clone(&h.orchestrator);
            let uuid = capsule.uuid.clone();
            tokio::spawn(async move { orchestrator.get(&uuid).await })
        };
        let list = {
            let orchestrator = Arc::clone(&h.orchestrator);
            tokio::spawn(async move { orchestrator.list(ListRequest::default()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!get.is_finished());
        assert!(!list.is_finished());

        h.orchestrator.teardown(&capsule.uuid, true).await.unwrap();
        drop(guard);

        let fetched = get.await.unwrap();
        assert!(matches!(fetched, Err(CapsuleError::NotFound(_))));
        let page = list.await.unwrap().unwrap();
        assert!(page.capsules.is_empty());
        assert!(page.next_marker.is_none());
        assert_eq!(h.orchestrator.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_delete_running_requires_force() {
        let h = default_harness();
        let capsule = h.orchestrator.create(&ctx(), template(&["nginx"])).await.unwrap();
        let synced = h.orchestrator.get(&capsule.uuid).await.unwrap();
        assert_eq!(synced.status, ContainerStatus::Running);

        let result = h.orchestrator.delete(&capsule.uuid, false).await;
        assert!(matches!(result, Err(CapsuleError::ConflictingState(ref msg)) if msg.contains("force")));
        let stored = h.store.get_capsule(&capsule.uuid).await.unwrap().unwrap();
        assert_eq!(stored.task_state, None);

        h.orchestrator.delete(&capsule.uuid, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_paused_capsule_is_never_deletable() {
        let h = harness(
            RecordingCompute::new(&["nginx"], Some(ContainerStatus::Paused)),
            OrchestratorConfig::default(),
        );
        let capsule = h.orchestrator.create(&ctx(), template(&["nginx"])).await.unwrap();
        h.orchestrator.get(&capsule.uuid).await.unwrap();

        let result = h.orchestrator.delete(&capsule.uuid, true).await;
        assert!(matches!(result, Err(CapsuleError::ConflictingState(_))));
    }

    #[tokio::test]
    async fn test_interrupted_delete_can_be_retried() {
        let h = default_harness();
        let capsule = h
            .orchestrator
            .create(&ctx(), template(&["nginx", "busybox"]))
            .await
            .unwrap();
        let workload_b = capsule.containers_uuids[2].clone();
        h.compute.fail_delete.lock().unwrap().insert(workload_b.clone());

        let result = h.orchestrator.delete(&capsule.uuid, true).await;
        assert!(matches!(result, Err(CapsuleError::BackendUnavailable(_))));

        let stuck = h.store.get_capsule(&capsule.uuid).await.unwrap().unwrap();
        assert_eq!(stuck.task_state, Some(TaskState::Deleting));
        assert!(h.store.get_container(&workload_b).await.unwrap().is_some());
        assert!(
            h.store
                .get_container(&capsule.containers_uuids[0])
                .await
                .unwrap()
                .is_none()
        );

        h.compute.fail_delete.lock().unwrap().clear();
        // Status is still Creating, which a plain delete would refuse.
        h.orchestrator.delete(&capsule.uuid, false).await.unwrap();

        assert!(h.store.get_capsule(&capsule.uuid).await.unwrap().is_none());
        assert_eq!(h.compute.deleted(), capsule.containers_uuids);
    }

    #[tokio::test]
    async fn test_get_survives_backend_outage() {
        let h = harness(
            RecordingCompute::new(&["nginx"], None),
            OrchestratorConfig::default(),
        );
        let capsule = h.orchestrator.create(&ctx(), template(&["nginx"])).await.unwrap();

        let fetched = h.orchestrator.get(&capsule.uuid).await.unwrap();
        assert_eq!(fetched.status, ContainerStatus::Unknown);

        let page = h.orchestrator.list(ListRequest::default()).await.unwrap();
        assert_eq!(page.capsules.len(), 1);
        assert_eq!(page.capsules[0].status, ContainerStatus::Unknown);
    }

    #[tokio::test]
    async fn test_list_pages_with_marker() {
        let h = default_harness();
        for _ in 0..3 {
            h.orchestrator.create(&ctx(), template(&["nginx"])).await.unwrap();
        }

        let first = h
            .orchestrator
            .list(ListRequest {
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(first.capsules.len(), 2);
        let marker = first.next_marker.clone().unwrap();
        assert_eq!(marker, first.capsules[1].uuid);

        let second = h
            .orchestrator
            .list(ListRequest {
                limit: Some(2),
                marker: Some(marker),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second.capsules.len(), 1);
        assert!(second.next_marker.is_none());
    }

    #[tokio::test]
    async fn test_list_validates_parameters() {
        let h = harness(
            RecordingCompute::new(&["nginx"], Some(ContainerStatus::Running)),
            OrchestratorConfig {
                max_limit: 5,
                ..Default::default()
            },
        );

        let zero = h
            .orchestrator
            .list(ListRequest {
                limit: Some(0),
                ..Default::default()
            })
            .await;
        assert!(matches!(zero, Err(CapsuleError::InvalidInput(_))));

        let bad_key = h
            .orchestrator
            .list(ListRequest {
                sort_key: Some("image".to_string()),
                ..Default::default()
            })
            .await;
        assert!(matches!(bad_key, Err(CapsuleError::InvalidInput(_))));

        let bad_marker = h
            .orchestrator
            .list(ListRequest {
                marker: Some("nope".to_string()),
                ..Default::default()
            })
            .await;
        assert!(matches!(bad_marker, Err(CapsuleError::InvalidInput(_))));

        let clamped = h
            .orchestrator
            .list(ListRequest {
                limit: Some(50),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(clamped.limit, 5);
    }

    #[tokio::test]
    async fn test_list_filters_by_project() {
        let h = default_harness();
        h.orchestrator.create(&ctx(), template(&["nginx"])).await.unwrap();
        h.orchestrator
            .create(&RequestContext::new("p2", "u2"), template(&["busybox"]))
            .await
            .unwrap();

        let page = h
            .orchestrator
            .list(ListRequest {
                project_id: Some("p2".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.capsules.len(), 1);
        assert_eq!(page.capsules[0].project_id, "p2");
    }
}
