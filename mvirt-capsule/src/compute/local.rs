//! Local compute backend.
//!
//! Keeps container state in memory and moves realized capsules from
//! Created to Running after a configurable delay. Used by the standalone
//! binary and in tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{ComputeBackend, ComputeError, Image, split_image_ref};
use crate::model::{Capsule, Container, ContainerStatus};

const LOCAL_DRIVER: &str = "docker";

/// Configuration for [`LocalCompute`].
#[derive(Debug, Clone)]
pub struct LocalComputeConfig {
    /// Image references available locally.
    pub images: Vec<String>,
    /// Time between a realize request and the containers running.
    pub start_delay: Duration,
}

impl Default for LocalComputeConfig {
    fn default() -> Self {
        Self {
            images: vec![
                "busybox".to_string(),
                "nginx".to_string(),
                "alpine".to_string(),
                "cirros".to_string(),
            ],
            start_delay: Duration::from_millis(500),
        }
    }
}

/// In-process compute backend.
pub struct LocalCompute {
    images: Vec<Image>,
    containers: Arc<RwLock<HashMap<String, ContainerStatus>>>,
    start_delay: Duration,
}

impl LocalCompute {
    pub fn new(config: LocalComputeConfig) -> Self {
        let images = config
            .images
            .iter()
            .map(|reference| {
                let (repo, tag) = split_image_ref(reference);
                Image {
                    repo: repo.to_string(),
                    tag: tag.to_string(),
                    driver: LOCAL_DRIVER.to_string(),
                }
            })
            .collect();

        Self {
            images,
            containers: Arc::new(RwLock::new(HashMap::new())),
            start_delay: config.start_delay,
        }
    }
}

#[async_trait]
impl ComputeBackend for LocalCompute {
    async fn image_search(
        &self,
        image: &str,
        image_driver: Option<&str>,
        exact: bool,
    ) -> Result<Vec<Image>, ComputeError> {
        let (repo, tag) = split_image_ref(image);
        Ok(self
            .images
            .iter()
            .filter(|i| image_driver.is_none_or(|d| d == i.driver))
            .filter(|i| {
                if exact {
                    i.repo == repo && i.tag == tag
                } else {
                    i.repo.contains(repo)
                }
            })
            .cloned()
            .collect())
    }

    async fn container_show(&self, container: &Container) -> Result<Container, ComputeError> {
        let containers = self.containers.read().await;
        let status = containers
            .get(&container.uuid)
            .copied()
            .ok_or_else(|| ComputeError::ContainerNotFound(container.uuid.clone()))?;

        let mut live = container.clone();
        live.status = status;
        Ok(live)
    }

    async fn container_delete(
        &self,
        container: &Container,
        force: bool,
    ) -> Result<(), ComputeError> {
        let mut containers = self.containers.write().await;
        let status = containers
            .get(&container.uuid)
            .copied()
            .ok_or_else(|| ComputeError::ContainerNotFound(container.uuid.clone()))?;

        if !force && matches!(status, ContainerStatus::Running | ContainerStatus::Restarting) {
            return Err(ComputeError::InvalidState(format!(
                "container {} is {}, stop it first or use force",
                container.uuid, status
            )));
        }

        containers.remove(&container.uuid);
        debug!(container = %container.uuid, force, "Deleted container");
        Ok(())
    }

    async fn capsule_create(&self, capsule: &Capsule) -> Result<(), ComputeError> {
        if capsule.containers_uuids.is_empty() {
            return Err(ComputeError::InvalidState(format!(
                "capsule {} has no containers",
                capsule.uuid
            )));
        }

        let members = capsule.containers_uuids.clone();
        {
            let mut containers = self.containers.write().await;
            for uuid in &members {
                containers.insert(uuid.clone(), ContainerStatus::Created);
            }
        }

        info!(
            capsule = %capsule.uuid,
            containers = members.len(),
            "Realizing capsule"
        );

        let containers = Arc::clone(&self.containers);
        let delay = self.start_delay;
        let capsule_uuid = capsule.uuid.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut containers = containers.write().await;
            // Sandbox first, then workloads in order.
            for uuid in &members {
                if let Some(status) = containers.get_mut(uuid)
                    && *status == ContainerStatus::Created
                {
                    *status = ContainerStatus::Running;
                }
            }
            debug!(capsule = %capsule_uuid, "Capsule containers running");
        });

        Ok(())
    }
}
