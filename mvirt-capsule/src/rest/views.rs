//! JSON shapes returned by the capsule endpoints.

use serde::Serialize;
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::model::{Capsule, Container, ContainerStatus, RestartPolicy, TaskState};

/// Container as shown inside a capsule
#[derive(Serialize, ToSchema)]
pub struct ContainerView {
    pub uuid: String,
    pub name: Option<String>,
    /// Absent for the sandbox container
    pub image: Option<String>,
    pub command: Option<String>,
    pub cpu: Option<f64>,
    /// Memory with unit suffix (e.g. "512M")
    pub memory: Option<String>,
    pub workdir: Option<String>,
    pub image_driver: Option<String>,
    pub image_pull_policy: Option<String>,
    pub environment: HashMap<String, String>,
    pub restart_policy: Option<RestartPolicy>,
    pub status: ContainerStatus,
}

impl From<Container> for ContainerView {
    fn from(c: Container) -> Self {
        Self {
            uuid: c.uuid,
            name: c.name,
            image: c.image,
            command: c.command,
            cpu: c.cpu,
            memory: c.memory,
            workdir: c.workdir,
            image_driver: c.image_driver,
            image_pull_policy: c.image_pull_policy,
            environment: c.environment,
            restart_policy: c.restart_policy,
            status: c.status,
        }
    }
}

/// Capsule resource
#[derive(Serialize, ToSchema)]
pub struct CapsuleView {
    pub uuid: String,
    pub name: Option<String>,
    pub meta_name: Option<String>,
    pub meta_labels: HashMap<String, String>,
    pub capsule_version: String,
    pub kind: String,
    pub project_id: String,
    pub user_id: String,
    pub restart_policy: Option<String>,
    /// Mirrors the sandbox container, Unknown when it cannot be observed
    pub status: ContainerStatus,
    /// Set while a multi-step operation is in flight or was interrupted
    pub task_state: Option<TaskState>,
    /// Member UUIDs, sandbox first
    pub containers_uuids: Vec<String>,
    pub containers: Vec<ContainerView>,
    pub volumes: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Capsule> for CapsuleView {
    fn from(c: Capsule) -> Self {
        Self {
            uuid: c.uuid,
            name: c.name,
            meta_name: c.meta_name,
            meta_labels: c.meta_labels,
            capsule_version: c.capsule_version,
            kind: c.kind,
            project_id: c.project_id,
            user_id: c.user_id,
            restart_policy: c.restart_policy,
            status: c.status,
            task_state: c.task_state,
            containers_uuids: c.containers_uuids,
            containers: c.containers.into_iter().map(ContainerView::from).collect(),
            volumes: c.volumes,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// One page of capsules
#[derive(Serialize, ToSchema)]
pub struct CapsuleCollection {
    pub capsules: Vec<CapsuleView>,
    /// Link to the next page, present when this page is full
    pub next: Option<String>,
}
