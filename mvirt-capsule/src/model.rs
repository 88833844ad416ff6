//! Capsule and container records, plus the pod-style template accepted on create.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use utoipa::ToSchema;

/// Version tag stamped on every capsule.
pub const CAPSULE_VERSION: &str = "alpha";

/// Kind tag stamped on every capsule.
pub const CAPSULE_KIND: &str = "capsule";

// =============================================================================
// Status
// =============================================================================

/// Observed state of a container. Capsules reuse it to mirror their sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum ContainerStatus {
    Creating,
    Created,
    Running,
    Stopped,
    Paused,
    Restarting,
    Rebuilding,
    Error,
    Deleted,
    Dead,
    Unknown,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerStatus::Creating => "Creating",
            ContainerStatus::Created => "Created",
            ContainerStatus::Running => "Running",
            ContainerStatus::Stopped => "Stopped",
            ContainerStatus::Paused => "Paused",
            ContainerStatus::Restarting => "Restarting",
            ContainerStatus::Rebuilding => "Rebuilding",
            ContainerStatus::Error => "Error",
            ContainerStatus::Deleted => "Deleted",
            ContainerStatus::Dead => "Dead",
            ContainerStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// In-flight multi-step operation on a capsule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Deleting,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Deleting => f.write_str("deleting"),
        }
    }
}

/// Restart policy in the shape the compute layer expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RestartPolicy {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "MaximumRetryCount")]
    pub maximum_retry_count: String,
}

impl RestartPolicy {
    /// Policy with the retry cap left at zero.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            maximum_retry_count: "0".to_string(),
        }
    }
}

/// Caller identity attached to records it creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub project_id: String,
    pub user_id: String,
}

impl RequestContext {
    pub fn new(project_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            user_id: user_id.into(),
        }
    }
}

// =============================================================================
// Stored records
// =============================================================================

/// A single container, either a capsule's sandbox or one of its workloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// Store-assigned sequence number.
    pub id: u64,
    pub uuid: String,
    pub name: Option<String>,
    /// Owning capsule.
    pub capsule_uuid: Option<String>,
    pub project_id: String,
    pub user_id: String,
    pub image: Option<String>,
    pub command: Option<String>,
    pub cpu: Option<f64>,
    pub memory: Option<String>,
    pub workdir: Option<String>,
    pub image_driver: Option<String>,
    pub image_pull_policy: Option<String>,
    pub environment: HashMap<String, String>,
    pub restart_policy: Option<RestartPolicy>,
    pub status: ContainerStatus,
    pub created_at: String,
    pub updated_at: String,
    /// Store revision, checked on save.
    pub version: u64,
}

impl Container {
    fn blank(ctx: &RequestContext, capsule_uuid: &str) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: 0,
            uuid: uuid::Uuid::new_v4().to_string(),
            name: None,
            capsule_uuid: Some(capsule_uuid.to_string()),
            project_id: ctx.project_id.clone(),
            user_id: ctx.user_id.clone(),
            image: None,
            command: None,
            cpu: None,
            memory: None,
            workdir: None,
            image_driver: None,
            image_pull_policy: None,
            environment: HashMap::new(),
            restart_policy: None,
            status: ContainerStatus::Creating,
            created_at: now.clone(),
            updated_at: now,
            version: 0,
        }
    }

    /// Infrastructure container holding the capsule's shared namespaces. No image, no command.
    pub fn sandbox(ctx: &RequestContext, capsule_uuid: &str) -> Self {
        Self::blank(ctx, capsule_uuid)
    }

    /// Workload container built from a translated template.
    pub fn from_request(ctx: &RequestContext, capsule_uuid: &str, req: ContainerRequest) -> Self {
        Self {
            name: Some(req.name),
            image: Some(req.image),
            command: req.command,
            cpu: req.cpu,
            memory: req.memory,
            workdir: req.workdir,
            image_driver: req.image_driver,
            image_pull_policy: req.image_pull_policy,
            environment: req.environment,
            restart_policy: req.restart_policy,
            ..Self::blank(ctx, capsule_uuid)
        }
    }

    pub fn is_sandbox(&self) -> bool {
        self.image.is_none()
    }
}

/// A multi-container unit: one sandbox plus its workload containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capsule {
    /// Store-assigned sequence number, the default sort key.
    pub id: u64,
    pub uuid: String,
    pub name: Option<String>,
    pub meta_name: Option<String>,
    pub meta_labels: HashMap<String, String>,
    pub capsule_version: String,
    pub kind: String,
    pub project_id: String,
    pub user_id: String,
    /// Capsule-level restart policy name applied to every workload.
    pub restart_policy: Option<String>,
    /// Member containers. Index 0 is always the sandbox.
    pub containers_uuids: Vec<String>,
    /// Resolved members. Never persisted with the capsule record.
    #[serde(skip)]
    pub containers: Vec<Container>,
    pub volumes: Vec<String>,
    pub status: ContainerStatus,
    pub task_state: Option<TaskState>,
    pub created_at: String,
    pub updated_at: String,
    pub version: u64,
}

impl Capsule {
    pub fn new(
        uuid: String,
        ctx: &RequestContext,
        name: Option<String>,
        restart_policy: Option<String>,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: 0,
            uuid,
            name,
            meta_name: None,
            meta_labels: HashMap::new(),
            capsule_version: CAPSULE_VERSION.to_string(),
            kind: CAPSULE_KIND.to_string(),
            project_id: ctx.project_id.clone(),
            user_id: ctx.user_id.clone(),
            restart_policy,
            containers_uuids: Vec::new(),
            containers: Vec::new(),
            volumes: Vec::new(),
            status: ContainerStatus::Creating,
            task_state: None,
            created_at: now.clone(),
            updated_at: now,
            version: 0,
        }
    }

    /// UUID of the sandbox container, if the member list has been recorded.
    pub fn sandbox_uuid(&self) -> Option<&str> {
        self.containers_uuids.first().map(String::as_str)
    }

    /// Append a member, keeping `containers` and `containers_uuids` in step.
    pub fn attach(&mut self, container: Container) {
        self.containers_uuids.push(container.uuid.clone());
        self.containers.push(container);
    }

    /// Whether `name` matches either the capsule name or its metadata name.
    pub fn answers_to(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name) || self.meta_name.as_deref() == Some(name)
    }
}

// =============================================================================
// Create template
// =============================================================================

/// Body of a capsule create request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CapsuleTemplate {
    /// Optional capsule name
    #[serde(default)]
    pub name: Option<String>,
    pub spec: CapsuleSpec,
}

/// Pod-style specification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CapsuleSpec {
    #[serde(default)]
    pub containers: Vec<ContainerTemplate>,
    /// One of always, unless-stopped, on-failure, no
    #[serde(default)]
    pub restart_policy: Option<String>,
    #[serde(default)]
    pub metadata: Option<CapsuleMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CapsuleMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// One container entry of the pod-style specification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerTemplate {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub work_dir: Option<String>,
    #[serde(default)]
    pub image_driver: Option<String>,
    #[serde(default)]
    pub image_pull_policy: Option<String>,
    #[serde(default)]
    pub resources: Option<Resources>,
    /// Accepted but ignored, port remapping is not supported.
    #[serde(default)]
    pub ports: Vec<PortSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Resources {
    #[serde(default)]
    pub allocation: Option<Allocation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Allocation {
    /// CPU share
    #[serde(default)]
    pub cpu: Option<f64>,
    /// Memory in MB
    #[serde(default)]
    pub memory: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub container_port: Option<u16>,
    #[serde(default)]
    pub host_port: Option<u16>,
    #[serde(default)]
    pub protocol: Option<String>,
}

/// Normalized container creation request produced by the translator.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRequest {
    pub name: String,
    pub image: String,
    pub command: Option<String>,
    pub cpu: Option<f64>,
    pub memory: Option<String>,
    pub workdir: Option<String>,
    pub image_driver: Option<String>,
    pub image_pull_policy: Option<String>,
    pub environment: HashMap<String, String>,
    pub restart_policy: Option<RestartPolicy>,
}
