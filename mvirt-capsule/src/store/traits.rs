//! DataStore trait definitions.
//!
//! These traits abstract away the persistence backend so the orchestrator
//! works with capsule and container records only.

use async_trait::async_trait;
use std::str::FromStr;
use tokio::sync::broadcast;

use crate::model::{Capsule, Container};

use super::error::Result;
use super::event::Event;

// =============================================================================
// Listing
// =============================================================================

/// Column a capsule listing is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Id,
    Uuid,
    Name,
    Status,
    CreatedAt,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Id => "id",
            SortKey::Uuid => "uuid",
            SortKey::Name => "name",
            SortKey::Status => "status",
            SortKey::CreatedAt => "created_at",
        }
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "id" => Ok(SortKey::Id),
            "uuid" => Ok(SortKey::Uuid),
            "name" => Ok(SortKey::Name),
            "status" => Ok(SortKey::Status),
            "created_at" => Ok(SortKey::CreatedAt),
            other => Err(format!("invalid sort key: {}", other)),
        }
    }
}

/// Listing direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

impl SortDir {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDir::Asc => "asc",
            SortDir::Desc => "desc",
        }
    }
}

impl FromStr for SortDir {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortDir::Asc),
            "desc" => Ok(SortDir::Desc),
            other => Err(format!(
                "invalid sort direction: {}. Acceptable values are 'asc' or 'desc'",
                other
            )),
        }
    }
}

/// Filters applied before paging.
#[derive(Debug, Clone, Default)]
pub struct CapsuleFilters {
    pub project_id: Option<String>,
}

/// One page request against the capsule table.
#[derive(Debug, Clone)]
pub struct ListParams {
    pub limit: usize,
    /// UUID of the last capsule of the previous page.
    pub marker: Option<String>,
    pub sort_key: SortKey,
    pub sort_dir: SortDir,
    pub filters: CapsuleFilters,
}

// =============================================================================
// Domain Store Traits
// =============================================================================

/// Store trait for capsule records.
///
/// Saved capsules never carry their resolved `containers`; saves return the
/// caller's value with the new revision applied.
#[async_trait]
pub trait CapsuleStore: Send + Sync {
    /// Persist a new capsule, assigning its sequence id and first revision.
    async fn create_capsule(&self, capsule: Capsule) -> Result<Capsule>;

    /// Get a capsule by UUID.
    async fn get_capsule(&self, uuid: &str) -> Result<Option<Capsule>>;

    /// Get a capsule by name or metadata name.
    async fn get_capsule_by_name(&self, name: &str) -> Result<Option<Capsule>>;

    /// List one page of capsules.
    async fn list_capsules(&self, params: &ListParams) -> Result<Vec<Capsule>>;

    /// Save a capsule. Fails with `VersionMismatch` if the record changed since it was read.
    async fn save_capsule(&self, capsule: &Capsule) -> Result<Capsule>;

    /// Destroy a capsule record.
    async fn destroy_capsule(&self, uuid: &str) -> Result<()>;
}

/// Store trait for container records.
#[async_trait]
pub trait ContainerStore: Send + Sync {
    /// Persist a new container.
    async fn create_container(&self, container: Container) -> Result<Container>;

    /// Get a container by UUID.
    async fn get_container(&self, uuid: &str) -> Result<Option<Container>>;

    /// List containers that reference the given capsule, in creation order.
    async fn list_containers_by_capsule(&self, capsule_uuid: &str) -> Result<Vec<Container>>;

    /// Save a container. Fails with `VersionMismatch` if the record changed since it was read.
    async fn save_container(&self, container: &Container) -> Result<Container>;

    /// Destroy a container record.
    async fn destroy_container(&self, uuid: &str) -> Result<()>;
}

// =============================================================================
// Composite DataStore Trait
// =============================================================================

/// Composite data store trait combining capsule and container stores.
pub trait DataStore: CapsuleStore + ContainerStore + Send + Sync {
    /// Subscribe to record change events.
    fn subscribe(&self) -> broadcast::Receiver<Event>;
}
