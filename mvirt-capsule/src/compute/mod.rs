//! Compute backend interface.
//!
//! The backend owns the OS-level containers. The orchestrator only asks it
//! to check images, report live state, delete members and realize capsules.

mod local;

pub use local::{LocalCompute, LocalComputeConfig};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::model::{Capsule, Container};

/// Errors reported by a compute backend.
#[derive(Debug, Clone, Error)]
pub enum ComputeError {
    /// Backend could not be reached.
    #[error("compute backend unavailable: {0}")]
    Unavailable(String),

    /// Backend has no container with this UUID.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Container is in a state that forbids the request.
    #[error("invalid container state: {0}")]
    InvalidState(String),

    /// Driver-level failure.
    #[error("driver error: {0}")]
    Driver(String),
}

/// Image known to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Image {
    pub repo: String,
    pub tag: String,
    pub driver: String,
}

/// Split `repo[:tag]` into its parts, defaulting the tag to `latest`.
///
/// A colon inside the registry host (`host:5000/app`) is not a tag separator.
pub fn split_image_ref(reference: &str) -> (&str, &str) {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') && !repo.is_empty() => (repo, tag),
        _ => (reference, "latest"),
    }
}

#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Search for an image. `exact` requires repo and tag to match exactly.
    async fn image_search(
        &self,
        image: &str,
        image_driver: Option<&str>,
        exact: bool,
    ) -> Result<Vec<Image>, ComputeError>;

    /// Return the container with its live status filled in.
    async fn container_show(&self, container: &Container) -> Result<Container, ComputeError>;

    /// Delete a container. `force` allows deleting a running container.
    async fn container_delete(&self, container: &Container, force: bool)
    -> Result<(), ComputeError>;

    /// Request that the capsule's containers be started. Returns once the
    /// request is accepted; starting happens in the background.
    async fn capsule_create(&self, capsule: &Capsule) -> Result<(), ComputeError>;
}
