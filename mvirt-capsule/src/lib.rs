pub mod audit;
pub mod compute;
pub mod error;
pub mod locks;
pub mod model;
pub mod names;
pub mod orchestrator;
pub mod rest;
pub mod status;
pub mod store;
pub mod translator;

pub use audit::{CapsuleAuditLogger, create_audit_logger};
pub use compute::{ComputeBackend, ComputeError, LocalCompute, LocalComputeConfig};
pub use error::{CapsuleError, Result};
pub use model::{Capsule, CapsuleTemplate, Container, ContainerStatus, RequestContext, TaskState};
pub use names::{NameGenerator, RandomNameGenerator};
pub use orchestrator::{CapsulePage, ListRequest, Orchestrator, OrchestratorConfig};
pub use status::StatusAggregator;
pub use store::{DataStore, Event, MemoryStore, StoreError};
