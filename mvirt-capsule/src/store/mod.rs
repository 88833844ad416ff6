//! Persistence layer for capsule and container records.

mod error;
mod event;
mod memory;
mod traits;

pub use error::{Result, StoreError};
pub use event::Event;
pub use memory::MemoryStore;
pub use traits::{
    CapsuleFilters, CapsuleStore, ContainerStore, DataStore, ListParams, SortDir, SortKey,
};
