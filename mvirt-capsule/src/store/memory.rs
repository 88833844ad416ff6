//! In-memory DataStore with revision-checked saves.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};

use crate::model::{Capsule, Container};

use super::error::{Result, StoreError};
use super::event::Event;
use super::traits::{CapsuleStore, ContainerStore, DataStore, ListParams, SortDir, SortKey};

#[derive(Default)]
struct Tables {
    next_id: u64,
    capsules: HashMap<String, Capsule>,
    containers: HashMap<String, Container>,
}

impl Tables {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// MemoryStore keeps every record in process memory.
///
/// Each record carries a revision; a save only succeeds when the caller's
/// revision matches the stored one.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    events: broadcast::Sender<Event>,
}

impl MemoryStore {
    /// Create an empty store with an event channel of the given capacity.
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            tables: RwLock::new(Tables::default()),
            events,
        }
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(256)
    }
}

fn compare_capsules(a: &Capsule, b: &Capsule, key: SortKey) -> Ordering {
    let primary = match key {
        SortKey::Id => a.id.cmp(&b.id),
        SortKey::Uuid => a.uuid.cmp(&b.uuid),
        SortKey::Name => {
            let name = |c: &Capsule| c.name.clone().or_else(|| c.meta_name.clone());
            name(a).cmp(&name(b))
        }
        SortKey::Status => a.status.to_string().cmp(&b.status.to_string()),
        SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
    };
    primary.then(a.id.cmp(&b.id))
}

#[async_trait]
impl CapsuleStore for MemoryStore {
    async fn create_capsule(&self, mut capsule: Capsule) -> Result<Capsule> {
        let mut tables = self.tables.write().await;
        if tables.capsules.contains_key(&capsule.uuid) {
            return Err(StoreError::Conflict(format!(
                "capsule {} already exists",
                capsule.uuid
            )));
        }

        capsule.id = tables.allocate_id();
        capsule.version = 1;
        let mut stored = capsule.clone();
        stored.containers.clear();
        tables.capsules.insert(stored.uuid.clone(), stored.clone());
        drop(tables);

        self.emit(Event::CapsuleCreated(stored));
        Ok(capsule)
    }

    async fn get_capsule(&self, uuid: &str) -> Result<Option<Capsule>> {
        let tables = self.tables.read().await;
        Ok(tables.capsules.get(uuid).cloned())
    }

    async fn get_capsule_by_name(&self, name: &str) -> Result<Option<Capsule>> {
        let tables = self.tables.read().await;
        let mut matches = tables.capsules.values().filter(|c| c.answers_to(name));
        let first = matches.next().cloned();
        if matches.next().is_some() {
            return Err(StoreError::Conflict(format!(
                "multiple capsules named '{}', use the UUID",
                name
            )));
        }
        Ok(first)
    }

    async fn list_capsules(&self, params: &ListParams) -> Result<Vec<Capsule>> {
        let tables = self.tables.read().await;

        let mut capsules: Vec<&Capsule> = tables
            .capsules
            .values()
            .filter(|c| {
                params
                    .filters
                    .project_id
                    .as_ref()
                    .is_none_or(|pid| &c.project_id == pid)
            })
            .collect();

        capsules.sort_by(|a, b| {
            let ord = compare_capsules(a, b, params.sort_key);
            match params.sort_dir {
                SortDir::Asc => ord,
                SortDir::Desc => ord.reverse(),
            }
        });

        let start = match &params.marker {
            Some(marker) => {
                let pos = capsules
                    .iter()
                    .position(|c| &c.uuid == marker)
                    .ok_or_else(|| StoreError::NotFound(format!("marker capsule {}", marker)))?;
                pos + 1
            }
            None => 0,
        };

        Ok(capsules
            .into_iter()
            .skip(start)
            .take(params.limit)
            .cloned()
            .collect())
    }

    async fn save_capsule(&self, capsule: &Capsule) -> Result<Capsule> {
        let mut tables = self.tables.write().await;
        let Some(current) = tables.capsules.get(&capsule.uuid) else {
            return Err(StoreError::NotFound(format!("capsule {}", capsule.uuid)));
        };
        if current.version != capsule.version {
            return Err(StoreError::VersionMismatch {
                expected: current.version,
                actual: capsule.version,
            });
        }

        let old = current.clone();
        let mut saved = capsule.clone();
        saved.version += 1;
        saved.updated_at = Utc::now().to_rfc3339();
        let mut stored = saved.clone();
        stored.containers.clear();
        tables.capsules.insert(stored.uuid.clone(), stored.clone());
        drop(tables);

        self.emit(Event::CapsuleUpdated {
            id: stored.uuid.clone(),
            old,
            new: stored,
        });
        Ok(saved)
    }

    async fn destroy_capsule(&self, uuid: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.capsules.remove(uuid).is_none() {
            return Err(StoreError::NotFound(format!("capsule {}", uuid)));
        }
        drop(tables);

        self.emit(Event::CapsuleDeleted {
            id: uuid.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl ContainerStore for MemoryStore {
    async fn create_container(&self, mut container: Container) -> Result<Container> {
        let mut tables = self.tables.write().await;
        if tables.containers.contains_key(&container.uuid) {
            return Err(StoreError::Conflict(format!(
                "container {} already exists",
                container.uuid
            )));
        }

        container.id = tables.allocate_id();
        container.version = 1;
        tables
            .containers
            .insert(container.uuid.clone(), container.clone());
        drop(tables);

        self.emit(Event::ContainerCreated(container.clone()));
        Ok(container)
    }

    async fn get_container(&self, uuid: &str) -> Result<Option<Container>> {
        let tables = self.tables.read().await;
        Ok(tables.containers.get(uuid).cloned())
    }

    async fn list_containers_by_capsule(&self, capsule_uuid: &str) -> Result<Vec<Container>> {
        let tables = self.tables.read().await;
        let mut containers: Vec<Container> = tables
            .containers
            .values()
            .filter(|c| c.capsule_uuid.as_deref() == Some(capsule_uuid))
            .cloned()
            .collect();
        containers.sort_by_key(|c| c.id);
        Ok(containers)
    }

    async fn save_container(&self, container: &Container) -> Result<Container> {
        let mut tables = self.tables.write().await;
        let Some(current) = tables.containers.get(&container.uuid) else {
            return Err(StoreError::NotFound(format!("container {}", container.uuid)));
        };
        if current.version != container.version {
            return Err(StoreError::VersionMismatch {
                expected: current.version,
                actual: container.version,
            });
        }

        let old = current.clone();
        let mut saved = container.clone();
        saved.version += 1;
        saved.updated_at = Utc::now().to_rfc3339();
        tables.containers.insert(saved.uuid.clone(), saved.clone());
        drop(tables);

        self.emit(Event::ContainerUpdated {
            id: saved.uuid.clone(),
            old,
            new: saved.clone(),
        });
        Ok(saved)
    }

    async fn destroy_container(&self, uuid: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let Some(removed) = tables.containers.remove(uuid) else {
            return Err(StoreError::NotFound(format!("container {}", uuid)));
        };
        drop(tables);

        self.emit(Event::ContainerDeleted {
            id: uuid.to_string(),
            capsule_uuid: removed.capsule_uuid,
        });
        Ok(())
    }
}

impl DataStore for MemoryStore {
    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}
