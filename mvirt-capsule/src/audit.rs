use std::sync::Arc;

/// Severity of an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLevel {
    Info,
    Warn,
    Audit,
}

/// Capsule audit logger.
///
/// Records lifecycle events on the `audit` tracing target, tagged with the
/// ids of the objects they concern.
pub struct CapsuleAuditLogger {
    enabled: bool,
}

impl CapsuleAuditLogger {
    pub fn new() -> Self {
        Self { enabled: true }
    }

    pub fn new_noop() -> Self {
        Self { enabled: false }
    }

    fn log(&self, level: AuditLevel, message: String, object_ids: Vec<String>) {
        if !self.enabled {
            return;
        }
        let objects = object_ids.join(",");
        match level {
            AuditLevel::Info => tracing::info!(target: "audit", objects = %objects, "{}", message),
            AuditLevel::Warn => tracing::warn!(target: "audit", objects = %objects, "{}", message),
            AuditLevel::Audit => {
                tracing::info!(target: "audit", audit = true, objects = %objects, "{}", message)
            }
        }
    }

    pub fn capsule_created(&self, capsule_uuid: &str, name: Option<&str>, containers: usize) {
        self.log(
            AuditLevel::Audit,
            format!(
                "Capsule created: {} ({}) with {} containers",
                name.unwrap_or("-"),
                capsule_uuid,
                containers
            ),
            vec![capsule_uuid.to_string()],
        );
    }

    pub fn capsule_create_failed(&self, capsule_uuid: &str, reason: &str) {
        self.log(
            AuditLevel::Warn,
            format!("Capsule create failed: {}: {}", capsule_uuid, reason),
            vec![capsule_uuid.to_string()],
        );
    }

    pub fn capsule_deleted(&self, capsule_uuid: &str, force: bool) {
        self.log(
            AuditLevel::Audit,
            format!("Capsule deleted: {} (force: {})", capsule_uuid, force),
            vec![capsule_uuid.to_string()],
        );
    }

    pub fn capsule_delete_failed(&self, capsule_uuid: &str, container_uuid: &str, reason: &str) {
        self.log(
            AuditLevel::Warn,
            format!(
                "Capsule delete failed: {} at container {}: {}",
                capsule_uuid, container_uuid, reason
            ),
            vec![capsule_uuid.to_string(), container_uuid.to_string()],
        );
    }

    pub fn capsule_purged(&self, capsule_uuid: &str, containers: usize) {
        self.log(
            AuditLevel::Info,
            format!(
                "Incomplete capsule purged: {} ({} containers)",
                capsule_uuid, containers
            ),
            vec![capsule_uuid.to_string()],
        );
    }
}

impl Default for CapsuleAuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

pub fn create_audit_logger() -> Arc<CapsuleAuditLogger> {
    Arc::new(CapsuleAuditLogger::new())
}
