//! Capsule spec translation.
//!
//! Turns the pod-style container templates of a create request into
//! normalized container creation requests:
//! - `imageDriver`, `imagePullPolicy`, `workDir` and `env` map onto their
//!   record fields; empty or sentinel strings become absent
//! - `command` and `args` are merged into one command string
//! - ports are dropped
//! - `resources.allocation` becomes `cpu` and `memory` (`"<n>M"`)
//! - the capsule restart policy is stamped on every container and validated

use crate::compute::ComputeBackend;
use crate::error::{CapsuleError, Result};
use crate::model::{CapsuleSpec, ContainerRequest, ContainerTemplate, RestartPolicy};
use crate::names::NameGenerator;

/// Restart policy names understood by the compute layer.
pub const RESTART_POLICIES: &[&str] = &["always", "unless-stopped", "on-failure", "no"];

const NONE_SENTINELS: &[&str] = &["None", "none", "null"];

/// Map empty and sentinel strings to `None`.
pub fn string_or_none(value: Option<&str>) -> Option<String> {
    match value {
        Some(v) if !v.is_empty() && !NONE_SENTINELS.contains(&v) => Some(v.to_string()),
        _ => None,
    }
}

fn join_words(words: &[String]) -> Option<String> {
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

/// Merge `command` and `args` into a single command string.
pub fn merge_command(command: &[String], args: &[String]) -> Option<String> {
    match (join_words(command), join_words(args)) {
        (Some(command), Some(args)) => Some(format!("{} {}", command, args)),
        (Some(command), None) => Some(command),
        (None, Some(args)) => Some(args),
        (None, None) => None,
    }
}

/// Validate a restart policy, normalizing the retry count where the policy implies it.
pub fn check_restart_policy(policy: &mut RestartPolicy) -> Result<()> {
    if !RESTART_POLICIES.contains(&policy.name.as_str()) {
        return Err(CapsuleError::InvalidConfiguration(format!(
            "unknown restart policy '{}', expected one of {}",
            policy.name,
            RESTART_POLICIES.join(", ")
        )));
    }

    if policy.name == "no" {
        policy.maximum_retry_count = "0".to_string();
        return Ok(());
    }

    let count: i64 = policy.maximum_retry_count.trim().parse().map_err(|_| {
        CapsuleError::InvalidConfiguration(format!(
            "maximum retry count '{}' is not an integer",
            policy.maximum_retry_count
        ))
    })?;

    if matches!(policy.name.as_str(), "always" | "unless-stopped") && count != 0 {
        return Err(CapsuleError::InvalidConfiguration(format!(
            "maximum retry count not valid with restart policy of {}",
            policy.name
        )));
    }

    Ok(())
}

/// Name for a workload container: `capsule-<capsule_uuid>-<suffix>`.
pub fn container_name(capsule_uuid: &str, names: &dyn NameGenerator) -> String {
    format!("capsule-{}-{}", capsule_uuid, names.generate())
}

/// Translate one container template.
pub fn translate_container(
    capsule_uuid: &str,
    template: &ContainerTemplate,
    restart_policy: Option<&str>,
    names: &dyn NameGenerator,
) -> Result<ContainerRequest> {
    let image = string_or_none(template.image.as_deref()).ok_or_else(|| {
        CapsuleError::InvalidInput("every container template needs an image".to_string())
    })?;

    let mut request = ContainerRequest {
        name: container_name(capsule_uuid, names),
        image,
        command: merge_command(&template.command, &template.args),
        cpu: None,
        memory: None,
        workdir: string_or_none(template.work_dir.as_deref()),
        image_driver: string_or_none(template.image_driver.as_deref()),
        image_pull_policy: string_or_none(template.image_pull_policy.as_deref()),
        environment: template.env.clone(),
        restart_policy: None,
    };

    if let Some(allocation) = template
        .resources
        .as_ref()
        .and_then(|r| r.allocation.as_ref())
    {
        request.cpu = allocation.cpu.filter(|cpu| *cpu != 0.0);
        request.memory = allocation
            .memory
            .filter(|memory| *memory != 0.0)
            .map(|memory| format!("{}M", memory));
    }

    if let Some(name) = restart_policy {
        let mut policy = RestartPolicy::named(name);
        check_restart_policy(&mut policy)?;
        request.restart_policy = Some(policy);
    }

    Ok(request)
}

/// Translate every container template of a spec, preserving order.
pub fn translate(
    capsule_uuid: &str,
    spec: &CapsuleSpec,
    restart_policy: Option<&str>,
    names: &dyn NameGenerator,
) -> Result<Vec<ContainerRequest>> {
    spec.containers
        .iter()
        .map(|template| translate_container(capsule_uuid, template, restart_policy, names))
        .collect()
}

/// Fail with `ImageNotFound` unless the backend knows the request's image.
pub async fn ensure_image(compute: &dyn ComputeBackend, request: &ContainerRequest) -> Result<()> {
    let images = compute
        .image_search(&request.image, request.image_driver.as_deref(), true)
        .await?;
    if images.is_empty() {
        return Err(CapsuleError::ImageNotFound(request.image.clone()));
    }
    Ok(())
}
