use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::error::CapsuleError;
use crate::model::{CapsuleTemplate, RequestContext};
use crate::orchestrator::{CapsulePage, ListRequest, Orchestrator};
use crate::store::StoreError;

use super::views::{CapsuleCollection, CapsuleView};

/// Header carrying the calling user.
pub const USER_ID_HEADER: &str = "x-user-id";

const ANONYMOUS_USER: &str = "anonymous";

/// Shared application state
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// API error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    pub error: String,
    pub code: u32,
}

impl ApiError {
    fn bad_request(error: String) -> Self {
        Self { error, code: 400 }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.code {
            404 => StatusCode::NOT_FOUND,
            409 => StatusCode::CONFLICT,
            400 => StatusCode::BAD_REQUEST,
            503 => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

impl From<CapsuleError> for ApiError {
    fn from(e: CapsuleError) -> Self {
        let code = match &e {
            CapsuleError::NotFound(_) => 404,
            CapsuleError::ImageNotFound(_)
            | CapsuleError::InvalidConfiguration(_)
            | CapsuleError::InvalidInput(_) => 400,
            CapsuleError::ConflictingState(_) => 409,
            CapsuleError::BackendUnavailable(_) => 503,
            CapsuleError::Store(StoreError::Conflict(_))
            | CapsuleError::Store(StoreError::VersionMismatch { .. }) => 409,
            CapsuleError::Store(StoreError::NotFound(_)) => 404,
            CapsuleError::Store(StoreError::Internal(_)) => 500,
        };
        ApiError {
            error: e.to_string(),
            code,
        }
    }
}

/// Parse a boolean query flag the way operators type them.
pub fn parse_bool_flag(name: &str, value: &str) -> Result<bool, CapsuleError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "t" | "y" => Ok(true),
        "false" | "0" | "no" | "off" | "f" | "n" => Ok(false),
        _ => Err(CapsuleError::InvalidConfiguration(format!(
            "unrecognized value '{}' for {}, acceptable values are true, false, 1, 0, yes, no, on, off",
            value, name
        ))),
    }
}

fn request_context(project_id: String, headers: &HeaderMap) -> RequestContext {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_USER);
    RequestContext::new(project_id, user_id)
}

// === Version ===

/// Version information
#[derive(Serialize, ToSchema)]
pub struct VersionInfo {
    pub version: String,
}

/// Get API version
#[utoipa::path(
    get,
    path = "/v1/version",
    responses(
        (status = 200, description = "Version information", body = VersionInfo)
    ),
    tag = "system"
)]
pub async fn get_version() -> Json<VersionInfo> {
    Json(VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// === Capsules ===

/// Paging and sorting for capsule listings
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ListCapsulesQuery {
    /// Page size, capped by the server maximum
    pub limit: Option<String>,
    /// UUID of the last capsule of the previous page
    pub marker: Option<String>,
    /// One of id, uuid, name, status, created_at
    pub sort_key: Option<String>,
    /// asc or desc
    pub sort_dir: Option<String>,
}

impl ListCapsulesQuery {
    fn into_request(self, project_id: Option<String>) -> Result<ListRequest, ApiError> {
        let limit = self
            .limit
            .map(|limit| {
                limit.trim().parse::<usize>().map_err(|_| {
                    ApiError::bad_request(format!("limit must be a positive integer, got '{}'", limit))
                })
            })
            .transpose()?;
        Ok(ListRequest {
            limit,
            marker: self.marker,
            sort_key: self.sort_key,
            sort_dir: self.sort_dir,
            project_id,
        })
    }
}

/// Query parameters for capsule deletion
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DeleteCapsuleQuery {
    /// Also delete capsules that are running or in flux
    pub force: Option<String>,
}

/// Build the collection body, linking the next page under `base`.
fn collection(page: CapsulePage, base: &str, request: &ListRequest) -> CapsuleCollection {
    let next = page.next_marker.as_ref().map(|marker| {
        let mut url = format!("{}?limit={}&marker={}", base, page.limit, marker);
        if let Some(key) = &request.sort_key {
            url.push_str(&format!("&sort_key={}", key));
        }
        if let Some(dir) = &request.sort_dir {
            url.push_str(&format!("&sort_dir={}", dir));
        }
        url
    });
    CapsuleCollection {
        capsules: page.capsules.into_iter().map(CapsuleView::from).collect(),
        next,
    }
}

/// Create a capsule
#[utoipa::path(
    post,
    path = "/v1/projects/{project_id}/capsules",
    params(
        ("project_id" = String, Path, description = "Owning project")
    ),
    request_body = CapsuleTemplate,
    responses(
        (status = 202, description = "Capsule accepted", body = CapsuleView),
        (status = 400, description = "Invalid template or unknown image", body = ApiError),
        (status = 503, description = "Compute backend unavailable", body = ApiError)
    ),
    tag = "capsules"
)]
pub async fn create_capsule(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    Json(template): Json<CapsuleTemplate>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = request_context(project_id, &headers);
    let capsule = state.orchestrator.create(&ctx, template).await?;
    let location = format!("/v1/capsules/{}", capsule.uuid);
    Ok((
        StatusCode::ACCEPTED,
        [(header::LOCATION, location)],
        Json(CapsuleView::from(capsule)),
    ))
}

/// List capsules of a project
#[utoipa::path(
    get,
    path = "/v1/projects/{project_id}/capsules",
    params(
        ("project_id" = String, Path, description = "Owning project"),
        ("limit" = Option<String>, Query, description = "Page size, capped by the server maximum"),
        ("marker" = Option<String>, Query, description = "UUID of the last capsule of the previous page"),
        ("sort_key" = Option<String>, Query, description = "One of id, uuid, name, status, created_at"),
        ("sort_dir" = Option<String>, Query, description = "asc or desc")
    ),
    responses(
        (status = 200, description = "One page of capsules", body = CapsuleCollection),
        (status = 400, description = "Invalid paging parameters", body = ApiError)
    ),
    tag = "capsules"
)]
pub async fn list_project_capsules(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    Query(query): Query<ListCapsulesQuery>,
) -> Result<Json<CapsuleCollection>, ApiError> {
    let base = format!("/v1/projects/{}/capsules", project_id);
    let request = query.into_request(Some(project_id))?;
    let page = state.orchestrator.list(request.clone()).await?;
    Ok(Json(collection(page, &base, &request)))
}

/// List capsules across projects
#[utoipa::path(
    get,
    path = "/v1/capsules",
    params(
        ("limit" = Option<String>, Query, description = "Page size, capped by the server maximum"),
        ("marker" = Option<String>, Query, description = "UUID of the last capsule of the previous page"),
        ("sort_key" = Option<String>, Query, description = "One of id, uuid, name, status, created_at"),
        ("sort_dir" = Option<String>, Query, description = "asc or desc")
    ),
    responses(
        (status = 200, description = "One page of capsules", body = CapsuleCollection),
        (status = 400, description = "Invalid paging parameters", body = ApiError)
    ),
    tag = "capsules"
)]
pub async fn list_capsules(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListCapsulesQuery>,
) -> Result<Json<CapsuleCollection>, ApiError> {
    let request = query.into_request(None)?;
    let page = state.orchestrator.list(request.clone()).await?;
    Ok(Json(collection(page, "/v1/capsules", &request)))
}

/// Get a capsule by UUID or name
#[utoipa::path(
    get,
    path = "/v1/capsules/{id}",
    params(
        ("id" = String, Path, description = "Capsule UUID or name")
    ),
    responses(
        (status = 200, description = "Capsule with fresh status", body = CapsuleView),
        (status = 404, description = "Capsule not found", body = ApiError)
    ),
    tag = "capsules"
)]
pub async fn get_capsule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CapsuleView>, ApiError> {
    let capsule = state.orchestrator.get(&id).await?;
    Ok(Json(CapsuleView::from(capsule)))
}

/// Delete a capsule and its containers
#[utoipa::path(
    delete,
    path = "/v1/capsules/{id}",
    params(
        ("id" = String, Path, description = "Capsule UUID or name"),
        ("force" = Option<String>, Query, description = "Also delete running capsules (true/false/1/0/yes/no/on/off)")
    ),
    responses(
        (status = 204, description = "Capsule deleted"),
        (status = 400, description = "Invalid force flag", body = ApiError),
        (status = 404, description = "Capsule not found", body = ApiError),
        (status = 409, description = "Capsule state forbids deletion", body = ApiError),
        (status = 503, description = "Compute backend unavailable", body = ApiError)
    ),
    tag = "capsules"
)]
pub async fn delete_capsule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<DeleteCapsuleQuery>,
) -> Result<StatusCode, ApiError> {
    let force = match query.force.as_deref() {
        Some(value) => parse_bool_flag("force", value)?,
        None => false,
    };
    state.orchestrator.delete(&id, force).await?;
    Ok(StatusCode::NO_CONTENT)
}
