use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::handlers::{self, AppState};
use super::views;
use crate::model;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "mvirt Capsule API",
        version = "0.1.0",
        description = "REST API for capsules: multi-container units made of a sandbox container and its workload containers, created, observed and deleted as one.",
        license(name = "MIT")
    ),
    tags(
        (name = "system", description = "System information"),
        (name = "capsules", description = "Capsule lifecycle operations")
    ),
    paths(
        handlers::get_version,
        handlers::create_capsule,
        handlers::list_project_capsules,
        handlers::list_capsules,
        handlers::get_capsule,
        handlers::delete_capsule,
    ),
    components(schemas(
        handlers::VersionInfo,
        handlers::ApiError,
        views::CapsuleView,
        views::ContainerView,
        views::CapsuleCollection,
        model::CapsuleTemplate,
        model::CapsuleSpec,
        model::CapsuleMetadata,
        model::ContainerTemplate,
        model::Resources,
        model::Allocation,
        model::PortSpec,
        model::RestartPolicy,
        model::ContainerStatus,
        model::TaskState,
    ))
)]
pub struct ApiDoc;

pub fn create_router(state: Arc<AppState>) -> Router {
    let global_routes = Router::new()
        .route("/version", get(handlers::get_version))
        .route("/capsules", get(handlers::list_capsules))
        .route(
            "/capsules/{id}",
            get(handlers::get_capsule).delete(handlers::delete_capsule),
        );

    // Create and project-scoped listing need the project context.
    let project_routes = Router::new().route(
        "/capsules",
        post(handlers::create_capsule).get(handlers::list_project_capsules),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/v1", global_routes)
        .nest("/v1/projects/{project_id}", project_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
