pub mod handlers;
pub mod routes;
pub mod views;

pub use handlers::{ApiError, AppState};
pub use routes::{ApiDoc, create_router};
