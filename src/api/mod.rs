pub mod analytics;
pub mod handlers;
pub mod routes;

pub use handlers::ApiState;
pub use routes::create_api_router;
