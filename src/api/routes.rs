use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::auth::{auth_middleware, AuthService};

use super::analytics::{breakdown, heatmap, overview, timeseries};
use super::handlers::{
    bulk_delete_links, create_link, delete_link, get_link, list_links, reserved_paths,
    update_link, verify_password, ApiState,
};

/// Routes mounted under `/api`
pub fn create_api_router(state: Arc<ApiState>, auth_service: Arc<AuthService>) -> Router {
    let protected_routes = Router::new()
        .route("/links", get(list_links).post(create_link))
        .route("/links/bulk", delete(bulk_delete_links))
        .route(
            "/links/{shortcode}",
            get(get_link).put(update_link).delete(delete_link),
        )
        .route("/analytics/overview", get(overview))
        .route("/analytics/timeseries", get(timeseries))
        .route("/analytics/breakdown", get(breakdown))
        .route("/analytics/heatmap", get(heatmap))
        .route_layer(middleware::from_fn(move |headers, req, next| {
            let auth = Arc::clone(&auth_service);
            auth_middleware(auth, headers, req, next)
        }))
        .with_state(Arc::clone(&state));

    // Visitor-facing and static routes need no caller identity
    let public_routes = Router::new()
        .route("/password/verify", post(verify_password))
        .route("/meta/reserved-paths", get(reserved_paths))
        .with_state(state);

    Router::new().merge(protected_routes).merge(public_routes)
}
