use crate::handlers;
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/tasks", get(handlers::get_tasks))
        .route(
            "/api/checkins",
            get(handlers::list_check_ins)
                .post(handlers::toggle_check_in)
                .delete(handlers::delete_check_in),
        )
        .route("/api/stats", get(handlers::get_stats))
        .route(
            "/api/user",
            get(handlers::get_user)
                .put(handlers::update_user)
                .delete(handlers::delete_user),
        )
        .with_state(state)
}
