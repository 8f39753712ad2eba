//! HTTP surface: router, access guards, HTML rendering and handlers.

pub mod forms;
pub mod guard;
pub mod handlers;
pub mod html;

use axum::{middleware::from_fn_with_state, Router};
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::AppState;
use handlers::{assignments, classes, core, diagnostics, enrollments, students, subjects, teachers};

/// Create the router with all routes.
///
/// Routes are grouped by the access they require; each group gets its guard
/// as a route layer and the groups never share a path.
pub fn create_router(state: AppState) -> Router {
    let setup = core::setup_routes().route_layer(from_fn_with_state(
        state.clone(),
        guard::require_admin_login,
    ));

    let read = Router::new()
        .merge(core::read_routes())
        .merge(classes::read_routes())
        .merge(students::read_routes())
        .merge(enrollments::read_routes())
        .merge(subjects::read_routes())
        .merge(teachers::read_routes())
        .route_layer(from_fn_with_state(state.clone(), guard::require_reader));

    let staff = Router::new()
        .merge(classes::staff_routes())
        .merge(students::staff_routes())
        .merge(enrollments::staff_routes())
        .route_layer(from_fn_with_state(
            state.clone(),
            guard::require_enrollment_staff,
        ));

    let manage = Router::new()
        .merge(classes::manage_routes())
        .merge(assignments::manage_routes())
        .merge(subjects::manage_routes())
        .merge(teachers::manage_routes())
        .merge(diagnostics::manage_routes())
        .route_layer(from_fn_with_state(state.clone(), guard::require_management));

    Router::new()
        .merge(core::public_routes())
        .merge(setup)
        .merge(read)
        .merge(staff)
        .merge(manage)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> AppError {
    AppError::not_found("Page")
}
