//! Route handlers, one module per screen family.
//!
//! Each module exposes its routes per access group (`read_routes`,
//! `staff_routes`, `manage_routes`); the router attaches the guards.

pub mod assignments;
pub mod classes;
pub mod core;
pub mod diagnostics;
pub mod enrollments;
pub mod students;
pub mod subjects;
pub mod teachers;

use axum::response::Response;
use chrono::NaiveDate;
use rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::records::schools::get_school;
use crate::records::teachers::Teacher;
use crate::school_year::current_school_year;
use crate::secure_id::scope;
use crate::session::FlashKind;
use crate::web::guard::RequestContext;
use crate::AppState;

pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// The school's configured current year, falling back to the calendar one.
pub(crate) fn current_year(conn: &Connection, school_id: i64) -> Result<String> {
    Ok(get_school(conn, school_id)?
        .map(|s| s.current_year)
        .filter(|y| !y.trim().is_empty())
        .unwrap_or_else(current_school_year))
}

/// (token, label) pairs for a teacher `<select>`.
pub(crate) fn teacher_options(state: &AppState, teachers: &[Teacher]) -> Vec<(String, String)> {
    teachers
        .iter()
        .map(|t| (state.token(scope::TEACHER, t.id), t.display_name()))
        .collect()
}

/// Business-rule failures become a flash message on `back`; anything else propagates.
pub(crate) fn flash_or_fail(ctx: &RequestContext, err: AppError, back: &str) -> Result<Response> {
    match err {
        AppError::Business(_) | AppError::Conflict(_) => {
            Ok(ctx.redirect_with(FlashKind::Error, err.to_string(), back))
        }
        other => Err(other),
    }
}
