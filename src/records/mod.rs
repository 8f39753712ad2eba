//! SQL access per table family. Every function is scoped by school id.

pub mod assignments;
pub mod classes;
pub mod diagnostics;
pub mod enrollments;
pub mod schools;
pub mod students;
pub mod subjects;
pub mod teachers;
pub mod users;
