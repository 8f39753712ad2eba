use rusqlite::Connection;
use serde::Serialize;

use crate::enrollment::{class_counts, ClassCount};
use crate::records::assignments::{list_with_inactive_teacher, Assignment};
use crate::records::enrollments::{list_inactive_students_enrolled, EnrollmentRow};

/// Read-only consistency report for one school.
#[derive(Debug, Clone)]
pub struct Report {
    pub counts: Vec<ClassCount>,
    pub inactive_students_enrolled: Vec<EnrollmentRow>,
    pub inactive_teachers_assigned: Vec<Assignment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub classes: usize,
    pub counter_mismatches: usize,
    pub over_capacity: usize,
    pub inactive_students_enrolled: usize,
    pub inactive_teachers_assigned: usize,
}

impl Report {
    pub fn summary(&self) -> Summary {
        Summary {
            classes: self.counts.len(),
            counter_mismatches: self.counts.iter().filter(|c| !c.is_consistent()).count(),
            over_capacity: self.counts.iter().filter(|c| c.over_capacity()).count(),
            inactive_students_enrolled: self.inactive_students_enrolled.len(),
            inactive_teachers_assigned: self.inactive_teachers_assigned.len(),
        }
    }

    pub fn is_clean(&self) -> bool {
        let s = self.summary();
        s.counter_mismatches == 0
            && s.over_capacity == 0
            && s.inactive_students_enrolled == 0
            && s.inactive_teachers_assigned == 0
    }
}

pub fn build_report(conn: &Connection, school_id: i64) -> rusqlite::Result<Report> {
    Ok(Report {
        counts: class_counts(conn, school_id)?,
        inactive_students_enrolled: list_inactive_students_enrolled(conn, school_id)?,
        inactive_teachers_assigned: list_with_inactive_teacher(conn, school_id)?,
    })
}

pub fn school_ids(conn: &Connection) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM ecoles ORDER BY id")?;
    let rows = stmt
        .query_map([], |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
