use rusqlite::Connection;

use crate::enrollment::EnrollmentState;
use crate::records::teachers::display_name;

/// An enrollment joined with student and class names, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentRow {
    pub id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub matricule: Option<String>,
    pub class_id: i64,
    pub class_name: String,
    pub school_year: String,
    pub state: EnrollmentState,
    pub enrolled_on: String,
    pub left_on: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EnrollmentFilter {
    pub state: Option<EnrollmentState>,
    pub class_id: Option<i64>,
    pub student_id: Option<i64>,
    pub school_year: Option<String>,
    pub only_archived_students: bool,
}

pub fn list_enrollments(
    conn: &Connection,
    school_id: i64,
    filter: &EnrollmentFilter,
) -> rusqlite::Result<Vec<EnrollmentRow>> {
    let mut stmt = conn.prepare(
        "SELECT i.id, i.eleve_id, e.nom, e.prenom, e.matricule, i.classe_id, c.nom,
                i.annee_scolaire, i.etat, i.date_inscription, i.date_sortie, i.motif
         FROM inscriptions i
         JOIN eleves e ON e.id = i.eleve_id
         JOIN classes c ON c.id = i.classe_id
         WHERE i.ecole_id = ?1
           AND (?2 IS NULL OR i.etat = ?2)
           AND (?3 IS NULL OR i.classe_id = ?3)
           AND (?4 IS NULL OR i.eleve_id = ?4)
           AND (?5 IS NULL OR i.annee_scolaire = ?5)
           AND (?6 = 0 OR e.actif = 0)
         ORDER BY i.annee_scolaire DESC, c.nom, e.nom, e.prenom, i.id",
    )?;
    let rows = stmt
        .query_map(
            (
                school_id,
                filter.state.map(EnrollmentState::as_str),
                filter.class_id,
                filter.student_id,
                filter.school_year.as_deref(),
                filter.only_archived_students as i64,
            ),
            |r| {
                let last: String = r.get(2)?;
                let first: String = r.get(3)?;
                let state: String = r.get(8)?;
                Ok(EnrollmentRow {
                    id: r.get(0)?,
                    student_id: r.get(1)?,
                    student_name: display_name(&last, &first),
                    matricule: r.get(4)?,
                    class_id: r.get(5)?,
                    class_name: r.get(6)?,
                    school_year: r.get(7)?,
                    state: EnrollmentState::parse(&state).unwrap_or(EnrollmentState::Cancelled),
                    enrolled_on: r.get(9)?,
                    left_on: r.get(10)?,
                    reason: r.get(11)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Active enrollments of a class, in roster order.
pub fn class_roster(
    conn: &Connection,
    school_id: i64,
    class_id: i64,
) -> rusqlite::Result<Vec<EnrollmentRow>> {
    list_enrollments(
        conn,
        school_id,
        &EnrollmentFilter {
            state: Some(EnrollmentState::Active),
            class_id: Some(class_id),
            ..Default::default()
        },
    )
}

/// Active enrollments whose student record has been archived.
pub fn list_inactive_students_enrolled(
    conn: &Connection,
    school_id: i64,
) -> rusqlite::Result<Vec<EnrollmentRow>> {
    list_enrollments(
        conn,
        school_id,
        &EnrollmentFilter {
            state: Some(EnrollmentState::Active),
            only_archived_students: true,
            ..Default::default()
        },
    )
}
