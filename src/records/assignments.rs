use rusqlite::{Connection, OptionalExtension};

use crate::db::is_unique_violation;
use crate::error::AppError;

/// A subject taught in a class, optionally by a named teacher.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub id: i64,
    pub class_id: i64,
    pub class_name: String,
    pub subject_id: i64,
    pub subject_code: Option<String>,
    pub subject_name: String,
    pub teacher_id: Option<i64>,
    pub teacher_name: Option<String>,
    pub teacher_active: bool,
    pub coefficient_override: Option<f64>,
    pub subject_coefficient: f64,
    pub weekly_hours: Option<f64>,
}

impl Assignment {
    pub fn coefficient(&self) -> f64 {
        self.coefficient_override.unwrap_or(self.subject_coefficient)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentInput {
    pub subject_id: i64,
    pub teacher_id: Option<i64>,
    pub coefficient_override: Option<f64>,
    pub weekly_hours: Option<f64>,
}

const ASSIGNMENT_SELECT: &str = "SELECT cc.id, cc.classe_id, c.nom, cc.cours_id, s.code, s.nom,
        cc.enseignant_id,
        CASE WHEN t.id IS NULL THEN NULL
             WHEN t.prenom = '' THEN t.nom
             ELSE t.nom || ' ' || t.prenom END,
        COALESCE(t.actif, 1),
        cc.coefficient, s.coefficient, COALESCE(cc.heures_hebdo, s.heures_hebdo)
 FROM classe_cours cc
 JOIN classes c ON c.id = cc.classe_id
 JOIN cours s ON s.id = cc.cours_id
 LEFT JOIN enseignants t ON t.id = cc.enseignant_id";

fn map_assignment(r: &rusqlite::Row<'_>) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        id: r.get(0)?,
        class_id: r.get(1)?,
        class_name: r.get(2)?,
        subject_id: r.get(3)?,
        subject_code: r.get(4)?,
        subject_name: r.get(5)?,
        teacher_id: r.get(6)?,
        teacher_name: r.get(7)?,
        teacher_active: r.get::<_, i64>(8)? != 0,
        coefficient_override: r.get(9)?,
        subject_coefficient: r.get(10)?,
        weekly_hours: r.get(11)?,
    })
}

pub fn list_for_class(
    conn: &Connection,
    school_id: i64,
    class_id: i64,
) -> rusqlite::Result<Vec<Assignment>> {
    let sql = format!("{ASSIGNMENT_SELECT} WHERE cc.classe_id = ? AND cc.ecole_id = ? ORDER BY s.nom");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((class_id, school_id), map_assignment)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_for_subject(
    conn: &Connection,
    school_id: i64,
    subject_id: i64,
) -> rusqlite::Result<Vec<Assignment>> {
    let sql = format!(
        "{ASSIGNMENT_SELECT} WHERE cc.cours_id = ? AND cc.ecole_id = ?
         ORDER BY c.annee_scolaire DESC, c.nom"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((subject_id, school_id), map_assignment)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Assignments whose teacher has been archived.
pub fn list_with_inactive_teacher(
    conn: &Connection,
    school_id: i64,
) -> rusqlite::Result<Vec<Assignment>> {
    let sql = format!("{ASSIGNMENT_SELECT} WHERE cc.ecole_id = ? AND t.actif = 0 ORDER BY c.nom, s.nom");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([school_id], map_assignment)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_assignment(
    conn: &Connection,
    school_id: i64,
    assignment_id: i64,
) -> rusqlite::Result<Option<Assignment>> {
    let sql = format!("{ASSIGNMENT_SELECT} WHERE cc.id = ? AND cc.ecole_id = ?");
    conn.query_row(&sql, (assignment_id, school_id), map_assignment)
        .optional()
}

pub fn create_assignment(
    conn: &Connection,
    school_id: i64,
    class_id: i64,
    input: &AssignmentInput,
) -> Result<i64, AppError> {
    let inserted = conn.execute(
        "INSERT INTO classe_cours(ecole_id, classe_id, cours_id, enseignant_id, coefficient, heures_hebdo, created_at)
         VALUES(?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            school_id,
            class_id,
            input.subject_id,
            input.teacher_id,
            input.coefficient_override,
            input.weekly_hours,
        ),
    );
    match inserted {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(e) if is_unique_violation(&e) => Err(
            AppError::Conflict("Cette matière est déjà affectée à la classe.".to_string()),
        ),
        Err(e) => Err(e.into()),
    }
}

pub fn update_assignment(
    conn: &Connection,
    school_id: i64,
    assignment_id: i64,
    teacher_id: Option<i64>,
    coefficient_override: Option<f64>,
    weekly_hours: Option<f64>,
) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "UPDATE classe_cours SET enseignant_id = ?, coefficient = ?, heures_hebdo = ?
         WHERE id = ? AND ecole_id = ?",
        (
            teacher_id,
            coefficient_override,
            weekly_hours,
            assignment_id,
            school_id,
        ),
    )?;
    Ok(n > 0)
}

pub fn delete_assignment(
    conn: &Connection,
    school_id: i64,
    assignment_id: i64,
) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "DELETE FROM classe_cours WHERE id = ? AND ecole_id = ?",
        (assignment_id, school_id),
    )?;
    Ok(n > 0)
}
