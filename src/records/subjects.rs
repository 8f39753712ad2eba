use rusqlite::{Connection, OptionalExtension};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub id: i64,
    pub code: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub coefficient: f64,
    pub weekly_hours: Option<f64>,
    /// Maximum mark (20 by default).
    pub max_mark: f64,
    pub active: bool,
    pub class_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectInput {
    pub code: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub coefficient: f64,
    pub weekly_hours: Option<f64>,
    pub max_mark: f64,
    pub active: bool,
}

impl Default for SubjectInput {
    fn default() -> Self {
        Self {
            code: None,
            name: String::new(),
            description: None,
            coefficient: 1.0,
            weekly_hours: None,
            max_mark: 20.0,
            active: true,
        }
    }
}

const SUBJECT_SELECT: &str = "SELECT s.id, s.code, s.nom, s.description, s.coefficient, s.heures_hebdo,
        s.bareme, s.actif,
        (SELECT COUNT(*) FROM classe_cours cc WHERE cc.cours_id = s.id)
 FROM cours s";

fn map_subject(r: &rusqlite::Row<'_>) -> rusqlite::Result<Subject> {
    Ok(Subject {
        id: r.get(0)?,
        code: r.get(1)?,
        name: r.get(2)?,
        description: r.get(3)?,
        coefficient: r.get(4)?,
        weekly_hours: r.get(5)?,
        max_mark: r.get(6)?,
        active: r.get::<_, i64>(7)? != 0,
        class_count: r.get(8)?,
    })
}

pub fn list_subjects(
    conn: &Connection,
    school_id: i64,
    only_active: bool,
) -> rusqlite::Result<Vec<Subject>> {
    let sql = format!(
        "{SUBJECT_SELECT} WHERE s.ecole_id = ? AND (? = 0 OR s.actif = 1) ORDER BY s.nom"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((school_id, only_active as i64), map_subject)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_subject(
    conn: &Connection,
    school_id: i64,
    subject_id: i64,
) -> rusqlite::Result<Option<Subject>> {
    let sql = format!("{SUBJECT_SELECT} WHERE s.id = ? AND s.ecole_id = ?");
    conn.query_row(&sql, (subject_id, school_id), map_subject)
        .optional()
}

pub fn code_taken(
    conn: &Connection,
    school_id: i64,
    code: &str,
    except_id: Option<i64>,
) -> rusqlite::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM cours
         WHERE ecole_id = ? AND upper(code) = upper(?) AND (? IS NULL OR id <> ?)",
        (school_id, code, except_id, except_id),
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

pub fn name_taken(
    conn: &Connection,
    school_id: i64,
    name: &str,
    except_id: Option<i64>,
) -> rusqlite::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM cours
         WHERE ecole_id = ? AND lower(nom) = lower(?) AND (? IS NULL OR id <> ?)",
        (school_id, name, except_id, except_id),
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

pub fn create_subject(
    conn: &Connection,
    school_id: i64,
    input: &SubjectInput,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO cours(ecole_id, code, nom, description, coefficient, heures_hebdo, bareme, actif, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            school_id,
            input.code.as_deref(),
            &input.name,
            input.description.as_deref(),
            input.coefficient,
            input.weekly_hours,
            input.max_mark,
            input.active as i64,
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_subject(
    conn: &Connection,
    school_id: i64,
    subject_id: i64,
    input: &SubjectInput,
) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "UPDATE cours
         SET code = ?, nom = ?, description = ?, coefficient = ?, heures_hebdo = ?,
             bareme = ?, actif = ?
         WHERE id = ? AND ecole_id = ?",
        (
            input.code.as_deref(),
            &input.name,
            input.description.as_deref(),
            input.coefficient,
            input.weekly_hours,
            input.max_mark,
            input.active as i64,
            subject_id,
            school_id,
        ),
    )?;
    Ok(n > 0)
}

/// Refused while the subject is assigned to a class.
pub fn delete_subject(conn: &Connection, school_id: i64, subject_id: i64) -> Result<String, AppError> {
    let subject =
        get_subject(conn, school_id, subject_id)?.ok_or_else(|| AppError::not_found("Matière"))?;
    if subject.class_count > 0 {
        return Err(AppError::Conflict(format!(
            "La matière {} est affectée à {} classe(s) ; retirez ces affectations avant de la supprimer.",
            subject.name, subject.class_count
        )));
    }
    conn.execute(
        "DELETE FROM cours WHERE id = ? AND ecole_id = ?",
        (subject_id, school_id),
    )?;
    Ok(subject.name)
}
