use rusqlite::{Connection, OptionalExtension};

use crate::records::teachers::display_name;

#[derive(Debug, Clone, PartialEq)]
pub struct Student {
    pub id: i64,
    pub matricule: Option<String>,
    pub last_name: String,
    pub first_name: String,
    pub birth_date: Option<String>,
    pub sex: Option<String>,
    pub active: bool,
    /// Class of the active enrollment for the requested school year.
    pub current_class: Option<(i64, String)>,
}

impl Student {
    pub fn display_name(&self) -> String {
        display_name(&self.last_name, &self.first_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentInput {
    pub matricule: Option<String>,
    pub last_name: String,
    pub first_name: String,
    pub birth_date: Option<String>,
    pub sex: Option<String>,
    pub active: bool,
}

const STUDENT_SELECT: &str = "SELECT e.id, e.matricule, e.nom, e.prenom, e.date_naissance, e.sexe, e.actif,
        c.id, c.nom
 FROM eleves e
 LEFT JOIN inscriptions i
   ON i.eleve_id = e.id AND i.etat = 'active' AND i.annee_scolaire = ?1
 LEFT JOIN classes c ON c.id = i.classe_id";

fn map_student(r: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    let class_id: Option<i64> = r.get(7)?;
    let class_name: Option<String> = r.get(8)?;
    Ok(Student {
        id: r.get(0)?,
        matricule: r.get(1)?,
        last_name: r.get(2)?,
        first_name: r.get(3)?,
        birth_date: r.get(4)?,
        sex: r.get(5)?,
        active: r.get::<_, i64>(6)? != 0,
        current_class: class_id.zip(class_name),
    })
}

/// Students of a school, optionally filtered by a name/matricule fragment.
pub fn list_students(
    conn: &Connection,
    school_id: i64,
    school_year: &str,
    search: Option<&str>,
) -> rusqlite::Result<Vec<Student>> {
    let pattern = search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s.to_lowercase()));
    let sql = format!(
        "{STUDENT_SELECT}
         WHERE e.ecole_id = ?2
           AND (?3 IS NULL
                OR lower(e.nom) LIKE ?3 OR lower(e.prenom) LIKE ?3
                OR lower(COALESCE(e.matricule, '')) LIKE ?3)
         ORDER BY e.nom, e.prenom"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((school_year, school_id, pattern), map_student)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Active students without an active enrollment for `school_year`.
pub fn list_unenrolled(
    conn: &Connection,
    school_id: i64,
    school_year: &str,
) -> rusqlite::Result<Vec<Student>> {
    let sql = format!(
        "{STUDENT_SELECT}
         WHERE e.ecole_id = ?2 AND e.actif = 1 AND i.id IS NULL
         ORDER BY e.nom, e.prenom"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((school_year, school_id), map_student)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_student(
    conn: &Connection,
    school_id: i64,
    student_id: i64,
    school_year: &str,
) -> rusqlite::Result<Option<Student>> {
    let sql = format!("{STUDENT_SELECT} WHERE e.id = ?2 AND e.ecole_id = ?3");
    conn.query_row(&sql, (school_year, student_id, school_id), map_student)
        .optional()
}

pub fn matricule_taken(
    conn: &Connection,
    school_id: i64,
    matricule: &str,
    except_id: Option<i64>,
) -> rusqlite::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM eleves
         WHERE ecole_id = ? AND matricule = ? AND (? IS NULL OR id <> ?)",
        (school_id, matricule, except_id, except_id),
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

pub fn create_student(
    conn: &Connection,
    school_id: i64,
    input: &StudentInput,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO eleves(ecole_id, matricule, nom, prenom, date_naissance, sexe, actif, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            school_id,
            input.matricule.as_deref(),
            &input.last_name,
            &input.first_name,
            input.birth_date.as_deref(),
            input.sex.as_deref(),
            input.active as i64,
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_student(
    conn: &Connection,
    school_id: i64,
    student_id: i64,
    input: &StudentInput,
) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "UPDATE eleves
         SET matricule = ?, nom = ?, prenom = ?, date_naissance = ?, sexe = ?, actif = ?
         WHERE id = ? AND ecole_id = ?",
        (
            input.matricule.as_deref(),
            &input.last_name,
            &input.first_name,
            input.birth_date.as_deref(),
            input.sex.as_deref(),
            input.active as i64,
            student_id,
            school_id,
        ),
    )?;
    Ok(n > 0)
}

pub fn has_active_enrollment(conn: &Connection, student_id: i64) -> rusqlite::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM inscriptions WHERE eleve_id = ? AND etat = 'active'",
        [student_id],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}
