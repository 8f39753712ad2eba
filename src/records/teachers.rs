use rusqlite::{Connection, OptionalExtension};

#[derive(Debug, Clone, PartialEq)]
pub struct Teacher {
    pub id: i64,
    pub last_name: String,
    pub first_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub specialty: Option<String>,
    pub active: bool,
}

impl Teacher {
    pub fn display_name(&self) -> String {
        display_name(&self.last_name, &self.first_name)
    }
}

pub fn display_name(last_name: &str, first_name: &str) -> String {
    if first_name.trim().is_empty() {
        last_name.to_string()
    } else {
        format!("{} {}", last_name, first_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeacherInput {
    pub last_name: String,
    pub first_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub specialty: Option<String>,
    pub active: bool,
}

fn map_teacher(r: &rusqlite::Row<'_>) -> rusqlite::Result<Teacher> {
    Ok(Teacher {
        id: r.get(0)?,
        last_name: r.get(1)?,
        first_name: r.get(2)?,
        email: r.get(3)?,
        phone: r.get(4)?,
        specialty: r.get(5)?,
        active: r.get::<_, i64>(6)? != 0,
    })
}

pub fn list_teachers(
    conn: &Connection,
    school_id: i64,
    only_active: bool,
) -> rusqlite::Result<Vec<Teacher>> {
    let mut stmt = conn.prepare(
        "SELECT id, nom, prenom, email, telephone, specialite, actif
         FROM enseignants
         WHERE ecole_id = ? AND (? = 0 OR actif = 1)
         ORDER BY nom, prenom",
    )?;
    let rows = stmt
        .query_map((school_id, only_active as i64), map_teacher)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_teacher(
    conn: &Connection,
    school_id: i64,
    teacher_id: i64,
) -> rusqlite::Result<Option<Teacher>> {
    conn.query_row(
        "SELECT id, nom, prenom, email, telephone, specialite, actif
         FROM enseignants WHERE id = ? AND ecole_id = ?",
        (teacher_id, school_id),
        map_teacher,
    )
    .optional()
}

pub fn email_taken(
    conn: &Connection,
    school_id: i64,
    email: &str,
    except_id: Option<i64>,
) -> rusqlite::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM enseignants
         WHERE ecole_id = ? AND lower(email) = lower(?) AND (? IS NULL OR id <> ?)",
        (school_id, email, except_id, except_id),
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

pub fn create_teacher(
    conn: &Connection,
    school_id: i64,
    input: &TeacherInput,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO enseignants(ecole_id, nom, prenom, email, telephone, specialite, actif, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            school_id,
            &input.last_name,
            &input.first_name,
            input.email.as_deref(),
            input.phone.as_deref(),
            input.specialty.as_deref(),
            input.active as i64,
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_teacher(
    conn: &Connection,
    school_id: i64,
    teacher_id: i64,
    input: &TeacherInput,
) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "UPDATE enseignants
         SET nom = ?, prenom = ?, email = ?, telephone = ?, specialite = ?, actif = ?
         WHERE id = ? AND ecole_id = ?",
        (
            &input.last_name,
            &input.first_name,
            input.email.as_deref(),
            input.phone.as_deref(),
            input.specialty.as_deref(),
            input.active as i64,
            teacher_id,
            school_id,
        ),
    )?;
    Ok(n > 0)
}
