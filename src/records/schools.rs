use rusqlite::{Connection, OptionalExtension};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct School {
    pub id: i64,
    pub name: String,
    pub code: Option<String>,
    pub current_year: String,
}

pub fn get_school(conn: &Connection, school_id: i64) -> rusqlite::Result<Option<School>> {
    conn.query_row(
        "SELECT id, nom, code, annee_scolaire_courante FROM ecoles WHERE id = ?",
        [school_id],
        |r| {
            Ok(School {
                id: r.get(0)?,
                name: r.get(1)?,
                code: r.get(2)?,
                current_year: r.get(3)?,
            })
        },
    )
    .optional()
}

pub fn create_school(
    conn: &Connection,
    name: &str,
    code: Option<&str>,
    current_year: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO ecoles(nom, code, annee_scolaire_courante, created_at)
         VALUES(?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (name, code, current_year),
    )?;
    Ok(conn.last_insert_rowid())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardCounts {
    pub classes: i64,
    pub students: i64,
    pub active_enrollments: i64,
    pub subjects: i64,
    pub teachers: i64,
    pub full_classes: i64,
}

/// Headline numbers for the current school year.
pub fn dashboard_counts(
    conn: &Connection,
    school_id: i64,
    school_year: &str,
) -> rusqlite::Result<DashboardCounts> {
    conn.query_row(
        "SELECT
           (SELECT COUNT(*) FROM classes WHERE ecole_id = ?1 AND annee_scolaire = ?2 AND actif = 1),
           (SELECT COUNT(*) FROM eleves WHERE ecole_id = ?1 AND actif = 1),
           (SELECT COUNT(*) FROM inscriptions WHERE ecole_id = ?1 AND annee_scolaire = ?2 AND etat = 'active'),
           (SELECT COUNT(*) FROM cours WHERE ecole_id = ?1 AND actif = 1),
           (SELECT COUNT(*) FROM enseignants WHERE ecole_id = ?1 AND actif = 1),
           (SELECT COUNT(*) FROM classes
            WHERE ecole_id = ?1 AND annee_scolaire = ?2 AND capacite_max > 0
              AND effectif_actuel >= capacite_max)",
        (school_id, school_year),
        |r| {
            Ok(DashboardCounts {
                classes: r.get(0)?,
                students: r.get(1)?,
                active_enrollments: r.get(2)?,
                subjects: r.get(3)?,
                teachers: r.get(4)?,
                full_classes: r.get(5)?,
            })
        },
    )
}
