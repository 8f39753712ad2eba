use rusqlite::{Connection, OptionalExtension, TransactionBehavior};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq)]
pub struct Class {
    pub id: i64,
    pub name: String,
    pub level: String,
    pub cycle: Option<String>,
    pub school_year: String,
    /// 0 means unlimited.
    pub capacity: i64,
    pub homeroom_teacher_id: Option<i64>,
    pub homeroom_teacher_name: Option<String>,
    pub room: Option<String>,
    pub enrolled: i64,
    pub active: bool,
}

impl Class {
    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.enrolled >= self.capacity
    }

    pub fn capacity_label(&self) -> String {
        if self.capacity == 0 {
            format!("{} / illimitée", self.enrolled)
        } else {
            format!("{} / {}", self.enrolled, self.capacity)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassInput {
    pub name: String,
    pub level: String,
    pub cycle: Option<String>,
    pub school_year: String,
    pub capacity: i64,
    pub homeroom_teacher_id: Option<i64>,
    pub room: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ClassFilter {
    pub school_year: Option<String>,
    pub level: Option<String>,
    pub only_active: bool,
}

const CLASS_SELECT: &str = "SELECT c.id, c.nom, c.niveau, c.cycle, c.annee_scolaire, c.capacite_max,
        c.enseignant_principal_id,
        CASE WHEN t.id IS NULL THEN NULL
             WHEN t.prenom = '' THEN t.nom
             ELSE t.nom || ' ' || t.prenom END,
        c.salle, c.effectif_actuel, c.actif
 FROM classes c
 LEFT JOIN enseignants t ON t.id = c.enseignant_principal_id";

fn map_class(r: &rusqlite::Row<'_>) -> rusqlite::Result<Class> {
    Ok(Class {
        id: r.get(0)?,
        name: r.get(1)?,
        level: r.get(2)?,
        cycle: r.get(3)?,
        school_year: r.get(4)?,
        capacity: r.get(5)?,
        homeroom_teacher_id: r.get(6)?,
        homeroom_teacher_name: r.get(7)?,
        room: r.get(8)?,
        enrolled: r.get(9)?,
        active: r.get::<_, i64>(10)? != 0,
    })
}

pub fn list_classes(
    conn: &Connection,
    school_id: i64,
    filter: &ClassFilter,
) -> rusqlite::Result<Vec<Class>> {
    let sql = format!(
        "{CLASS_SELECT}
         WHERE c.ecole_id = ?1
           AND (?2 IS NULL OR c.annee_scolaire = ?2)
           AND (?3 IS NULL OR c.niveau = ?3)
           AND (?4 = 0 OR c.actif = 1)
         ORDER BY c.annee_scolaire DESC, c.niveau, c.nom"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            (
                school_id,
                filter.school_year.as_deref(),
                filter.level.as_deref(),
                filter.only_active as i64,
            ),
            map_class,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_class(conn: &Connection, school_id: i64, class_id: i64) -> rusqlite::Result<Option<Class>> {
    let sql = format!("{CLASS_SELECT} WHERE c.id = ? AND c.ecole_id = ?");
    conn.query_row(&sql, (class_id, school_id), map_class)
        .optional()
}

/// Distinct levels in use, for the list filter.
pub fn list_levels(conn: &Connection, school_id: i64) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT niveau FROM classes WHERE ecole_id = ? AND niveau <> '' ORDER BY niveau",
    )?;
    let rows = stmt
        .query_map([school_id], |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn name_taken(
    conn: &Connection,
    school_id: i64,
    name: &str,
    school_year: &str,
    except_id: Option<i64>,
) -> rusqlite::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM classes
         WHERE ecole_id = ? AND lower(nom) = lower(?) AND annee_scolaire = ?
           AND (? IS NULL OR id <> ?)",
        (school_id, name, school_year, except_id, except_id),
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

pub fn create_class(conn: &Connection, school_id: i64, input: &ClassInput) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO classes(
           ecole_id, nom, niveau, cycle, annee_scolaire, capacite_max,
           enseignant_principal_id, salle, actif, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?,
           strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            school_id,
            &input.name,
            &input.level,
            input.cycle.as_deref(),
            &input.school_year,
            input.capacity,
            input.homeroom_teacher_id,
            input.room.as_deref(),
            input.active as i64,
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

/// The school year of a class with enrollments cannot change; the enrollments
/// carry it.
pub fn update_class(
    conn: &Connection,
    school_id: i64,
    class_id: i64,
    input: &ClassInput,
) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "UPDATE classes
         SET nom = ?, niveau = ?, cycle = ?, annee_scolaire = ?, capacite_max = ?,
             enseignant_principal_id = ?, salle = ?, actif = ?,
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ? AND ecole_id = ?",
        (
            &input.name,
            &input.level,
            input.cycle.as_deref(),
            &input.school_year,
            input.capacity,
            input.homeroom_teacher_id,
            input.room.as_deref(),
            input.active as i64,
            class_id,
            school_id,
        ),
    )?;
    Ok(n > 0)
}

pub fn enrollment_count(conn: &Connection, class_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM inscriptions WHERE classe_id = ?",
        [class_id],
        |r| r.get(0),
    )
}

/// Deletes a class with its assignments and closed enrollments.
/// Refused while the class still has active enrollments.
pub fn delete_class(conn: &mut Connection, school_id: i64, class_id: i64) -> Result<String, AppError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let row: Option<(String, i64)> = tx
        .query_row(
            "SELECT nom, (SELECT COUNT(*) FROM inscriptions
                          WHERE classe_id = classes.id AND etat = 'active')
             FROM classes WHERE id = ? AND ecole_id = ?",
            (class_id, school_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((name, active)) = row else {
        return Err(AppError::not_found("Classe"));
    };
    if active > 0 {
        return Err(AppError::Conflict(format!(
            "La classe {name} compte encore {active} élève(s) inscrit(s) ; retirez-les avant de la supprimer."
        )));
    }

    // Dependency order; there is no ON DELETE CASCADE.
    tx.execute("DELETE FROM classe_cours WHERE classe_id = ?", [class_id])?;
    tx.execute("DELETE FROM inscriptions WHERE classe_id = ?", [class_id])?;
    tx.execute("DELETE FROM classes WHERE id = ?", [class_id])?;
    tx.commit()?;
    Ok(name)
}
