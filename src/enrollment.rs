//! Enrollment transitions.
//!
//! Every transition runs in one `BEGIN IMMEDIATE` transaction. The cached
//! `classes.effectif_actuel` column is maintained by triggers that re-aggregate
//! active rows (see `db.rs`), so nothing here writes it.

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentState {
    Active,
    Withdrawn,
    Cancelled,
}

impl EnrollmentState {
    pub const ALL: [EnrollmentState; 3] = [
        EnrollmentState::Active,
        EnrollmentState::Withdrawn,
        EnrollmentState::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EnrollmentState::Active => "active",
            EnrollmentState::Withdrawn => "withdrawn",
            EnrollmentState::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "active" => Some(EnrollmentState::Active),
            "withdrawn" => Some(EnrollmentState::Withdrawn),
            "cancelled" => Some(EnrollmentState::Cancelled),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EnrollmentState::Active => "Active",
            EnrollmentState::Withdrawn => "Retirée",
            EnrollmentState::Cancelled => "Annulée",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    #[error("l'élève est déjà inscrit dans cette classe")]
    DuplicateEnrollment,
    #[error("l'élève est déjà inscrit en {class_name} pour l'année {school_year}")]
    AlreadyEnrolled {
        class_name: String,
        school_year: String,
    },
    #[error("la classe a atteint sa capacité maximale ({capacity} élèves)")]
    CapacityExceeded { capacity: i64 },
    #[error("l'inscription n'est pas active (état : {})", .state.label())]
    NotActive { state: EnrollmentState },
    #[error("élève introuvable")]
    StudentNotFound,
    #[error("classe introuvable")]
    ClassNotFound,
    #[error("inscription introuvable")]
    EnrollmentNotFound,
    #[error("la classe est archivée")]
    ClassInactive,
    #[error("l'élève est archivé")]
    StudentInactive,
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl EnrollmentError {
    pub fn code(&self) -> &'static str {
        match self {
            EnrollmentError::DuplicateEnrollment => "duplicate_enrollment",
            EnrollmentError::AlreadyEnrolled { .. } => "already_enrolled",
            EnrollmentError::CapacityExceeded { .. } => "capacity_exceeded",
            EnrollmentError::NotActive { .. } => "not_active",
            EnrollmentError::StudentNotFound
            | EnrollmentError::ClassNotFound
            | EnrollmentError::EnrollmentNotFound => "not_found",
            EnrollmentError::ClassInactive | EnrollmentError::StudentInactive => "inactive",
            EnrollmentError::Db(_) => "db_query_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Enrollment {
    pub id: i64,
    pub school_id: i64,
    pub student_id: i64,
    pub class_id: i64,
    pub school_year: String,
    pub state: EnrollmentState,
    pub enrolled_on: String,
    pub left_on: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassignment {
    pub withdrawn: Option<Enrollment>,
    pub enrolled: Enrollment,
}

struct ClassRow {
    name: String,
    school_year: String,
    capacity: i64,
    active: bool,
}

fn load_class(tx: &Transaction, school_id: i64, class_id: i64) -> Result<ClassRow, EnrollmentError> {
    tx.query_row(
        "SELECT nom, annee_scolaire, capacite_max, actif
         FROM classes WHERE id = ? AND ecole_id = ?",
        (class_id, school_id),
        |r| {
            Ok(ClassRow {
                name: r.get(0)?,
                school_year: r.get(1)?,
                capacity: r.get(2)?,
                active: r.get::<_, i64>(3)? != 0,
            })
        },
    )
    .optional()?
    .ok_or(EnrollmentError::ClassNotFound)
}

fn ensure_student(tx: &Transaction, school_id: i64, student_id: i64) -> Result<(), EnrollmentError> {
    let active: Option<i64> = tx
        .query_row(
            "SELECT actif FROM eleves WHERE id = ? AND ecole_id = ?",
            (student_id, school_id),
            |r| r.get(0),
        )
        .optional()?;
    match active {
        None => Err(EnrollmentError::StudentNotFound),
        Some(0) => Err(EnrollmentError::StudentInactive),
        Some(_) => Ok(()),
    }
}

fn map_enrollment(r: &rusqlite::Row<'_>) -> rusqlite::Result<Enrollment> {
    let state: String = r.get(5)?;
    Ok(Enrollment {
        id: r.get(0)?,
        school_id: r.get(1)?,
        student_id: r.get(2)?,
        class_id: r.get(3)?,
        school_year: r.get(4)?,
        state: EnrollmentState::parse(&state).unwrap_or(EnrollmentState::Cancelled),
        enrolled_on: r.get(6)?,
        left_on: r.get(7)?,
        reason: r.get(8)?,
    })
}

const ENROLLMENT_COLUMNS: &str = "id, ecole_id, eleve_id, classe_id, annee_scolaire, etat,
     date_inscription, date_sortie, motif";

pub fn get_enrollment(
    conn: &Connection,
    school_id: i64,
    enrollment_id: i64,
) -> Result<Option<Enrollment>, EnrollmentError> {
    let sql = format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM inscriptions WHERE id = ? AND ecole_id = ?"
    );
    Ok(conn
        .query_row(&sql, (enrollment_id, school_id), map_enrollment)
        .optional()?)
}

/// Active enrollment of a student for a school year, if any.
pub fn active_enrollment_for_year(
    conn: &Connection,
    school_id: i64,
    student_id: i64,
    school_year: &str,
) -> Result<Option<Enrollment>, EnrollmentError> {
    let sql = format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM inscriptions
         WHERE ecole_id = ? AND eleve_id = ? AND annee_scolaire = ? AND etat = 'active'"
    );
    Ok(conn
        .query_row(&sql, (school_id, student_id, school_year), map_enrollment)
        .optional()?)
}

/// Count of active enrollments in a class, always re-aggregated.
pub fn active_count(conn: &Connection, class_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM inscriptions WHERE classe_id = ? AND etat = 'active'",
        [class_id],
        |r| r.get(0),
    )
}

fn enroll_in_tx(
    tx: &Transaction,
    school_id: i64,
    student_id: i64,
    class_id: i64,
    on: NaiveDate,
) -> Result<Enrollment, EnrollmentError> {
    let class = load_class(tx, school_id, class_id)?;
    if !class.active {
        return Err(EnrollmentError::ClassInactive);
    }
    ensure_student(tx, school_id, student_id)?;

    if let Some(current) = active_enrollment_for_year(tx, school_id, student_id, &class.school_year)? {
        if current.class_id == class_id {
            return Err(EnrollmentError::DuplicateEnrollment);
        }
        let class_name: String = tx.query_row(
            "SELECT nom FROM classes WHERE id = ?",
            [current.class_id],
            |r| r.get(0),
        )?;
        return Err(EnrollmentError::AlreadyEnrolled {
            class_name,
            school_year: class.school_year,
        });
    }

    if class.capacity > 0 && active_count(tx, class_id)? >= class.capacity {
        return Err(EnrollmentError::CapacityExceeded {
            capacity: class.capacity,
        });
    }

    let enrolled_on = on.format("%Y-%m-%d").to_string();
    let inserted = tx.execute(
        "INSERT INTO inscriptions(
           ecole_id, eleve_id, classe_id, annee_scolaire, etat, date_inscription,
           created_at, updated_at
         ) VALUES(?, ?, ?, ?, 'active', ?,
           strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (school_id, student_id, class_id, &class.school_year, &enrolled_on),
    );
    if let Err(e) = inserted {
        // The partial unique index backs up the checks above.
        if crate::db::is_unique_violation(&e) {
            return Err(EnrollmentError::DuplicateEnrollment);
        }
        return Err(e.into());
    }

    Ok(Enrollment {
        id: tx.last_insert_rowid(),
        school_id,
        student_id,
        class_id,
        school_year: class.school_year,
        state: EnrollmentState::Active,
        enrolled_on,
        left_on: None,
        reason: None,
    })
}

fn close_in_tx(
    tx: &Transaction,
    school_id: i64,
    enrollment_id: i64,
    to: EnrollmentState,
    on: NaiveDate,
    reason: Option<&str>,
) -> Result<Enrollment, EnrollmentError> {
    let mut enrollment =
        get_enrollment(tx, school_id, enrollment_id)?.ok_or(EnrollmentError::EnrollmentNotFound)?;
    if enrollment.state != EnrollmentState::Active {
        return Err(EnrollmentError::NotActive {
            state: enrollment.state,
        });
    }
    let left_on = on.format("%Y-%m-%d").to_string();
    let reason = reason.map(str::trim).filter(|s| !s.is_empty());
    tx.execute(
        "UPDATE inscriptions
         SET etat = ?, date_sortie = ?, motif = ?,
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ? AND etat = 'active'",
        (to.as_str(), &left_on, reason, enrollment_id),
    )?;
    enrollment.state = to;
    enrollment.left_on = Some(left_on);
    enrollment.reason = reason.map(str::to_string);
    Ok(enrollment)
}

fn immediate(conn: &mut Connection) -> rusqlite::Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
}

pub fn enroll(
    conn: &mut Connection,
    school_id: i64,
    student_id: i64,
    class_id: i64,
    on: NaiveDate,
) -> Result<Enrollment, EnrollmentError> {
    let tx = immediate(conn)?;
    let enrollment = enroll_in_tx(&tx, school_id, student_id, class_id, on)?;
    tx.commit()?;
    info!(
        enrollment_id = enrollment.id,
        student_id, class_id, "student enrolled"
    );
    Ok(enrollment)
}

pub fn withdraw(
    conn: &mut Connection,
    school_id: i64,
    enrollment_id: i64,
    on: NaiveDate,
    reason: Option<&str>,
) -> Result<Enrollment, EnrollmentError> {
    let tx = immediate(conn)?;
    let enrollment = close_in_tx(
        &tx,
        school_id,
        enrollment_id,
        EnrollmentState::Withdrawn,
        on,
        reason,
    )?;
    tx.commit()?;
    info!(
        enrollment_id,
        class_id = enrollment.class_id,
        "enrollment withdrawn"
    );
    Ok(enrollment)
}

/// Voids an enrollment entered by mistake.
pub fn cancel(
    conn: &mut Connection,
    school_id: i64,
    enrollment_id: i64,
    on: NaiveDate,
    reason: Option<&str>,
) -> Result<Enrollment, EnrollmentError> {
    let tx = immediate(conn)?;
    let enrollment = close_in_tx(
        &tx,
        school_id,
        enrollment_id,
        EnrollmentState::Cancelled,
        on,
        reason,
    )?;
    tx.commit()?;
    info!(
        enrollment_id,
        class_id = enrollment.class_id,
        "enrollment cancelled"
    );
    Ok(enrollment)
}

/// Moves a student into `new_class_id`, withdrawing their current enrollment for
/// that class's school year first. Either both steps commit or neither does.
pub fn reassign(
    conn: &mut Connection,
    school_id: i64,
    student_id: i64,
    new_class_id: i64,
    on: NaiveDate,
    reason: Option<&str>,
) -> Result<Reassignment, EnrollmentError> {
    let tx = immediate(conn)?;
    let target = load_class(&tx, school_id, new_class_id)?;
    ensure_student(&tx, school_id, student_id)?;

    let withdrawn = match active_enrollment_for_year(&tx, school_id, student_id, &target.school_year)? {
        Some(current) if current.class_id == new_class_id => {
            return Err(EnrollmentError::DuplicateEnrollment);
        }
        Some(current) => Some(close_in_tx(
            &tx,
            school_id,
            current.id,
            EnrollmentState::Withdrawn,
            on,
            reason.or(Some("changement de classe")),
        )?),
        None => None,
    };
    let enrolled = enroll_in_tx(&tx, school_id, student_id, new_class_id, on)?;
    tx.commit()?;
    info!(
        student_id,
        from_class_id = withdrawn.as_ref().map(|w| w.class_id),
        to_class_id = new_class_id,
        "student reassigned"
    );
    Ok(Reassignment { withdrawn, enrolled })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassCount {
    pub class_id: i64,
    pub class_name: String,
    pub school_year: String,
    pub capacity: i64,
    pub cached: i64,
    pub actual: i64,
}

impl ClassCount {
    pub fn is_consistent(&self) -> bool {
        self.cached == self.actual
    }

    pub fn over_capacity(&self) -> bool {
        self.capacity > 0 && self.actual > self.capacity
    }
}

pub fn class_counts(conn: &Connection, school_id: i64) -> rusqlite::Result<Vec<ClassCount>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.nom, c.annee_scolaire, c.capacite_max, c.effectif_actuel,
                (SELECT COUNT(*) FROM inscriptions i
                 WHERE i.classe_id = c.id AND i.etat = 'active') AS actual
         FROM classes c
         WHERE c.ecole_id = ?
         ORDER BY c.annee_scolaire DESC, c.nom",
    )?;
    let rows = stmt
        .query_map([school_id], |r| {
            Ok(ClassCount {
                class_id: r.get(0)?,
                class_name: r.get(1)?,
                school_year: r.get(2)?,
                capacity: r.get(3)?,
                cached: r.get(4)?,
                actual: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Re-aggregates cached counters. `school_id = None` covers every school.
/// Returns the number of classes whose counter changed.
pub fn recount(conn: &Connection, school_id: Option<i64>) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE classes
         SET effectif_actuel = (SELECT COUNT(*) FROM inscriptions i
                                WHERE i.classe_id = classes.id AND i.etat = 'active')
         WHERE (?1 IS NULL OR ecole_id = ?1)
           AND effectif_actuel <> (SELECT COUNT(*) FROM inscriptions i
                                   WHERE i.classe_id = classes.id AND i.etat = 'active')",
        [school_id],
    )
}
