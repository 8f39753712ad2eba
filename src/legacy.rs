//! Conversion of databases written by the older back office.
//!
//! Older `inscriptions` rows carry three status columns that drifted apart
//! (`statut`, `statut_inscription`, `statut_record`). They are collapsed into
//! a single [`EnrollmentState`] once, when the table is rebuilt.

use crate::db::table_has_column;
use crate::enrollment::EnrollmentState;
use crate::school_year::current_school_year;
use anyhow::Context;
use rusqlite::Connection;

const DELETED: &[&str] = &["supprime", "supprimee", "deleted", "archive", "archivee"];
const CANCELLED: &[&str] = &[
    "annule", "annulee", "cancelled", "canceled", "rejete", "rejetee", "refuse", "refusee",
];
const LEFT: &[&str] = &[
    "retire", "retiree", "transfere", "transferee", "abandon", "exclu", "exclue", "sorti",
    "sortie", "withdrawn", "inactif", "inactive", "termine", "terminee",
];
const VALIDATED: &[&str] = &[
    "valide", "validee", "actif", "active", "inscrit", "inscrite", "en_cours", "encours",
];

/// Lowercases and strips French accents so `"Validée"` and `"validee"` compare equal.
pub fn fold_status(raw: &str) -> String {
    raw.trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'à' | 'â' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' => 'i',
            'ô' | 'ö' => 'o',
            'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            ' ' | '-' => '_',
            other => other,
        })
        .collect()
}

fn matches_any(value: Option<&str>, set: &[&str]) -> bool {
    value
        .map(fold_status)
        .map(|v| set.contains(&v.as_str()))
        .unwrap_or(false)
}

/// Maps the legacy status triple onto one state.
///
/// Precedence, strongest first: record deleted, cancelled, withdrawn, validated.
/// A row with no recognised "validated" marker (pending, blank, unknown) is never
/// counted as active.
pub fn collapse_status(
    statut: Option<&str>,
    statut_inscription: Option<&str>,
    statut_record: Option<&str>,
) -> EnrollmentState {
    if matches_any(statut_record, DELETED) || matches_any(statut_record, CANCELLED) {
        return EnrollmentState::Cancelled;
    }
    if matches_any(statut, CANCELLED) || matches_any(statut_inscription, CANCELLED) {
        return EnrollmentState::Cancelled;
    }
    if matches_any(statut, LEFT) || matches_any(statut_inscription, LEFT) {
        return EnrollmentState::Withdrawn;
    }
    if matches_any(statut, VALIDATED) || matches_any(statut_inscription, VALIDATED) {
        return EnrollmentState::Active;
    }
    EnrollmentState::Cancelled
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyRebuildSummary {
    pub migrated: usize,
    pub dropped_orphans: usize,
    pub active: usize,
}

/// Whether `inscriptions` still has the legacy multi-status shape.
pub fn has_legacy_inscriptions(conn: &Connection) -> anyhow::Result<bool> {
    if !crate::db::table_exists(conn, "inscriptions")? {
        return Ok(false);
    }
    Ok(!table_has_column(conn, "inscriptions", "etat")?)
}

struct LegacyRow {
    id: i64,
    eleve_id: i64,
    classe_id: i64,
    ecole_id: i64,
    annee_scolaire: Option<String>,
    date_inscription: Option<String>,
    date_sortie: Option<String>,
    statut: Option<String>,
    statut_inscription: Option<String>,
    statut_record: Option<String>,
}

/// Rebuilds `inscriptions` into the single-state shape.
///
/// Rows pointing at a student or class that no longer exists are dropped.
/// The caller owns the transaction.
pub fn rebuild_legacy_inscriptions(conn: &Connection) -> anyhow::Result<LegacyRebuildSummary> {
    conn.execute("ALTER TABLE inscriptions RENAME TO inscriptions_legacy", [])
        .context("failed to rename legacy inscriptions")?;

    let optional = |col: &str| -> anyhow::Result<String> {
        Ok(if table_has_column(conn, "inscriptions_legacy", col)? {
            format!("CAST(i.{col} AS TEXT)")
        } else {
            "NULL".to_string()
        })
    };
    let sql = format!(
        "SELECT i.id, i.eleve_id, i.classe_id, c.ecole_id,
                {annee}, {date_insc}, {date_sortie}, {statut}, {statut_insc}, {statut_rec}
         FROM inscriptions_legacy i
         JOIN classes c ON c.id = i.classe_id
         JOIN eleves e ON e.id = i.eleve_id
         ORDER BY i.id",
        annee = optional("annee_scolaire")?,
        date_insc = optional("date_inscription")?,
        date_sortie = optional("date_sortie")?,
        statut = optional("statut")?,
        statut_insc = optional("statut_inscription")?,
        statut_rec = optional("statut_record")?,
    );

    let rows = {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |r| {
                Ok(LegacyRow {
                    id: r.get(0)?,
                    eleve_id: r.get(1)?,
                    classe_id: r.get(2)?,
                    ecole_id: r.get(3)?,
                    annee_scolaire: r.get(4)?,
                    date_inscription: r.get(5)?,
                    date_sortie: r.get(6)?,
                    statut: r.get(7)?,
                    statut_inscription: r.get(8)?,
                    statut_record: r.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM inscriptions_legacy", [], |r| r.get(0))?;

    crate::db::create_inscriptions_table(conn)?;

    let fallback_year = current_school_year();
    let mut summary = LegacyRebuildSummary::default();
    {
        let mut insert = conn.prepare(
            "INSERT INTO inscriptions(
               id, ecole_id, eleve_id, classe_id, annee_scolaire, etat,
               date_inscription, date_sortie, motif, created_at, updated_at
             ) VALUES(?, ?, ?, ?,
               COALESCE(NULLIF(?, ''), (SELECT NULLIF(annee_scolaire, '') FROM classes WHERE id = ?), ?),
               ?, COALESCE(NULLIF(?, ''), date('now')), ?, ?,
               strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        )?;
        for row in &rows {
            let state = collapse_status(
                row.statut.as_deref(),
                row.statut_inscription.as_deref(),
                row.statut_record.as_deref(),
            );
            let motif = match state {
                EnrollmentState::Active => None,
                _ => Some(format!(
                    "statuts d'origine: {} / {} / {}",
                    row.statut.as_deref().unwrap_or("-"),
                    row.statut_inscription.as_deref().unwrap_or("-"),
                    row.statut_record.as_deref().unwrap_or("-"),
                )),
            };
            insert.execute((
                row.id,
                row.ecole_id,
                row.eleve_id,
                row.classe_id,
                row.annee_scolaire.as_deref(),
                row.classe_id,
                &fallback_year,
                state.as_str(),
                row.date_inscription.as_deref(),
                row.date_sortie.as_deref(),
                motif.as_deref(),
            ))?;
            summary.migrated += 1;
            if state == EnrollmentState::Active {
                summary.active += 1;
            }
        }
    }
    summary.dropped_orphans = (total as usize).saturating_sub(summary.migrated);

    conn.execute("DROP TABLE inscriptions_legacy", [])?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validated_spellings_collapse_to_active() {
        for s in ["validée", "Validee", "actif", "ACTIVE", "inscrit", "en cours"] {
            assert_eq!(
                collapse_status(Some(s), None, None),
                EnrollmentState::Active,
                "{s}"
            );
            assert_eq!(
                collapse_status(None, Some(s), Some("actif")),
                EnrollmentState::Active,
                "{s}"
            );
        }
    }

    #[test]
    fn terminal_markers_win_over_validated() {
        assert_eq!(
            collapse_status(Some("validée"), Some("validée"), Some("supprimé")),
            EnrollmentState::Cancelled
        );
        assert_eq!(
            collapse_status(Some("actif"), Some("retirée"), None),
            EnrollmentState::Withdrawn
        );
        assert_eq!(
            collapse_status(Some("transféré"), Some("annulée"), None),
            EnrollmentState::Cancelled
        );
    }

    #[test]
    fn pending_and_unknown_are_not_active() {
        assert_eq!(
            collapse_status(Some("en_attente"), None, None),
            EnrollmentState::Cancelled
        );
        assert_eq!(collapse_status(None, None, None), EnrollmentState::Cancelled);
        assert_eq!(collapse_status(Some(""), Some("  "), None), EnrollmentState::Cancelled);
    }
}
