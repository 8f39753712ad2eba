use anyhow::Context;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::school_year::current_school_year;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

struct Migration {
    version: i64,
    name: &'static str,
    apply: fn(&Connection) -> anyhow::Result<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "base_schema",
        apply: migrate_base_schema,
    },
    Migration {
        version: 2,
        name: "legacy_columns",
        apply: migrate_legacy_columns,
    },
    Migration {
        version: 3,
        name: "inscriptions_single_state",
        apply: migrate_inscriptions_single_state,
    },
    Migration {
        version: 4,
        name: "enrollment_constraints",
        apply: migrate_enrollment_constraints,
    },
];

/// Opens a connection with the per-connection pragmas every request needs.
pub fn connect(db_path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

/// Opens the database and applies pending migrations.
pub fn open_db(db_path: &Path) -> anyhow::Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.to_string_lossy()))?;
        }
    }
    let mut conn = connect(db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    migrate(&mut conn)?;
    Ok(conn)
}

fn ensure_migrations_table(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations(
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

pub fn applied_versions(conn: &Connection) -> anyhow::Result<Vec<i64>> {
    ensure_migrations_table(conn)?;
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let versions = stmt
        .query_map([], |r| r.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(versions)
}

/// Names of migrations not yet applied, in order.
pub fn pending_migrations(conn: &Connection) -> anyhow::Result<Vec<&'static str>> {
    let applied = applied_versions(conn)?;
    Ok(MIGRATIONS
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .map(|m| m.name)
        .collect())
}

/// Applies pending migrations, each in its own transaction. Returns their names.
pub fn migrate(conn: &mut Connection) -> anyhow::Result<Vec<&'static str>> {
    let applied = applied_versions(conn)?;
    let mut done = Vec::new();
    for m in MIGRATIONS.iter().filter(|m| !applied.contains(&m.version)) {
        let tx = conn.transaction()?;
        (m.apply)(&tx).with_context(|| format!("migration {} ({}) failed", m.version, m.name))?;
        tx.execute(
            "INSERT INTO schema_migrations(version, name, applied_at)
             VALUES(?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
            (m.version, m.name),
        )?;
        tx.commit()?;
        info!(version = m.version, name = m.name, "migration applied");
        done.push(m.name);
    }
    Ok(done)
}

const BASE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS ecoles(
        id INTEGER PRIMARY KEY,
        nom TEXT NOT NULL,
        code TEXT,
        annee_scolaire_courante TEXT NOT NULL DEFAULT '',
        created_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS utilisateurs(
        id INTEGER PRIMARY KEY,
        ecole_id INTEGER REFERENCES ecoles(id),
        email TEXT NOT NULL UNIQUE,
        nom TEXT NOT NULL,
        role TEXT NOT NULL CHECK(role IN ('admin', 'direction', 'secretariat', 'enseignant')),
        mot_de_passe_hash TEXT NOT NULL,
        actif INTEGER NOT NULL DEFAULT 1,
        created_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS enseignants(
        id INTEGER PRIMARY KEY,
        ecole_id INTEGER NOT NULL REFERENCES ecoles(id),
        nom TEXT NOT NULL,
        prenom TEXT NOT NULL DEFAULT '',
        email TEXT,
        telephone TEXT,
        specialite TEXT,
        actif INTEGER NOT NULL DEFAULT 1,
        created_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS eleves(
        id INTEGER PRIMARY KEY,
        ecole_id INTEGER NOT NULL REFERENCES ecoles(id),
        matricule TEXT,
        nom TEXT NOT NULL,
        prenom TEXT NOT NULL DEFAULT '',
        date_naissance TEXT,
        sexe TEXT,
        actif INTEGER NOT NULL DEFAULT 1,
        created_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS classes(
        id INTEGER PRIMARY KEY,
        ecole_id INTEGER NOT NULL REFERENCES ecoles(id),
        nom TEXT NOT NULL,
        niveau TEXT NOT NULL DEFAULT '',
        cycle TEXT,
        annee_scolaire TEXT NOT NULL DEFAULT '',
        capacite_max INTEGER NOT NULL DEFAULT 0 CHECK(capacite_max >= 0),
        enseignant_principal_id INTEGER REFERENCES enseignants(id),
        salle TEXT,
        effectif_actuel INTEGER NOT NULL DEFAULT 0,
        actif INTEGER NOT NULL DEFAULT 1,
        created_at TEXT,
        updated_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS cours(
        id INTEGER PRIMARY KEY,
        ecole_id INTEGER NOT NULL REFERENCES ecoles(id),
        code TEXT,
        nom TEXT NOT NULL,
        description TEXT,
        coefficient REAL NOT NULL DEFAULT 1 CHECK(coefficient > 0),
        heures_hebdo REAL,
        bareme REAL NOT NULL DEFAULT 20,
        actif INTEGER NOT NULL DEFAULT 1,
        created_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS classe_cours(
        id INTEGER PRIMARY KEY,
        ecole_id INTEGER NOT NULL REFERENCES ecoles(id),
        classe_id INTEGER NOT NULL REFERENCES classes(id),
        cours_id INTEGER NOT NULL REFERENCES cours(id),
        enseignant_id INTEGER REFERENCES enseignants(id),
        coefficient REAL,
        heures_hebdo REAL,
        created_at TEXT
    )",
];

pub(crate) fn create_inscriptions_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS inscriptions(
            id INTEGER PRIMARY KEY,
            ecole_id INTEGER NOT NULL REFERENCES ecoles(id),
            eleve_id INTEGER NOT NULL REFERENCES eleves(id),
            classe_id INTEGER NOT NULL REFERENCES classes(id),
            annee_scolaire TEXT NOT NULL,
            etat TEXT NOT NULL CHECK(etat IN ('active', 'withdrawn', 'cancelled')),
            date_inscription TEXT NOT NULL,
            date_sortie TEXT,
            motif TEXT,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    Ok(())
}

fn migrate_base_schema(conn: &Connection) -> anyhow::Result<()> {
    for ddl in BASE_TABLES {
        conn.execute(ddl, [])?;
    }
    // A legacy inscriptions table is left alone here and rebuilt by a later step.
    create_inscriptions_table(conn)?;
    Ok(())
}

/// Columns that databases created by the older back office may lack.
/// Only nullable or defaulted columns can be added this way.
const LEGACY_COLUMNS: &[(&str, &str, &str)] = &[
    ("ecoles", "code", "TEXT"),
    ("ecoles", "annee_scolaire_courante", "TEXT NOT NULL DEFAULT ''"),
    ("ecoles", "created_at", "TEXT"),
    ("enseignants", "prenom", "TEXT NOT NULL DEFAULT ''"),
    ("enseignants", "email", "TEXT"),
    ("enseignants", "telephone", "TEXT"),
    ("enseignants", "specialite", "TEXT"),
    ("enseignants", "actif", "INTEGER NOT NULL DEFAULT 1"),
    ("enseignants", "created_at", "TEXT"),
    ("eleves", "matricule", "TEXT"),
    ("eleves", "prenom", "TEXT NOT NULL DEFAULT ''"),
    ("eleves", "date_naissance", "TEXT"),
    ("eleves", "sexe", "TEXT"),
    ("eleves", "actif", "INTEGER NOT NULL DEFAULT 1"),
    ("eleves", "created_at", "TEXT"),
    ("classes", "niveau", "TEXT NOT NULL DEFAULT ''"),
    ("classes", "cycle", "TEXT"),
    ("classes", "annee_scolaire", "TEXT NOT NULL DEFAULT ''"),
    ("classes", "capacite_max", "INTEGER NOT NULL DEFAULT 0"),
    ("classes", "enseignant_principal_id", "INTEGER"),
    ("classes", "salle", "TEXT"),
    ("classes", "effectif_actuel", "INTEGER NOT NULL DEFAULT 0"),
    ("classes", "actif", "INTEGER NOT NULL DEFAULT 1"),
    ("classes", "created_at", "TEXT"),
    ("classes", "updated_at", "TEXT"),
    ("cours", "code", "TEXT"),
    ("cours", "description", "TEXT"),
    ("cours", "coefficient", "REAL NOT NULL DEFAULT 1"),
    ("cours", "heures_hebdo", "REAL"),
    ("cours", "bareme", "REAL NOT NULL DEFAULT 20"),
    ("cours", "actif", "INTEGER NOT NULL DEFAULT 1"),
    ("cours", "created_at", "TEXT"),
    ("classe_cours", "ecole_id", "INTEGER"),
    ("classe_cours", "enseignant_id", "INTEGER"),
    ("classe_cours", "coefficient", "REAL"),
    ("classe_cours", "heures_hebdo", "REAL"),
    ("classe_cours", "created_at", "TEXT"),
];

fn migrate_legacy_columns(conn: &Connection) -> anyhow::Result<()> {
    for (table, column, decl) in LEGACY_COLUMNS {
        if table_has_column(conn, table, column)? {
            continue;
        }
        conn.execute(
            &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl),
            [],
        )?;
        info!(table, column, "added missing column");
    }

    // Older rows may hold NULLs where the current schema has defaults.
    let year = current_school_year();
    conn.execute(
        "UPDATE ecoles SET annee_scolaire_courante = ?
         WHERE annee_scolaire_courante IS NULL OR annee_scolaire_courante = ''",
        [&year],
    )?;
    conn.execute(
        "UPDATE classes
         SET annee_scolaire = COALESCE(
           (SELECT NULLIF(e.annee_scolaire_courante, '') FROM ecoles e WHERE e.id = classes.ecole_id),
           ?)
         WHERE annee_scolaire IS NULL OR annee_scolaire = ''",
        [&year],
    )?;
    conn.execute("UPDATE classes SET niveau = '' WHERE niveau IS NULL", [])?;
    conn.execute(
        "UPDATE classes SET capacite_max = 0 WHERE capacite_max IS NULL OR capacite_max < 0",
        [],
    )?;
    conn.execute("UPDATE classes SET actif = 1 WHERE actif IS NULL", [])?;
    conn.execute(
        "UPDATE cours SET coefficient = 1 WHERE coefficient IS NULL OR coefficient <= 0",
        [],
    )?;
    conn.execute(
        "UPDATE classe_cours
         SET ecole_id = (SELECT c.ecole_id FROM classes c WHERE c.id = classe_cours.classe_id)
         WHERE ecole_id IS NULL",
        [],
    )?;
    Ok(())
}

fn migrate_inscriptions_single_state(conn: &Connection) -> anyhow::Result<()> {
    if !crate::legacy::has_legacy_inscriptions(conn)? {
        return Ok(());
    }
    let summary = crate::legacy::rebuild_legacy_inscriptions(conn)?;
    if summary.dropped_orphans > 0 {
        warn!(
            dropped = summary.dropped_orphans,
            "dropped legacy enrollments pointing at missing students or classes"
        );
    }
    info!(
        migrated = summary.migrated,
        active = summary.active,
        "legacy enrollment statuses collapsed"
    );
    Ok(())
}

const DUPLICATE_MOTIF: &str = "doublon annulé lors de la migration";

fn migrate_enrollment_constraints(conn: &Connection) -> anyhow::Result<()> {
    // Keep the oldest active enrollment per student and school year.
    let cancelled = conn.execute(
        "UPDATE inscriptions
         SET etat = 'cancelled',
             motif = COALESCE(motif, ?),
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE etat = 'active'
           AND id NOT IN (
             SELECT MIN(id) FROM inscriptions WHERE etat = 'active'
             GROUP BY eleve_id, annee_scolaire
           )",
        [DUPLICATE_MOTIF],
    )?;
    if cancelled > 0 {
        warn!(cancelled, "cancelled duplicate active enrollments");
    }

    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_inscriptions_active_eleve_annee
         ON inscriptions(eleve_id, annee_scolaire) WHERE etat = 'active'",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_inscriptions_classe_etat ON inscriptions(classe_id, etat)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_inscriptions_eleve ON inscriptions(eleve_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_inscriptions_ecole ON inscriptions(ecole_id)",
        [],
    )?;

    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_inscriptions_count_insert
         AFTER INSERT ON inscriptions
         BEGIN
           UPDATE classes SET effectif_actuel = (
             SELECT COUNT(*) FROM inscriptions
             WHERE classe_id = NEW.classe_id AND etat = 'active')
           WHERE id = NEW.classe_id;
         END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_inscriptions_count_update
         AFTER UPDATE OF etat, classe_id ON inscriptions
         BEGIN
           UPDATE classes SET effectif_actuel = (
             SELECT COUNT(*) FROM inscriptions
             WHERE classe_id = OLD.classe_id AND etat = 'active')
           WHERE id = OLD.classe_id;
           UPDATE classes SET effectif_actuel = (
             SELECT COUNT(*) FROM inscriptions
             WHERE classe_id = NEW.classe_id AND etat = 'active')
           WHERE id = NEW.classe_id;
         END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_inscriptions_count_delete
         AFTER DELETE ON inscriptions
         BEGIN
           UPDATE classes SET effectif_actuel = (
             SELECT COUNT(*) FROM inscriptions
             WHERE classe_id = OLD.classe_id AND etat = 'active')
           WHERE id = OLD.classe_id;
         END",
        [],
    )?;
    // Direct writes to the counter are folded back to the aggregate.
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_classes_effectif_guard
         AFTER UPDATE OF effectif_actuel ON classes
         WHEN NEW.effectif_actuel <> (
           SELECT COUNT(*) FROM inscriptions
           WHERE classe_id = NEW.id AND etat = 'active')
         BEGIN
           UPDATE classes SET effectif_actuel = (
             SELECT COUNT(*) FROM inscriptions
             WHERE classe_id = NEW.id AND etat = 'active')
           WHERE id = NEW.id;
         END",
        [],
    )?;

    let fixed = crate::enrollment::recount(conn, None)?;
    if fixed > 0 {
        warn!(fixed, "re-aggregated drifted class counters");
    }

    let removed = conn.execute(
        "DELETE FROM classe_cours
         WHERE id NOT IN (SELECT MIN(id) FROM classe_cours GROUP BY classe_id, cours_id)",
        [],
    )?;
    if removed > 0 {
        warn!(removed, "removed duplicate subject assignments");
    }
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_classe_cours_classe_cours
         ON classe_cours(classe_id, cours_id)",
        [],
    )?;

    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_classes_ecole ON classes(ecole_id, annee_scolaire)",
        "CREATE INDEX IF NOT EXISTS idx_eleves_ecole ON eleves(ecole_id)",
        "CREATE INDEX IF NOT EXISTS idx_enseignants_ecole ON enseignants(ecole_id)",
        "CREATE INDEX IF NOT EXISTS idx_cours_ecole ON cours(ecole_id)",
        "CREATE INDEX IF NOT EXISTS idx_classe_cours_classe ON classe_cours(classe_id)",
    ] {
        conn.execute(ddl, [])?;
    }
    Ok(())
}

pub fn table_exists(conn: &Connection, table: &str) -> anyhow::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        [table],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// True only for UNIQUE and PRIMARY KEY failures, not other constraint kinds.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
