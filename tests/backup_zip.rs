use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use scolarited::{backup, db};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn seeded_db(dir: &PathBuf) -> PathBuf {
    let path = dir.join("scolarite.sqlite3");
    let conn = db::open_db(&path).expect("open db");
    conn.execute(
        "INSERT INTO ecoles(nom, annee_scolaire_courante) VALUES('Ecole Sauvegarde', '2025-2026')",
        [],
    )
    .expect("seed school");
    path
}

fn school_names(path: &PathBuf) -> Vec<String> {
    let conn = db::connect(path).expect("connect");
    let mut stmt = conn.prepare("SELECT nom FROM ecoles ORDER BY id").expect("prepare");
    let names = stmt
        .query_map([], |r| r.get(0))
        .expect("query")
        .collect::<Result<Vec<String>, _>>()
        .expect("collect");
    names
}

#[test]
fn zip_export_and_restore_roundtrip() {
    let src = temp_dir("scolarite-backup-src");
    let dst = temp_dir("scolarite-backup-dst");
    let out_dir = temp_dir("scolarite-backup-out");
    let db_src = seeded_db(&src);

    let bundle_path = out_dir.join("scolarite.backup.zip");
    let export = backup::export_database_bundle(&db_src, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.sha256.len(), 64);
    assert!(export.size_bytes > 0);
    assert!(!out_dir.join("scolarite.backup.zip.snapshot").exists());

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest).expect("manifest json");
    assert_eq!(manifest["format"], backup::BUNDLE_FORMAT_V1);
    assert_eq!(manifest["sha256"], export.sha256.as_str());
    archive
        .by_name("db/scolarite.sqlite3")
        .expect("database entry in bundle");

    let db_dst = dst.join("scolarite.sqlite3");
    let import = backup::restore_database_bundle(&bundle_path, &db_dst).expect("restore bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);
    assert_eq!(school_names(&db_dst), vec!["Ecole Sauvegarde".to_string()]);
    assert!(!dst.join("scolarite.sqlite3.restoring").exists());

    let _ = std::fs::remove_dir_all(src);
    let _ = std::fs::remove_dir_all(dst);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn bare_sqlite_file_can_be_restored() {
    let src = temp_dir("scolarite-backup-bare-src");
    let dst = temp_dir("scolarite-backup-bare-dst");
    let db_src = seeded_db(&src);

    let db_dst = dst.join("scolarite.sqlite3");
    std::fs::write(&db_dst, b"previous contents").expect("write stale target");
    let import = backup::restore_database_bundle(&db_src, &db_dst).expect("restore sqlite file");
    assert_eq!(import.bundle_format_detected, "sqlite3");
    assert_eq!(school_names(&db_dst), vec!["Ecole Sauvegarde".to_string()]);

    let _ = std::fs::remove_dir_all(src);
    let _ = std::fs::remove_dir_all(dst);
}

#[test]
fn tampered_bundle_is_rejected_and_target_kept() {
    let src = temp_dir("scolarite-backup-tamper-src");
    let dst = temp_dir("scolarite-backup-tamper-dst");
    let out_dir = temp_dir("scolarite-backup-tamper-out");
    let db_src = seeded_db(&src);

    let bundle_path = out_dir.join("tampered.zip");
    {
        let manifest = serde_json::json!({
            "format": backup::BUNDLE_FORMAT_V1,
            "version": 1,
            "sha256": "00".repeat(32),
        });
        let mut zip = zip::ZipWriter::new(File::create(&bundle_path).expect("create zip"));
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest entry");
        zip.write_all(manifest.to_string().as_bytes())
            .expect("write manifest");
        zip.start_file("db/scolarite.sqlite3", opts).expect("db entry");
        zip.write_all(&std::fs::read(&db_src).expect("read db"))
            .expect("write db");
        zip.finish().expect("finish zip");
    }

    let db_dst = dst.join("scolarite.sqlite3");
    std::fs::write(&db_dst, b"keep me").expect("write target");
    let err = backup::restore_database_bundle(&bundle_path, &db_dst).expect_err("digest mismatch");
    assert!(err.to_string().contains("digest mismatch"), "{err}");
    assert_eq!(std::fs::read(&db_dst).expect("read target"), b"keep me");

    let _ = std::fs::remove_dir_all(src);
    let _ = std::fs::remove_dir_all(dst);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn unknown_files_are_rejected() {
    let dir = temp_dir("scolarite-backup-unknown");
    let junk = dir.join("notes.txt");
    std::fs::write(&junk, b"not a backup").expect("write junk");
    let err = backup::restore_database_bundle(&junk, &dir.join("scolarite.sqlite3"))
        .expect_err("junk input");
    assert!(err.to_string().contains("neither"), "{err}");

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn snapshot_to_dir_skips_missing_database() {
    let dir = temp_dir("scolarite-backup-snapshot");
    let missing = dir.join("absent.sqlite3");
    let out = backup::snapshot_to_dir(&missing, &dir.join("snapshots")).expect("snapshot");
    assert!(out.is_none());

    let db_path = seeded_db(&dir);
    let out = backup::snapshot_to_dir(&db_path, &dir.join("snapshots"))
        .expect("snapshot")
        .expect("snapshot written");
    assert!(out.is_file());
    assert!(out.file_name().unwrap_or_default().to_string_lossy().starts_with("scolarite-"));

    let _ = std::fs::remove_dir_all(dir);
}
