use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

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

fn run(db: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_scolarited"))
        .arg("--database")
        .arg(db)
        .args(args)
        .env_remove("SCOLARITE_DATABASE")
        .env_remove("RUST_LOG")
        .output()
        .expect("run scolarited")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

#[test]
fn migrate_then_check_a_fresh_database() {
    let dir = temp_dir("scolarite-cli-migrate");
    let db = dir.join("scolarite.sqlite3");

    let out = run(&db, &["migrate"]);
    assert!(out.status.success(), "{:?}", out);
    assert!(stdout(&out).contains("applied base_schema"));

    let out = run(&db, &["migrate"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("schema up to date"));

    let out = run(&db, &["check"]);
    assert!(out.status.success(), "{:?}", out);
    assert!(stdout(&out).contains("ok"));

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn create_user_validates_role_and_password() {
    let dir = temp_dir("scolarite-cli-user");
    let db = dir.join("scolarite.sqlite3");

    let out = run(
        &db,
        &[
            "create-user",
            "--email",
            "admin@ecole.test",
            "--name",
            "Admin",
            "--password",
            "motdepasse-solide",
        ],
    );
    assert!(out.status.success(), "{:?}", out);
    assert!(stdout(&out).contains("created"));

    let out = run(
        &db,
        &[
            "create-user",
            "--email",
            "x@ecole.test",
            "--name",
            "X",
            "--role",
            "concierge",
            "--password",
            "motdepasse-solide",
        ],
    );
    assert!(!out.status.success());

    let out = run(
        &db,
        &[
            "create-user",
            "--email",
            "y@ecole.test",
            "--name",
            "Y",
            "--password",
            "court",
        ],
    );
    assert!(!out.status.success());

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn backup_and_restore_through_the_cli() {
    let dir = temp_dir("scolarite-cli-backup");
    let db = dir.join("scolarite.sqlite3");
    let bundle = dir.join("out").join("backup.zip");
    let restored = dir.join("restored.sqlite3");

    assert!(run(&db, &["migrate"]).status.success());
    let out = run(&db, &["backup", "--out", bundle.to_str().expect("utf-8 path")]);
    assert!(out.status.success(), "{:?}", out);
    assert!(bundle.is_file());

    let out = run(
        &restored,
        &["restore", "--from", bundle.to_str().expect("utf-8 path")],
    );
    assert!(out.status.success(), "{:?}", out);
    assert!(restored.is_file());

    let out = run(&restored, &["recount"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("0 class counter(s) corrected"));

    let _ = std::fs::remove_dir_all(dir);
}
