use chrono::NaiveDate;
use rusqlite::Connection;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use scolarited::db;
use scolarited::enrollment::{
    self, active_count, EnrollmentError, EnrollmentState,
};
use scolarited::records::classes::{create_class, get_class, ClassInput};
use scolarited::records::schools::create_school;
use scolarited::records::students::{create_student, StudentInput};

const YEAR: &str = "2025-2026";

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

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 9, d).expect("valid date")
}

fn open(prefix: &str) -> (PathBuf, Connection, i64) {
    let dir = temp_dir(prefix);
    let conn = db::open_db(&dir.join("scolarite.sqlite3")).expect("open db");
    let school = create_school(&conn, "Collège Test", None, YEAR).expect("create school");
    (dir, conn, school)
}

fn class(conn: &Connection, school: i64, name: &str, capacity: i64) -> i64 {
    create_class(
        conn,
        school,
        &ClassInput {
            name: name.to_string(),
            level: "6e".to_string(),
            school_year: YEAR.to_string(),
            capacity,
            active: true,
            ..Default::default()
        },
    )
    .expect("create class")
}

fn student(conn: &Connection, school: i64, last_name: &str) -> i64 {
    create_student(
        conn,
        school,
        &StudentInput {
            last_name: last_name.to_string(),
            first_name: "Test".to_string(),
            active: true,
            ..Default::default()
        },
    )
    .expect("create student")
}

fn cached_count(conn: &Connection, school: i64, class_id: i64) -> i64 {
    get_class(conn, school, class_id)
        .expect("get class")
        .expect("class exists")
        .enrolled
}

#[test]
fn counter_follows_enroll_withdraw_and_cancel() {
    let (dir, mut conn, school) = open("scolarite-transitions-counter");
    let c = class(&conn, school, "6e A", 0);
    let a = student(&conn, school, "Diallo");
    let b = student(&conn, school, "Ndiaye");

    let ea = enrollment::enroll(&mut conn, school, a, c, day(1)).expect("enroll a");
    let eb = enrollment::enroll(&mut conn, school, b, c, day(1)).expect("enroll b");
    assert_eq!(ea.state, EnrollmentState::Active);
    assert_eq!(ea.school_year, YEAR);
    assert_eq!(cached_count(&conn, school, c), 2);

    let w = enrollment::withdraw(&mut conn, school, ea.id, day(10), Some("déménagement"))
        .expect("withdraw a");
    assert_eq!(w.state, EnrollmentState::Withdrawn);
    assert_eq!(w.left_on.as_deref(), Some("2025-09-10"));
    assert_eq!(w.reason.as_deref(), Some("déménagement"));
    assert_eq!(cached_count(&conn, school, c), 1);

    enrollment::cancel(&mut conn, school, eb.id, day(11), None).expect("cancel b");
    assert_eq!(cached_count(&conn, school, c), 0);
    assert_eq!(active_count(&conn, c).expect("active count"), 0);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn second_active_enrollment_for_the_year_is_refused() {
    let (dir, mut conn, school) = open("scolarite-transitions-duplicate");
    let c1 = class(&conn, school, "6e A", 0);
    let c2 = class(&conn, school, "6e B", 0);
    let s = student(&conn, school, "Sow");

    enrollment::enroll(&mut conn, school, s, c1, day(1)).expect("first enroll");

    let same = enrollment::enroll(&mut conn, school, s, c1, day(2)).expect_err("same class");
    assert!(matches!(same, EnrollmentError::DuplicateEnrollment));

    let other = enrollment::enroll(&mut conn, school, s, c2, day(2)).expect_err("other class");
    match other {
        EnrollmentError::AlreadyEnrolled { class_name, school_year } => {
            assert_eq!(class_name, "6e A");
            assert_eq!(school_year, YEAR);
        }
        e => panic!("unexpected error: {e:?}"),
    }
    assert_eq!(cached_count(&conn, school, c1), 1);
    assert_eq!(cached_count(&conn, school, c2), 0);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn full_class_refuses_and_keeps_its_count() {
    let (dir, mut conn, school) = open("scolarite-transitions-capacity");
    let c = class(&conn, school, "CM2", 2);
    for name in ["Ba", "Fall"] {
        let s = student(&conn, school, name);
        enrollment::enroll(&mut conn, school, s, c, day(1)).expect("enroll within capacity");
    }
    let third = student(&conn, school, "Gueye");
    let err = enrollment::enroll(&mut conn, school, third, c, day(1)).expect_err("class is full");
    assert!(matches!(err, EnrollmentError::CapacityExceeded { capacity: 2 }));
    assert_eq!(err.code(), "capacity_exceeded");
    assert_eq!(cached_count(&conn, school, c), 2);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn zero_capacity_means_unlimited() {
    let (dir, mut conn, school) = open("scolarite-transitions-unlimited");
    let c = class(&conn, school, "Terminale", 0);
    for i in 0..5 {
        let s = student(&conn, school, &format!("Eleve{i}"));
        enrollment::enroll(&mut conn, school, s, c, day(1)).expect("enroll");
    }
    assert_eq!(cached_count(&conn, school, c), 5);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn reassign_moves_the_student_atomically() {
    let (dir, mut conn, school) = open("scolarite-transitions-reassign");
    let from = class(&conn, school, "5e A", 0);
    let to = class(&conn, school, "5e B", 1);
    let s = student(&conn, school, "Kane");
    enrollment::enroll(&mut conn, school, s, from, day(1)).expect("enroll");

    let moved = enrollment::reassign(&mut conn, school, s, to, day(15), None).expect("reassign");
    let withdrawn = moved.withdrawn.expect("previous enrollment closed");
    assert_eq!(withdrawn.class_id, from);
    assert_eq!(withdrawn.state, EnrollmentState::Withdrawn);
    assert_eq!(withdrawn.reason.as_deref(), Some("changement de classe"));
    assert_eq!(moved.enrolled.class_id, to);
    assert_eq!(cached_count(&conn, school, from), 0);
    assert_eq!(cached_count(&conn, school, to), 1);

    // The target is now full: the move back must leave everything untouched.
    let other = student(&conn, school, "Cisse");
    enrollment::enroll(&mut conn, school, other, from, day(1)).expect("enroll other");
    let err = enrollment::reassign(&mut conn, school, other, to, day(20), None)
        .expect_err("target full");
    assert!(matches!(err, EnrollmentError::CapacityExceeded { .. }));
    let still = enrollment::active_enrollment_for_year(&conn, school, other, YEAR)
        .expect("lookup")
        .expect("still enrolled");
    assert_eq!(still.class_id, from);
    assert_eq!(cached_count(&conn, school, from), 1);
    assert_eq!(cached_count(&conn, school, to), 1);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn only_active_enrollments_can_be_closed() {
    let (dir, mut conn, school) = open("scolarite-transitions-not-active");
    let c = class(&conn, school, "4e", 0);
    let s = student(&conn, school, "Sy");
    let e = enrollment::enroll(&mut conn, school, s, c, day(1)).expect("enroll");
    enrollment::withdraw(&mut conn, school, e.id, day(2), None).expect("withdraw");

    let again = enrollment::withdraw(&mut conn, school, e.id, day(3), None).expect_err("twice");
    assert!(matches!(
        again,
        EnrollmentError::NotActive { state: EnrollmentState::Withdrawn }
    ));
    let cancel = enrollment::cancel(&mut conn, school, e.id, day(3), None).expect_err("cancel");
    assert!(matches!(cancel, EnrollmentError::NotActive { .. }));

    let missing = enrollment::withdraw(&mut conn, school, 9999, day(3), None).expect_err("missing");
    assert!(matches!(missing, EnrollmentError::EnrollmentNotFound));

    // A withdrawn student can be enrolled again for the same year.
    enrollment::enroll(&mut conn, school, s, c, day(5)).expect("re-enroll");
    assert_eq!(cached_count(&conn, school, c), 1);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn inactive_class_or_student_cannot_be_enrolled() {
    let (dir, mut conn, school) = open("scolarite-transitions-inactive");
    let c = class(&conn, school, "3e", 0);
    let s = student(&conn, school, "Mbaye");
    conn.execute("UPDATE eleves SET actif = 0 WHERE id = ?", [s])
        .expect("archive student");
    let err = enrollment::enroll(&mut conn, school, s, c, day(1)).expect_err("archived student");
    assert!(matches!(err, EnrollmentError::StudentInactive));

    let s2 = student(&conn, school, "Faye");
    conn.execute("UPDATE classes SET actif = 0 WHERE id = ?", [c])
        .expect("archive class");
    let err = enrollment::enroll(&mut conn, school, s2, c, day(1)).expect_err("archived class");
    assert!(matches!(err, EnrollmentError::ClassInactive));

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn other_school_records_are_invisible() {
    let (dir, mut conn, school) = open("scolarite-transitions-tenant");
    let other_school = create_school(&conn, "Autre", None, YEAR).expect("second school");
    let c = class(&conn, other_school, "6e A", 0);
    let s = student(&conn, school, "Niang");

    let err = enrollment::enroll(&mut conn, school, s, c, day(1)).expect_err("foreign class");
    assert!(matches!(err, EnrollmentError::ClassNotFound));

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn recount_repairs_drifted_counters() {
    let (dir, mut conn, school) = open("scolarite-transitions-recount");
    let c = class(&conn, school, "2nde", 0);
    let s = student(&conn, school, "Toure");
    enrollment::enroll(&mut conn, school, s, c, day(1)).expect("enroll");

    // Bypass the triggers to simulate drift from an external tool.
    conn.execute_batch("DROP TRIGGER trg_classes_effectif_guard")
        .expect("drop guard");
    conn.execute("UPDATE classes SET effectif_actuel = 7 WHERE id = ?", [c])
        .expect("corrupt counter");
    let counts = enrollment::class_counts(&conn, school).expect("class counts");
    assert!(!counts[0].is_consistent());

    let fixed = enrollment::recount(&conn, Some(school)).expect("recount");
    assert_eq!(fixed, 1);
    assert_eq!(cached_count(&conn, school, c), 1);
    assert_eq!(enrollment::recount(&conn, None).expect("recount again"), 0);

    let _ = std::fs::remove_dir_all(dir);
}
