use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::NaiveDate;
use rusqlite::Connection;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;

use scolarited::auth::Role;
use scolarited::config::ServeArgs;
use scolarited::enrollment;
use scolarited::error::AppError;
use scolarited::records::assignments::{create_assignment, AssignmentInput};
use scolarited::records::classes::{create_class, ClassInput};
use scolarited::records::schools::create_school;
use scolarited::records::students::{create_student, StudentInput};
use scolarited::records::subjects::{create_subject, SubjectInput};
use scolarited::records::users::{create_user, verify_login, NewUser};
use scolarited::secure_id::scope;
use scolarited::{create_router, db, AppConfig, AppState};

const YEAR: &str = "2025-2026";
const PASSWORD: &str = "motdepasse-solide";

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

struct Fixture {
    dir: PathBuf,
    db_path: PathBuf,
    school: i64,
    state: AppState,
    app: Router,
    cookie: String,
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

impl Fixture {
    fn conn(&self) -> Connection {
        db::connect(&self.db_path).expect("connect")
    }

    fn count(&self, sql: &str) -> i64 {
        self.conn()
            .query_row(sql, [], |r| r.get(0))
            .expect("count rows")
    }

    fn class(&self, name: &str, capacity: i64) -> i64 {
        create_class(
            &self.conn(),
            self.school,
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

    fn student(&self, last_name: &str) -> i64 {
        create_student(
            &self.conn(),
            self.school,
            &StudentInput {
                last_name: last_name.to_string(),
                first_name: "Awa".to_string(),
                active: true,
                ..Default::default()
            },
        )
        .expect("create student")
    }

    fn subject(&self, code: &str, name: &str) -> i64 {
        create_subject(
            &self.conn(),
            self.school,
            &SubjectInput {
                code: Some(code.to_string()),
                name: name.to_string(),
                ..Default::default()
            },
        )
        .expect("create subject")
    }

    fn enroll(&self, student_id: i64, class_id: i64) -> i64 {
        enrollment::enroll(&mut self.conn(), self.school, student_id, class_id, day(1))
            .expect("enroll")
            .id
    }

    async fn send(&self, req: Request<Body>) -> Response {
        self.app.clone().oneshot(req).await.expect("request")
    }

    async fn get(&self, uri: &str) -> Response {
        let req = Request::builder()
            .method("GET")
            .uri(uri)
            .header(header::COOKIE, &self.cookie)
            .body(Body::empty())
            .expect("build request");
        self.send(req).await
    }

    async fn post(&self, uri: &str, form: &str) -> Response {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::COOKIE, &self.cookie)
            .body(Body::from(form.to_string()))
            .expect("build request");
        self.send(req).await
    }
}

async fn fixture(prefix: &str) -> Fixture {
    let dir = temp_dir(prefix);
    let db_path = dir.join("scolarite.sqlite3");
    let conn = db::open_db(&db_path).expect("open db");
    let school = create_school(&conn, "Collège Règles", None, YEAR).expect("create school");
    create_user(
        &conn,
        &NewUser {
            email: "admin@ecole.test",
            name: "Admin",
            role: Role::Admin,
            school_id: Some(school),
            password: PASSWORD,
        },
    )
    .expect("create admin");
    drop(conn);

    let state = AppState::new(AppConfig::new(
        &db_path,
        &ServeArgs {
            id_secret: Some("rules-secret".to_string()),
            ..Default::default()
        },
    ));
    let app = create_router(state.clone());
    let req = Request::builder()
        .method("POST")
        .uri("/login")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!("email=admin@ecole.test&password={PASSWORD}")))
        .expect("build login");
    let res = app.clone().oneshot(req).await.expect("login");
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    let cookie = res
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .expect("session cookie")
        .to_string();

    Fixture {
        dir,
        db_path,
        school,
        state,
        app,
        cookie,
    }
}

fn location(res: &Response) -> String {
    res.headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn body_text(res: Response) -> String {
    let bytes = to_bytes(res.into_body(), usize::MAX).await.expect("read body");
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn class_with_active_enrollments_is_not_deleted() {
    let f = fixture("scolarite-rules-class-delete").await;
    let class_id = f.class("6e A", 0);
    let enrollment_id = f.enroll(f.student("Diallo"), class_id);
    let href = format!("/classes/{}", f.state.token(scope::CLASS, class_id));

    let res = f.post(&format!("{href}/delete"), "").await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), href);
    let page = body_text(f.get(&href).await).await;
    assert!(page.contains("compte encore 1"), "{page}");
    assert_eq!(f.count("SELECT COUNT(*) FROM classes"), 1);
    assert_eq!(f.count("SELECT COUNT(*) FROM inscriptions WHERE etat = 'active'"), 1);

    enrollment::withdraw(&mut f.conn(), f.school, enrollment_id, day(2), None).expect("withdraw");
    let res = f.post(&format!("{href}/delete"), "").await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), "/classes");
    assert_eq!(f.count("SELECT COUNT(*) FROM classes"), 0);
    assert_eq!(f.count("SELECT COUNT(*) FROM inscriptions"), 0);
}

#[tokio::test]
async fn assigned_subject_is_not_deleted_and_assignments_are_unique() {
    let f = fixture("scolarite-rules-subject").await;
    let class_id = f.class("5e B", 0);
    let subject_id = f.subject("MATH", "Mathématiques");
    let class_href = format!("/classes/{}", f.state.token(scope::CLASS, class_id));
    let subject_token = f.state.token(scope::SUBJECT, subject_id);

    let res = f
        .post(&format!("{class_href}/assign"), &format!("matiere={subject_token}&coefficient=3"))
        .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);

    let res = f
        .post(&format!("{class_href}/assign"), &format!("matiere={subject_token}"))
        .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_text(res).await.contains("déjà affectée à la classe"));
    assert_eq!(f.count("SELECT COUNT(*) FROM classe_cours"), 1);

    let subject_href = format!("/matieres/{subject_token}");
    let res = f.post(&format!("{subject_href}/delete"), "").await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), subject_href);
    let page = body_text(f.get(&subject_href).await).await;
    assert!(page.contains("affectée à 1 classe"), "{page}");
    assert!(page.contains("5e B"));
    assert_eq!(f.count("SELECT COUNT(*) FROM cours"), 1);

    let assignment_id = f.count("SELECT id FROM classe_cours");
    let token = f.state.token(scope::ASSIGNMENT, assignment_id);
    let res = f.post(&format!("/affectations/{token}/delete"), "").await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    let res = f.post(&format!("{subject_href}/delete"), "").await;
    assert_eq!(location(&res), "/matieres");
    assert_eq!(f.count("SELECT COUNT(*) FROM cours"), 0);
}

#[tokio::test]
async fn subject_code_and_name_are_unique_per_school() {
    let f = fixture("scolarite-rules-subject-unique").await;
    let res = f
        .post(
            "/matieres/new",
            "code=math&nom=Math%C3%A9matiques&coefficient=2&bareme=20&actif=1",
        )
        .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);

    let res = f
        .post("/matieres/new", "code=MATH&nom=Alg%C3%A8bre&coefficient=1&bareme=20&actif=1")
        .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_text(res).await.contains("Le code MATH est déjà utilisé"));

    let res = f
        .post(
            "/matieres/new",
            "code=ALG&nom=math%C3%A9matiques&coefficient=1&bareme=20&actif=1",
        )
        .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_text(res).await.contains("existe déjà"));

    assert_eq!(f.count("SELECT COUNT(*) FROM cours"), 1);
}

#[tokio::test]
async fn matricule_is_unique_per_school() {
    let f = fixture("scolarite-rules-matricule").await;
    let res = f
        .post("/eleves/new", "matricule=M-001&nom=Fall&prenom=Awa&actif=1")
        .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);

    let res = f
        .post("/eleves/new", "matricule=M-001&nom=Ba&prenom=Omar&actif=1")
        .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_text(res).await.contains("Le matricule M-001 est déjà attribué"));
    assert_eq!(f.count("SELECT COUNT(*) FROM eleves"), 1);
}

#[tokio::test]
async fn class_edit_checks_the_live_count_and_locks_the_year() {
    let f = fixture("scolarite-rules-class-edit").await;
    let class_id = f.class("4e C", 0);
    f.enroll(f.student("Diop"), class_id);
    f.enroll(f.student("Sarr"), class_id);
    let href = format!("/classes/{}", f.state.token(scope::CLASS, class_id));

    // A stale cached counter must not let the capacity drop below the real count.
    let conn = f.conn();
    conn.execute_batch("DROP TRIGGER trg_classes_effectif_guard")
        .expect("drop guard");
    conn.execute("UPDATE classes SET effectif_actuel = 0 WHERE id = ?", [class_id])
        .expect("stale counter");
    drop(conn);

    let res = f
        .post(
            &format!("{href}/edit"),
            "nom=4e+C&niveau=4e&annee_scolaire=2025-2026&capacite_max=1&actif=1",
        )
        .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_text(res).await.contains("effectif actuel (2)"));

    let res = f
        .post(
            &format!("{href}/edit"),
            "nom=4e+C&niveau=4e&annee_scolaire=2026-2027&capacite_max=0&actif=1",
        )
        .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_text(res).await.contains("ne peut plus changer"));

    let (capacity, year): (i64, String) = f
        .conn()
        .query_row(
            "SELECT capacite_max, annee_scolaire FROM classes WHERE id = ?",
            [class_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("read class");
    assert_eq!(capacity, 0);
    assert_eq!(year, YEAR);

    let res = f
        .post(
            &format!("{href}/edit"),
            "nom=4e+C&niveau=4e&annee_scolaire=2025-2026&capacite_max=2&actif=1",
        )
        .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(f.count("SELECT capacite_max FROM classes"), 2);
}

#[tokio::test]
async fn enrolled_student_cannot_be_archived() {
    let f = fixture("scolarite-rules-archive").await;
    let class_id = f.class("3e D", 0);
    let student_id = f.student("Ndiaye");
    let enrollment_id = f.enroll(student_id, class_id);
    let href = format!("/eleves/{}", f.state.token(scope::STUDENT, student_id));

    // No `actif` field: the checkbox is unticked.
    let res = f.post(&format!("{href}/edit"), "nom=Ndiaye&prenom=Awa").await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_text(res).await.contains("a une inscription active"));
    assert_eq!(f.count("SELECT actif FROM eleves"), 1);

    enrollment::withdraw(&mut f.conn(), f.school, enrollment_id, day(3), None).expect("withdraw");
    let res = f.post(&format!("{href}/edit"), "nom=Ndiaye&prenom=Awa").await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(f.count("SELECT actif FROM eleves"), 0);
}

#[tokio::test]
async fn teachers_are_created_and_shown_on_assignments() {
    let f = fixture("scolarite-rules-teachers").await;
    let res = f
        .post(
            "/enseignants/new",
            "nom=Sow&prenom=Ali&email=Sow%40ecole.test&specialite=Maths&actif=1",
        )
        .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), "/enseignants");

    let res = f
        .post("/enseignants/new", "nom=Kane&email=sow%40ecole.test&actif=1")
        .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_text(res).await.contains("déjà utilisée"));
    assert_eq!(f.count("SELECT COUNT(*) FROM enseignants"), 1);

    let page = body_text(f.get("/enseignants").await).await;
    assert!(page.contains("Sow"), "{page}");

    let teacher_id = f.count("SELECT id FROM enseignants");
    let class_id = f.class("CM2", 0);
    let subject_id = f.subject("FR", "Français");
    let class_href = format!("/classes/{}", f.state.token(scope::CLASS, class_id));
    let res = f
        .post(
            &format!("{class_href}/assign"),
            &format!(
                "matiere={}&enseignant={}&heures_hebdo=4",
                f.state.token(scope::SUBJECT, subject_id),
                f.state.token(scope::TEACHER, teacher_id)
            ),
        )
        .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    let page = body_text(f.get(&class_href).await).await;
    assert!(page.contains("Français"));
    assert!(page.contains("Sow Ali"));
}

#[tokio::test]
async fn only_duplicate_assignments_count_as_conflicts() {
    let f = fixture("scolarite-rules-assign-errors").await;
    let class_id = f.class("CE1", 0);
    let subject_id = f.subject("HG", "Histoire-Géographie");
    let conn = f.conn();
    let input = AssignmentInput {
        subject_id,
        teacher_id: None,
        coefficient_override: None,
        weekly_hours: Some(2.0),
    };
    create_assignment(&conn, f.school, class_id, &input).expect("first assignment");
    let err = create_assignment(&conn, f.school, class_id, &input).expect_err("duplicate");
    assert!(matches!(err, AppError::Conflict(_)), "{err:?}");

    let missing_subject = AssignmentInput {
        subject_id: 9_999,
        ..input
    };
    let err = create_assignment(&conn, f.school, class_id, &missing_subject)
        .expect_err("unknown subject");
    assert!(matches!(err, AppError::Database(_)), "{err:?}");
}

#[tokio::test]
async fn stored_passwords_are_argon2_phc_strings() {
    let f = fixture("scolarite-rules-passwords").await;
    let conn = f.conn();
    let stored: String = conn
        .query_row(
            "SELECT mot_de_passe_hash FROM utilisateurs WHERE email = 'admin@ecole.test'",
            [],
            |r| r.get(0),
        )
        .expect("read hash");
    assert!(stored.starts_with("$argon2id$"), "{stored}");
    assert!(!stored.contains(PASSWORD));

    let user = verify_login(&conn, "Admin@Ecole.test", PASSWORD)
        .expect("verify")
        .expect("user");
    assert_eq!(user.role, Role::Admin);
    assert!(verify_login(&conn, "admin@ecole.test", "motdepasse-faux")
        .expect("verify")
        .is_none());
}
