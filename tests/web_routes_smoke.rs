use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;

use scolarited::auth::Role;
use scolarited::config::ServeArgs;
use scolarited::records::schools::create_school;
use scolarited::records::students::{create_student, StudentInput};
use scolarited::records::users::{create_user, NewUser};
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

struct Fixture {
    dir: PathBuf,
    db_path: PathBuf,
    state: AppState,
    app: Router,
    students: Vec<i64>,
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn fixture(prefix: &str) -> Fixture {
    let dir = temp_dir(prefix);
    let db_path = dir.join("scolarite.sqlite3");
    let conn = db::open_db(&db_path).expect("open db");
    let school = create_school(&conn, "Collège Web", None, YEAR).expect("create school");
    for (email, role) in [
        ("admin@ecole.test", Role::Admin),
        ("prof@ecole.test", Role::Teacher),
    ] {
        create_user(
            &conn,
            &NewUser {
                email,
                name: "Compte Test",
                role,
                school_id: Some(school),
                password: PASSWORD,
            },
        )
        .expect("create user");
    }
    create_user(
        &conn,
        &NewUser {
            email: "nouveau@ecole.test",
            name: "Sans Ecole",
            role: Role::Admin,
            school_id: None,
            password: PASSWORD,
        },
    )
    .expect("create user without school");
    let students = ["Diallo", "Ndiaye"]
        .iter()
        .map(|name| {
            create_student(
                &conn,
                school,
                &StudentInput {
                    last_name: name.to_string(),
                    active: true,
                    ..Default::default()
                },
            )
            .expect("create student")
        })
        .collect();
    drop(conn);

    let config = AppConfig::new(
        &db_path,
        &ServeArgs {
            id_secret: Some("test-secret".to_string()),
            ..Default::default()
        },
    );
    let state = AppState::new(config);
    let app = create_router(state.clone());
    Fixture {
        dir,
        db_path,
        state,
        app,
        students,
    }
}

async fn send(app: &Router, req: Request<Body>) -> Response {
    app.clone().oneshot(req).await.expect("request")
}

fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut req = Request::builder().method("GET").uri(uri);
    if let Some(c) = cookie {
        req = req.header(header::COOKIE, c);
    }
    req.body(Body::empty()).expect("build request")
}

fn post(uri: &str, cookie: Option<&str>, form: &str) -> Request<Body> {
    let mut req = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(c) = cookie {
        req = req.header(header::COOKIE, c);
    }
    req.body(Body::from(form.to_string())).expect("build request")
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

async fn login(app: &Router, email: &str) -> String {
    let res = send(
        app,
        post("/login", None, &format!("email={email}&password={PASSWORD}")),
    )
    .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    let set_cookie = res
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .expect("session cookie");
    set_cookie
        .split(';')
        .next()
        .expect("cookie pair")
        .to_string()
}

fn effectif(f: &Fixture, class_id: i64) -> i64 {
    let conn = db::connect(&f.db_path).expect("connect");
    conn.query_row(
        "SELECT effectif_actuel FROM classes WHERE id = ?",
        [class_id],
        |r| r.get(0),
    )
    .expect("read counter")
}

fn class_id_from(f: &Fixture, href: &str) -> i64 {
    let token = href.trim_start_matches("/classes/");
    f.state.decode(scope::CLASS, token).expect("class token")
}

#[tokio::test]
async fn health_is_public() {
    let f = fixture("scolarite-web-health");
    let res = send(&f.app, get("/health", None)).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value =
        serde_json::from_str(&body_text(res).await).expect("health json");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "ok");
}

#[tokio::test]
async fn anonymous_requests_go_to_login() {
    let f = fixture("scolarite-web-anon");
    let res = send(&f.app, get("/classes", None)).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), "/login");

    let res = send(&f.app, get("/login", None)).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let f = fixture("scolarite-web-badlogin");
    let res = send(
        &f.app,
        post("/login", None, "email=admin@ecole.test&password=nope"),
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(res.headers().get(header::SET_COOKIE).is_none());
    assert!(body_text(res).await.contains("incorrect"));
}

#[tokio::test]
async fn admin_without_school_is_sent_to_setup() {
    let f = fixture("scolarite-web-setup");
    let cookie = login(&f.app, "nouveau@ecole.test").await;
    let res = send(&f.app, get("/classes", Some(&cookie))).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), "/setup");

    let res = send(
        &f.app,
        post("/setup", Some(&cookie), "nom=Lyc%C3%A9e+Neuf&code=&annee_scolaire=2025-2026"),
    )
    .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), "/");

    let res = send(&f.app, get("/classes", Some(&cookie))).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn class_creation_and_enrollment_flow() {
    let f = fixture("scolarite-web-flow");
    let cookie = login(&f.app, "admin@ecole.test").await;

    let res = send(&f.app, get("/", Some(&cookie))).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = send(
        &f.app,
        post(
            "/classes/new",
            Some(&cookie),
            "nom=&niveau=6e&annee_scolaire=2025-2026&capacite_max=1&actif=1",
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let res = send(
        &f.app,
        post(
            "/classes/new",
            Some(&cookie),
            "nom=6e+A&niveau=6e&annee_scolaire=2025-2026&capacite_max=1&actif=1",
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    let class_href = location(&res);
    let class_id = class_id_from(&f, &class_href);

    let first = f.state.token(scope::STUDENT, f.students[0]);
    let res = send(
        &f.app,
        post(
            &format!("{class_href}/enroll"),
            Some(&cookie),
            &format!("eleve={first}&date=2025-09-01"),
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), class_href);
    assert_eq!(effectif(&f, class_id), 1);

    let second = f.state.token(scope::STUDENT, f.students[1]);
    let res = send(
        &f.app,
        post(
            &format!("{class_href}/enroll"),
            Some(&cookie),
            &format!("eleve={second}&date=2025-09-01"),
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(effectif(&f, class_id), 1);

    let res = send(&f.app, get(&class_href, Some(&cookie))).await;
    assert_eq!(res.status(), StatusCode::OK);
    let page = body_text(res).await;
    assert!(page.contains("capacité maximale"), "{page}");
    assert!(page.contains("Diallo"));
}

#[tokio::test]
async fn teacher_role_reads_but_cannot_manage() {
    let f = fixture("scolarite-web-teacher");
    let cookie = login(&f.app, "prof@ecole.test").await;

    let res = send(&f.app, get("/classes", Some(&cookie))).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = send(
        &f.app,
        post(
            "/classes/new",
            Some(&cookie),
            "nom=6e+B&niveau=6e&annee_scolaire=2025-2026&capacite_max=0&actif=1",
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = send(&f.app, get("/eleves/new", Some(&cookie))).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let res = send(&f.app, get("/diagnostics", Some(&cookie))).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn forged_ids_are_not_found_without_leaking_internals() {
    let f = fixture("scolarite-web-notfound");
    let cookie = login(&f.app, "admin@ecole.test").await;

    let res = send(&f.app, get("/classes/1", Some(&cookie))).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body = body_text(res).await;
    assert!(!body.contains("rusqlite"));
    assert!(!body.contains("SELECT"));

    // Valid token for another scope.
    let student_token = f.state.token(scope::STUDENT, f.students[0]);
    let res = send(&f.app, get(&format!("/classes/{student_token}"), Some(&cookie))).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = send(&f.app, get("/nulle-part", Some(&cookie))).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let f = fixture("scolarite-web-logout");
    let cookie = login(&f.app, "admin@ecole.test").await;
    let res = send(&f.app, post("/logout", Some(&cookie), "")).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), "/login");

    let res = send(&f.app, get("/", Some(&cookie))).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), "/login");
}
