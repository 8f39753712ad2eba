use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Extension, Form, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AppError, Result};
use crate::records::{schools, users};
use crate::school_year::current_school_year;
use crate::session::FlashKind;
use crate::web::forms::{self, FormErrors};
use crate::web::guard::{self, RequestContext, SessionContext};
use crate::web::handlers::current_year;
use crate::web::html::{self, Page};
use crate::AppState;

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/login", get(login_form).post(login))
        .route("/logout", post(logout))
}

pub fn setup_routes() -> Router<AppState> {
    Router::new().route("/setup", get(setup_form).post(setup))
}

pub fn read_routes() -> Router<AppState> {
    Router::new().route("/", get(dashboard))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let database = state
        .db(|conn| {
            conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
            Ok(())
        })
        .await;
    Json(json!({
        "status": if database.is_ok() { "healthy" } else { "degraded" },
        "service": "scolarited",
        "version": env!("CARGO_PKG_VERSION"),
        "database": if database.is_ok() { "ok" } else { "unavailable" },
        "sessions": {
            "active": state.sessions.len(),
        }
    }))
}

// ---------------------------------------------------------------------------
// Login / logout
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

fn login_page(email: &str, error: Option<&str>) -> Page {
    let mut page = Page::public("Connexion");
    page.heading("Connexion");
    if let Some(error) = error {
        page.alert(error);
    }
    page.push(html::form_start("/login"))
        .push(html::input("email", "email", "Adresse e-mail", email, None))
        .push(html::input("password", "password", "Mot de passe", "", None))
        .push(html::form_end("Se connecter", None));
    page
}

async fn login_form(State(state): State<AppState>, headers: axum::http::HeaderMap) -> Response {
    let signed_in = guard::session_id_from_headers(&headers)
        .and_then(|id| state.sessions.get(&id))
        .is_some();
    if signed_in {
        return Redirect::to("/").into_response();
    }
    login_page("", None).into_response()
}

async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Result<Response> {
    let email = form.email.trim().to_lowercase();
    let password = form.password;
    let lookup_email = email.clone();
    let user = state
        .db(move |conn| Ok(users::verify_login(conn, &lookup_email, &password)?))
        .await?;

    let Some(user) = user else {
        tracing::warn!(email = %email, "login failed");
        return Ok(login_page(&email, Some("Adresse e-mail ou mot de passe incorrect."))
            .with_status(axum::http::StatusCode::UNAUTHORIZED));
    };

    tracing::info!(user_id = user.user_id, role = user.role.as_str(), "login");
    let target = if user.school_id.is_some() { "/" } else { "/setup" };
    let session = state.sessions.create(user);
    let cookie = guard::session_cookie(&session.id, state.config.secure_cookies);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Redirect::to(target),
    )
        .into_response())
}

async fn logout(State(state): State<AppState>, headers: axum::http::HeaderMap) -> Response {
    if let Some(id) = guard::session_id_from_headers(&headers) {
        state.sessions.delete(&id);
    }
    (
        [(header::SET_COOKIE, guard::clear_session_cookie(state.config.secure_cookies))],
        Redirect::to("/login"),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// School setup
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SetupForm {
    pub nom: String,
    pub code: String,
    pub annee_scolaire: String,
}

fn setup_page(ctx: &SessionContext, form: &SetupForm, errors: &FormErrors) -> Page {
    let mut page = Page::public("Configuration de l'établissement");
    page.heading("Configuration de l'établissement");
    page.push(format!(
        "<p>Bienvenue {}. Renseignez votre établissement pour commencer.</p>\n",
        html::escape(&ctx.user.name)
    ));
    page.push(html::form_start("/setup"))
        .push(html::input("text", "nom", "Nom de l'établissement", &form.nom, errors.get("nom")))
        .push(html::input("text", "code", "Code", &form.code, errors.get("code")))
        .push(html::input(
            "text",
            "annee_scolaire",
            "Année scolaire en cours",
            &form.annee_scolaire,
            errors.get("annee_scolaire"),
        ))
        .push(html::form_end("Enregistrer", None));
    page
}

async fn setup_form(Extension(ctx): Extension<SessionContext>) -> Response {
    if ctx.user.school_id.is_some() {
        return Redirect::to("/").into_response();
    }
    let form = SetupForm {
        annee_scolaire: current_school_year(),
        ..Default::default()
    };
    setup_page(&ctx, &form, &FormErrors::new()).into_response()
}

async fn setup(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Form(form): Form<SetupForm>,
) -> Result<Response> {
    if ctx.user.school_id.is_some() {
        return Ok(Redirect::to("/").into_response());
    }
    let mut errors = FormErrors::new();
    let name = forms::required(&mut errors, "nom", &form.nom);
    let year = forms::school_year(&mut errors, "annee_scolaire", &form.annee_scolaire);
    let code = forms::optional(&form.code);
    if !errors.is_empty() {
        return Ok(setup_page(&ctx, &form, &errors)
            .with_status(axum::http::StatusCode::UNPROCESSABLE_ENTITY));
    }

    let user_id = ctx.user.user_id;
    let school_id = state
        .db(move |conn| {
            let tx = conn.transaction()?;
            let id = schools::create_school(&tx, &name, code.as_deref(), &year)?;
            users::attach_school(&tx, user_id, id)?;
            tx.commit()?;
            Ok(id)
        })
        .await?;
    tracing::info!(school_id, user_id, "school configured");
    ctx.session.set_school(school_id);
    ctx.session
        .flash(FlashKind::Success, "Établissement enregistré.");
    Ok(Redirect::to("/").into_response())
}

// ---------------------------------------------------------------------------
// Dashboard
// ---------------------------------------------------------------------------

async fn dashboard(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response> {
    let school_id = ctx.school_id;
    let (school, year, counts) = state
        .db(move |conn| {
            let school = schools::get_school(conn, school_id)?
                .ok_or_else(|| AppError::not_found("Établissement"))?;
            let year = current_year(conn, school_id)?;
            let counts = schools::dashboard_counts(conn, school_id, &year)?;
            Ok((school, year, counts))
        })
        .await?;

    let mut page = Page::new("Tableau de bord", &ctx);
    page.heading(&school.name);
    page.push(format!(
        "<p>Année scolaire {}</p>\n",
        html::escape(&year)
    ));
    let cards = [
        ("Classes", counts.classes, "/classes"),
        ("Élèves actifs", counts.students, "/eleves"),
        ("Inscriptions actives", counts.active_enrollments, "/inscriptions"),
        ("Matières", counts.subjects, "/matieres"),
        ("Enseignants", counts.teachers, "/enseignants"),
        ("Classes complètes", counts.full_classes, "/classes"),
    ];
    page.push("<div class=\"cards\">\n");
    for (label, value, href) in cards {
        page.push(format!(
            "<a class=\"card\" href=\"{href}\"><strong>{value}</strong>{}</a>\n",
            html::escape(label)
        ));
    }
    page.push("</div>\n");
    Ok(page.into_response())
}
