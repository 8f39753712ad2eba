use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Form, Router,
};
use serde::Deserialize;

use crate::enrollment::{self, get_enrollment, EnrollmentState};
use crate::error::{AppError, Result};
use crate::records::classes::{list_classes, ClassFilter};
use crate::records::enrollments::{list_enrollments, EnrollmentFilter};
use crate::records::students::list_unenrolled;
use crate::secure_id::scope;
use crate::session::FlashKind;
use crate::web::forms::{self, FormErrors};
use crate::web::guard::RequestContext;
use crate::web::handlers::classes::class_href;
use crate::web::handlers::students::student_href;
use crate::web::handlers::{current_year, flash_or_fail, today};
use crate::web::html::{self, Page};
use crate::AppState;

pub fn read_routes() -> Router<AppState> {
    Router::new().route("/inscriptions", get(list))
}

pub fn staff_routes() -> Router<AppState> {
    Router::new()
        .route("/inscriptions/new", get(new_form).post(create))
        .route("/inscriptions/:id/withdraw", post(withdraw))
        .route("/inscriptions/:id/cancel", post(cancel))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub etat: Option<String>,
    pub classe: Option<String>,
    pub annee: Option<String>,
}

async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let school_id = ctx.school_id;
    // Default view: active enrollments of the current year.
    let etat = query.etat.clone().unwrap_or_else(|| "active".to_string());
    let filter_state = EnrollmentState::parse(&etat);
    let class_id = match query.classe.as_deref().and_then(forms::optional) {
        Some(token) => Some(state.decode(scope::CLASS, &token)?),
        None => None,
    };
    let annee = query.annee.clone();
    let (year, rows, classes) = state
        .db(move |conn| {
            let year = match annee {
                Some(y) => forms::optional(&y),
                None => Some(current_year(conn, school_id)?),
            };
            let filter = EnrollmentFilter {
                state: filter_state,
                class_id,
                school_year: year.clone(),
                ..Default::default()
            };
            let rows = list_enrollments(conn, school_id, &filter)?;
            let classes = list_classes(
                conn,
                school_id,
                &ClassFilter {
                    school_year: year.clone(),
                    ..Default::default()
                },
            )?;
            Ok((year, rows, classes))
        })
        .await?;

    let mut page = Page::new("Inscriptions", &ctx);
    page.heading("Inscriptions");
    let can_enroll = ctx.user.role.can_enroll();
    if can_enroll {
        page.push(format!(
            "<p>{}</p>\n",
            html::link("/inscriptions/new", "Nouvelle inscription")
        ));
    }

    let state_options: Vec<(String, String)> = EnrollmentState::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), s.label().to_string()))
        .collect();
    let class_options: Vec<(String, String)> = classes
        .iter()
        .map(|c| (state.token(scope::CLASS, c.id), c.name.clone()))
        .collect();
    let selected_class = class_id
        .map(|id| state.token(scope::CLASS, id))
        .unwrap_or_default();
    page.push(html::filter_bar(
        "/inscriptions",
        &[
            html::select(
                "etat",
                "État",
                &state_options,
                filter_state.map(EnrollmentState::as_str).unwrap_or(""),
                Some("Tous"),
                None,
            ),
            html::select("classe", "Classe", &class_options, &selected_class, Some("Toutes"), None),
            html::input("text", "annee", "Année scolaire", year.as_deref().unwrap_or(""), None),
        ],
    ));

    let table_rows: Vec<Vec<String>> = rows
        .iter()
        .map(|e| {
            let mut actions = String::new();
            if can_enroll && e.state == EnrollmentState::Active {
                let href = format!("/inscriptions/{}", state.token(scope::ENROLLMENT, e.id));
                actions.push_str(&html::post_button(
                    &format!("{href}/withdraw"),
                    "Retirer",
                    Some("Retirer cet élève de la classe ?"),
                ));
                actions.push_str(&html::post_button(
                    &format!("{href}/cancel"),
                    "Annuler",
                    Some("Annuler cette inscription (saisie erronée) ?"),
                ));
            }
            vec![
                html::link(&student_href(&state, e.student_id), &e.student_name),
                html::link(&class_href(&state, e.class_id), &e.class_name),
                html::escape(&e.school_year),
                html::badge(e.state.label(), e.state == EnrollmentState::Active),
                html::escape(&e.enrolled_on),
                html::text_or_dash(e.left_on.as_deref()),
                actions,
            ]
        })
        .collect();
    page.push(html::table(
        &["Élève", "Classe", "Année", "État", "Inscrit le", "Sorti le", ""],
        &table_rows,
        "Aucune inscription pour ces critères.",
    ));
    Ok(page.into_response())
}

// ---------------------------------------------------------------------------
// Enroll
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EnrollmentForm {
    pub eleve: String,
    pub classe: String,
    pub date: String,
}

async fn enrollment_form_page(
    state: &AppState,
    ctx: &RequestContext,
    form: &EnrollmentForm,
    errors: &FormErrors,
) -> Result<Page> {
    let school_id = ctx.school_id;
    let (students, classes) = state
        .db(move |conn| {
            let year = current_year(conn, school_id)?;
            let students = list_unenrolled(conn, school_id, &year)?;
            let classes = list_classes(
                conn,
                school_id,
                &ClassFilter {
                    school_year: Some(year),
                    only_active: true,
                    ..Default::default()
                },
            )?;
            Ok((students, classes))
        })
        .await?;

    let student_options: Vec<(String, String)> = students
        .iter()
        .map(|s| {
            let label = match &s.matricule {
                Some(m) => format!("{} ({m})", s.display_name()),
                None => s.display_name(),
            };
            (state.token(scope::STUDENT, s.id), label)
        })
        .collect();
    let class_options: Vec<(String, String)> = classes
        .iter()
        .map(|c| {
            let label = if c.is_full() {
                format!("{} ({}, complète)", c.name, c.capacity_label())
            } else {
                format!("{} ({})", c.name, c.capacity_label())
            };
            (state.token(scope::CLASS, c.id), label)
        })
        .collect();

    let mut page = Page::new("Nouvelle inscription", ctx);
    page.heading("Nouvelle inscription");
    if let Some(message) = errors.get("inscription") {
        page.alert(message);
    }
    page.push(html::form_start("/inscriptions/new"))
        .push(html::select(
            "eleve",
            "Élève",
            &student_options,
            &form.eleve,
            Some("Choisir…"),
            errors.get("eleve"),
        ))
        .push(html::select(
            "classe",
            "Classe",
            &class_options,
            &form.classe,
            Some("Choisir…"),
            errors.get("classe"),
        ))
        .push(html::input("date", "date", "Date d'inscription", &form.date, errors.get("date")))
        .push(html::form_end("Inscrire", Some("/inscriptions")));
    Ok(page)
}

#[derive(Debug, Default, Deserialize)]
pub struct NewQuery {
    pub eleve: Option<String>,
}

async fn new_form(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<NewQuery>,
) -> Result<Response> {
    let form = EnrollmentForm {
        eleve: query.eleve.unwrap_or_default(),
        date: today().format("%Y-%m-%d").to_string(),
        ..Default::default()
    };
    let page = enrollment_form_page(&state, &ctx, &form, &FormErrors::new()).await?;
    Ok(page.into_response())
}

async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Form(form): Form<EnrollmentForm>,
) -> Result<Response> {
    let mut errors = FormErrors::new();
    let student_id = match state.decode_optional(scope::STUDENT, &form.eleve) {
        Ok(Some(id)) => Some(id),
        _ => {
            errors.add("eleve", "Choisissez un élève.");
            None
        }
    };
    let class_id = match state.decode_optional(scope::CLASS, &form.classe) {
        Ok(Some(id)) => Some(id),
        _ => {
            errors.add("classe", "Choisissez une classe.");
            None
        }
    };
    let on = forms::optional_date(&mut errors, "date", &form.date).unwrap_or_else(today);
    let (Some(student_id), Some(class_id), true) = (student_id, class_id, errors.is_empty())
    else {
        let page = enrollment_form_page(&state, &ctx, &form, &errors).await?;
        return Ok(page.with_status(StatusCode::UNPROCESSABLE_ENTITY));
    };

    let school_id = ctx.school_id;
    let result = state
        .db(move |conn| Ok(enrollment::enroll(conn, school_id, student_id, class_id, on)?))
        .await;
    match result {
        Ok(_) => Ok(ctx.redirect_with(
            FlashKind::Success,
            "Inscription enregistrée.",
            &class_href(&state, class_id),
        )),
        // Business-rule failures stay on the form with the choices kept.
        Err(AppError::Business(err)) => {
            let mut errors = FormErrors::new();
            errors.add("inscription", err.to_string());
            let page = enrollment_form_page(&state, &ctx, &form, &errors).await?;
            Ok(page.with_status(StatusCode::CONFLICT))
        }
        Err(other) => Err(other),
    }
}

// ---------------------------------------------------------------------------
// Withdraw / cancel
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TransitionForm {
    pub motif: String,
    pub date: String,
}

#[derive(Clone, Copy)]
enum Transition {
    Withdraw,
    Cancel,
}

async fn withdraw(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
    Form(form): Form<TransitionForm>,
) -> Result<Response> {
    transition(state, ctx, token, form, Transition::Withdraw).await
}

async fn cancel(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
    Form(form): Form<TransitionForm>,
) -> Result<Response> {
    transition(state, ctx, token, form, Transition::Cancel).await
}

async fn transition(
    state: AppState,
    ctx: RequestContext,
    token: String,
    form: TransitionForm,
    kind: Transition,
) -> Result<Response> {
    let enrollment_id = state.decode(scope::ENROLLMENT, &token)?;
    let school_id = ctx.school_id;
    let mut errors = FormErrors::new();
    let on = forms::optional_date(&mut errors, "date", &form.date).unwrap_or_else(today);
    let reason = forms::optional(&form.motif);

    let (class_id, result) = state
        .db(move |conn| {
            let current = get_enrollment(conn, school_id, enrollment_id)?
                .ok_or_else(|| AppError::not_found("Inscription"))?;
            let result = match kind {
                Transition::Withdraw => {
                    enrollment::withdraw(conn, school_id, enrollment_id, on, reason.as_deref())
                }
                Transition::Cancel => {
                    enrollment::cancel(conn, school_id, enrollment_id, on, reason.as_deref())
                }
            };
            Ok((current.class_id, result.map_err(AppError::from)))
        })
        .await?;

    let back = class_href(&state, class_id);
    match result {
        Ok(_) => {
            let message = match kind {
                Transition::Withdraw => "Élève retiré(e) de la classe.",
                Transition::Cancel => "Inscription annulée.",
            };
            Ok(ctx.redirect_with(FlashKind::Success, message, &back))
        }
        Err(err) => flash_or_fail(&ctx, err, &back),
    }
}
