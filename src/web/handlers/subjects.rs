use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Form, Router,
};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::records::assignments::list_for_subject;
use crate::records::subjects::{
    self, code_taken, get_subject, list_subjects, name_taken, Subject, SubjectInput,
};
use crate::secure_id::scope;
use crate::session::FlashKind;
use crate::web::forms::{self, FormErrors};
use crate::web::guard::RequestContext;
use crate::web::handlers::classes::class_href;
use crate::web::handlers::flash_or_fail;
use crate::web::html::{self, Page};
use crate::AppState;

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/matieres", get(list))
        .route("/matieres/:id", get(view))
}

pub fn manage_routes() -> Router<AppState> {
    Router::new()
        .route("/matieres/new", get(new_form).post(create))
        .route("/matieres/:id/edit", get(edit_form).post(update))
        .route("/matieres/:id/delete", post(delete))
}

fn subject_href(state: &AppState, id: i64) -> String {
    format!("/matieres/{}", state.token(scope::SUBJECT, id))
}

async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response> {
    let school_id = ctx.school_id;
    let subjects = state
        .db(move |conn| Ok(list_subjects(conn, school_id, false)?))
        .await?;

    let mut page = Page::new("Matières", &ctx);
    page.heading("Matières");
    if ctx.user.role.can_manage() {
        page.push(format!("<p>{}</p>\n", html::link("/matieres/new", "Nouvelle matière")));
    }
    let rows: Vec<Vec<String>> = subjects
        .iter()
        .map(|s| {
            vec![
                html::text_or_dash(s.code.as_deref()),
                html::link(&subject_href(&state, s.id), &s.name),
                html::number(s.coefficient),
                s.weekly_hours.map(html::number).unwrap_or_else(|| "-".to_string()),
                html::number(s.max_mark),
                s.class_count.to_string(),
                if s.active {
                    html::badge("active", true)
                } else {
                    html::badge("inactive", false)
                },
            ]
        })
        .collect();
    page.push(html::table(
        &["Code", "Matière", "Coefficient", "Heures / semaine", "Barème", "Classes", "Statut"],
        &rows,
        "Aucune matière.",
    ));
    Ok(page.into_response())
}

async fn view(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
) -> Result<Response> {
    let subject_id = state.decode(scope::SUBJECT, &token)?;
    let school_id = ctx.school_id;
    let (subject, assignments) = state
        .db(move |conn| {
            let subject = get_subject(conn, school_id, subject_id)?
                .ok_or_else(|| AppError::not_found("Matière"))?;
            let assignments = list_for_subject(conn, school_id, subject_id)?;
            Ok((subject, assignments))
        })
        .await?;

    let href = subject_href(&state, subject.id);
    let mut page = Page::new(subject.name.clone(), &ctx);
    page.heading(&subject.name);
    page.push(html::details(&[
        ("Code", html::text_or_dash(subject.code.as_deref())),
        ("Description", html::text_or_dash(subject.description.as_deref())),
        ("Coefficient", html::number(subject.coefficient)),
        (
            "Heures / semaine",
            subject.weekly_hours.map(html::number).unwrap_or_else(|| "-".to_string()),
        ),
        ("Barème", html::number(subject.max_mark)),
    ]));
    if ctx.user.role.can_manage() {
        page.push(format!(
            "<p>{} {}</p>\n",
            html::link(&format!("{href}/edit"), "Modifier"),
            html::post_button(
                &format!("{href}/delete"),
                "Supprimer",
                Some("Supprimer définitivement cette matière ?"),
            )
        ));
    }
    page.section("Classes");
    let rows: Vec<Vec<String>> = assignments
        .iter()
        .map(|a| {
            vec![
                html::link(&class_href(&state, a.class_id), &a.class_name),
                html::text_or_dash(a.teacher_name.as_deref()),
                html::number(a.coefficient()),
            ]
        })
        .collect();
    page.push(html::table(
        &["Classe", "Enseignant", "Coefficient"],
        &rows,
        "Matière affectée à aucune classe.",
    ));
    Ok(page.into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SubjectForm {
    pub code: String,
    pub nom: String,
    pub description: String,
    pub coefficient: String,
    pub heures_hebdo: String,
    pub bareme: String,
    pub actif: Option<String>,
}

impl SubjectForm {
    fn from_subject(s: &Subject) -> Self {
        Self {
            code: s.code.clone().unwrap_or_default(),
            nom: s.name.clone(),
            description: s.description.clone().unwrap_or_default(),
            coefficient: html::number(s.coefficient),
            heures_hebdo: s.weekly_hours.map(html::number).unwrap_or_default(),
            bareme: html::number(s.max_mark),
            actif: s.active.then(|| "1".to_string()),
        }
    }

    fn validate(&self) -> (SubjectInput, FormErrors) {
        let mut errors = FormErrors::new();
        let defaults = SubjectInput::default();
        let input = SubjectInput {
            code: forms::optional(&self.code).map(|c| c.to_uppercase()),
            name: forms::required(&mut errors, "nom", &self.nom),
            description: forms::optional(&self.description),
            coefficient: forms::positive_decimal(
                &mut errors,
                "coefficient",
                &self.coefficient,
                defaults.coefficient,
            ),
            weekly_hours: forms::optional_non_negative_decimal(
                &mut errors,
                "heures_hebdo",
                &self.heures_hebdo,
            ),
            max_mark: forms::positive_decimal(&mut errors, "bareme", &self.bareme, defaults.max_mark),
            active: forms::checked(&self.actif),
        };
        (input, errors)
    }
}

fn subject_form_page(
    ctx: &RequestContext,
    title: &str,
    action: &str,
    form: &SubjectForm,
    errors: &FormErrors,
) -> Page {
    let mut page = Page::new(title, ctx);
    page.heading(title);
    page.push(html::form_start(action))
        .push(html::input("text", "code", "Code", &form.code, errors.get("code")))
        .push(html::input("text", "nom", "Nom", &form.nom, errors.get("nom")))
        .push(html::textarea("description", "Description", &form.description, errors.get("description")))
        .push(html::input("text", "coefficient", "Coefficient", &form.coefficient, errors.get("coefficient")))
        .push(html::input(
            "text",
            "heures_hebdo",
            "Heures par semaine",
            &form.heures_hebdo,
            errors.get("heures_hebdo"),
        ))
        .push(html::input("text", "bareme", "Barème", &form.bareme, errors.get("bareme")))
        .push(html::checkbox("actif", "Matière active", forms::checked(&form.actif)))
        .push(html::form_end("Enregistrer", Some("/matieres")));
    page
}

/// Code and name are unique per school.
fn check_unique(
    conn: &rusqlite::Connection,
    school_id: i64,
    input: &SubjectInput,
    except_id: Option<i64>,
    errors: &mut FormErrors,
) -> Result<()> {
    if let Some(code) = &input.code {
        if code_taken(conn, school_id, code, except_id)? {
            errors.add("code", format!("Le code {code} est déjà utilisé."));
        }
    }
    if !input.name.is_empty() && name_taken(conn, school_id, &input.name, except_id)? {
        errors.add("nom", format!("La matière {} existe déjà.", input.name));
    }
    Ok(())
}

async fn new_form(Extension(ctx): Extension<RequestContext>) -> Response {
    let form = SubjectForm {
        coefficient: "1".to_string(),
        bareme: "20".to_string(),
        actif: Some("1".to_string()),
        ..Default::default()
    };
    subject_form_page(&ctx, "Nouvelle matière", "/matieres/new", &form, &FormErrors::new())
        .into_response()
}

async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Form(form): Form<SubjectForm>,
) -> Result<Response> {
    let (input, errors) = form.validate();
    let school_id = ctx.school_id;
    let outcome = state
        .db(move |conn| {
            let mut errors = errors;
            check_unique(conn, school_id, &input, None, &mut errors)?;
            if !errors.is_empty() {
                return Ok(Err(errors));
            }
            Ok(Ok(subjects::create_subject(conn, school_id, &input)?))
        })
        .await?;
    match outcome {
        Ok(id) => {
            tracing::info!(school_id, subject_id = id, "subject created");
            Ok(ctx.redirect_with(
                FlashKind::Success,
                "Matière enregistrée.",
                &subject_href(&state, id),
            ))
        }
        Err(errors) => Ok(
            subject_form_page(&ctx, "Nouvelle matière", "/matieres/new", &form, &errors)
                .with_status(StatusCode::UNPROCESSABLE_ENTITY),
        ),
    }
}

async fn edit_form(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
) -> Result<Response> {
    let subject_id = state.decode(scope::SUBJECT, &token)?;
    let school_id = ctx.school_id;
    let subject = state
        .db(move |conn| {
            get_subject(conn, school_id, subject_id)?.ok_or_else(|| AppError::not_found("Matière"))
        })
        .await?;
    let action = format!("{}/edit", subject_href(&state, subject.id));
    Ok(subject_form_page(
        &ctx,
        &format!("Modifier {}", subject.name),
        &action,
        &SubjectForm::from_subject(&subject),
        &FormErrors::new(),
    )
    .into_response())
}

async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
    Form(form): Form<SubjectForm>,
) -> Result<Response> {
    let subject_id = state.decode(scope::SUBJECT, &token)?;
    let school_id = ctx.school_id;
    let (input, errors) = form.validate();
    let outcome = state
        .db(move |conn| {
            let mut errors = errors;
            let current = get_subject(conn, school_id, subject_id)?
                .ok_or_else(|| AppError::not_found("Matière"))?;
            check_unique(conn, school_id, &input, Some(subject_id), &mut errors)?;
            if !errors.is_empty() {
                return Ok(Err((current.name, errors)));
            }
            subjects::update_subject(conn, school_id, subject_id, &input)?;
            Ok(Ok(()))
        })
        .await?;
    match outcome {
        Ok(()) => {
            tracing::info!(school_id, subject_id, "subject updated");
            Ok(ctx.redirect_with(
                FlashKind::Success,
                "Matière mise à jour.",
                &subject_href(&state, subject_id),
            ))
        }
        Err((name, errors)) => {
            let action = format!("{}/edit", subject_href(&state, subject_id));
            Ok(
                subject_form_page(&ctx, &format!("Modifier {name}"), &action, &form, &errors)
                    .with_status(StatusCode::UNPROCESSABLE_ENTITY),
            )
        }
    }
}

async fn delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
) -> Result<Response> {
    let subject_id = state.decode(scope::SUBJECT, &token)?;
    let school_id = ctx.school_id;
    match state
        .db(move |conn| subjects::delete_subject(conn, school_id, subject_id))
        .await
    {
        Ok(name) => {
            tracing::info!(school_id, subject_id, "subject deleted");
            Ok(ctx.redirect_with(
                FlashKind::Success,
                format!("Matière {name} supprimée."),
                "/matieres",
            ))
        }
        Err(err) => flash_or_fail(&ctx, err, &subject_href(&state, subject_id)),
    }
}
