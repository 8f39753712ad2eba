use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Form, Router,
};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::records::assignments::{
    create_assignment, delete_assignment, get_assignment, update_assignment, Assignment,
    AssignmentInput,
};
use crate::records::classes::{get_class, Class};
use crate::records::subjects::{get_subject, list_subjects};
use crate::records::teachers::{get_teacher, list_teachers};
use crate::secure_id::scope;
use crate::session::FlashKind;
use crate::web::forms::{self, FormErrors};
use crate::web::guard::RequestContext;
use crate::web::handlers::classes::class_href;
use crate::web::handlers::teacher_options;
use crate::web::html::{self, Page};
use crate::AppState;

pub fn manage_routes() -> Router<AppState> {
    Router::new()
        .route("/classes/:id/assign", get(new_form).post(create))
        .route("/affectations/:id/edit", get(edit_form).post(update))
        .route("/affectations/:id/delete", post(delete))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AssignmentForm {
    pub matiere: String,
    pub enseignant: String,
    pub coefficient: String,
    pub heures_hebdo: String,
}

struct Validated {
    subject_id: Option<i64>,
    teacher_id: Option<i64>,
    coefficient_override: Option<f64>,
    weekly_hours: Option<f64>,
}

impl AssignmentForm {
    fn from_assignment(state: &AppState, a: &Assignment) -> Self {
        Self {
            matiere: state.token(scope::SUBJECT, a.subject_id),
            enseignant: a
                .teacher_id
                .map(|id| state.token(scope::TEACHER, id))
                .unwrap_or_default(),
            coefficient: a.coefficient_override.map(html::number).unwrap_or_default(),
            heures_hebdo: a.weekly_hours.map(html::number).unwrap_or_default(),
        }
    }

    fn validate(&self, state: &AppState, with_subject: bool) -> (Validated, FormErrors) {
        let mut errors = FormErrors::new();
        let subject_id = if with_subject {
            match state.decode_optional(scope::SUBJECT, &self.matiere) {
                Ok(Some(id)) => Some(id),
                _ => {
                    errors.add("matiere", "Choisissez une matière.");
                    None
                }
            }
        } else {
            None
        };
        let teacher_id = state
            .decode_optional(scope::TEACHER, &self.enseignant)
            .unwrap_or_else(|_| {
                errors.add("enseignant", "Enseignant inconnu.");
                None
            });
        let validated = Validated {
            subject_id,
            teacher_id,
            coefficient_override: forms::optional_positive_decimal(
                &mut errors,
                "coefficient",
                &self.coefficient,
            ),
            weekly_hours: forms::optional_non_negative_decimal(
                &mut errors,
                "heures_hebdo",
                &self.heures_hebdo,
            ),
        };
        (validated, errors)
    }
}

/// Form for a new assignment, or for `existing` when given (subject then fixed).
async fn assignment_form_page(
    state: &AppState,
    ctx: &RequestContext,
    class: &Class,
    existing: Option<&Assignment>,
    form: &AssignmentForm,
    errors: &FormErrors,
) -> Result<Page> {
    let school_id = ctx.school_id;
    let (teachers, subjects) = state
        .db(move |conn| {
            Ok((
                list_teachers(conn, school_id, true)?,
                list_subjects(conn, school_id, true)?,
            ))
        })
        .await?;

    let (title, action) = match existing {
        Some(a) => (
            format!("{} en {}", a.subject_name, class.name),
            format!("/affectations/{}/edit", state.token(scope::ASSIGNMENT, a.id)),
        ),
        None => (
            format!("Affecter une matière à {}", class.name),
            format!("{}/assign", class_href(state, class.id)),
        ),
    };
    let mut page = Page::new(title.clone(), ctx);
    page.heading(&title);
    page.push(html::form_start(&action));
    if existing.is_none() {
        let subject_options: Vec<(String, String)> = subjects
            .iter()
            .map(|s| {
                let label = match &s.code {
                    Some(code) => format!("{} ({code})", s.name),
                    None => s.name.clone(),
                };
                (state.token(scope::SUBJECT, s.id), label)
            })
            .collect();
        page.push(html::select(
            "matiere",
            "Matière",
            &subject_options,
            &form.matiere,
            Some("Choisir…"),
            errors.get("matiere"),
        ));
    }
    page.push(html::select(
        "enseignant",
        "Enseignant",
        &teacher_options(state, &teachers),
        &form.enseignant,
        Some("Non attribué"),
        errors.get("enseignant"),
    ))
    .push(html::input(
        "text",
        "coefficient",
        "Coefficient (vide = celui de la matière)",
        &form.coefficient,
        errors.get("coefficient"),
    ))
    .push(html::input(
        "text",
        "heures_hebdo",
        "Heures par semaine",
        &form.heures_hebdo,
        errors.get("heures_hebdo"),
    ))
    .push(html::form_end(
        "Enregistrer",
        Some(&class_href(state, class.id)),
    ));
    Ok(page)
}

async fn load_class(state: &AppState, school_id: i64, class_id: i64) -> Result<Class> {
    state
        .db(move |conn| {
            get_class(conn, school_id, class_id)?.ok_or_else(|| AppError::not_found("Classe"))
        })
        .await
}

async fn new_form(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
) -> Result<Response> {
    let class_id = state.decode(scope::CLASS, &token)?;
    let class = load_class(&state, ctx.school_id, class_id).await?;
    let page = assignment_form_page(
        &state,
        &ctx,
        &class,
        None,
        &AssignmentForm::default(),
        &FormErrors::new(),
    )
    .await?;
    Ok(page.into_response())
}

async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
    Form(form): Form<AssignmentForm>,
) -> Result<Response> {
    let class_id = state.decode(scope::CLASS, &token)?;
    let school_id = ctx.school_id;
    let class = load_class(&state, school_id, class_id).await?;
    let (valid, errors) = form.validate(&state, true);

    let outcome = state
        .db(move |conn| {
            let mut errors = errors;
            if let Some(subject_id) = valid.subject_id {
                if get_subject(conn, school_id, subject_id)?.is_none() {
                    errors.add("matiere", "Matière inconnue.");
                }
            }
            if let Some(teacher_id) = valid.teacher_id {
                if get_teacher(conn, school_id, teacher_id)?.is_none() {
                    errors.add("enseignant", "Enseignant inconnu.");
                }
            }
            let Some(subject_id) = valid.subject_id.filter(|_| errors.is_empty()) else {
                return Ok(Err(errors));
            };
            let input = AssignmentInput {
                subject_id,
                teacher_id: valid.teacher_id,
                coefficient_override: valid.coefficient_override,
                weekly_hours: valid.weekly_hours,
            };
            match create_assignment(conn, school_id, class_id, &input) {
                Ok(id) => Ok(Ok(id)),
                Err(AppError::Conflict(message)) => {
                    errors.add("matiere", message);
                    Ok(Err(errors))
                }
                Err(other) => Err(other),
            }
        })
        .await?;

    match outcome {
        Ok(id) => {
            tracing::info!(school_id, class_id, assignment_id = id, "subject assigned");
            Ok(ctx.redirect_with(
                FlashKind::Success,
                "Matière affectée à la classe.",
                &class_href(&state, class_id),
            ))
        }
        Err(errors) => {
            let page = assignment_form_page(&state, &ctx, &class, None, &form, &errors).await?;
            Ok(page.with_status(StatusCode::UNPROCESSABLE_ENTITY))
        }
    }
}

async fn load_assignment(
    state: &AppState,
    school_id: i64,
    assignment_id: i64,
) -> Result<(Assignment, Class)> {
    state
        .db(move |conn| {
            let assignment = get_assignment(conn, school_id, assignment_id)?
                .ok_or_else(|| AppError::not_found("Affectation"))?;
            let class = get_class(conn, school_id, assignment.class_id)?
                .ok_or_else(|| AppError::not_found("Classe"))?;
            Ok((assignment, class))
        })
        .await
}

async fn edit_form(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
) -> Result<Response> {
    let assignment_id = state.decode(scope::ASSIGNMENT, &token)?;
    let (assignment, class) = load_assignment(&state, ctx.school_id, assignment_id).await?;
    let form = AssignmentForm::from_assignment(&state, &assignment);
    let page = assignment_form_page(
        &state,
        &ctx,
        &class,
        Some(&assignment),
        &form,
        &FormErrors::new(),
    )
    .await?;
    Ok(page.into_response())
}

async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
    Form(form): Form<AssignmentForm>,
) -> Result<Response> {
    let assignment_id = state.decode(scope::ASSIGNMENT, &token)?;
    let school_id = ctx.school_id;
    let (assignment, class) = load_assignment(&state, school_id, assignment_id).await?;
    let (valid, errors) = form.validate(&state, false);

    let outcome = state
        .db(move |conn| {
            let mut errors = errors;
            if let Some(teacher_id) = valid.teacher_id {
                if get_teacher(conn, school_id, teacher_id)?.is_none() {
                    errors.add("enseignant", "Enseignant inconnu.");
                }
            }
            if !errors.is_empty() {
                return Ok(Err(errors));
            }
            update_assignment(
                conn,
                school_id,
                assignment_id,
                valid.teacher_id,
                valid.coefficient_override,
                valid.weekly_hours,
            )?;
            Ok(Ok(()))
        })
        .await?;

    match outcome {
        Ok(()) => {
            tracing::info!(school_id, assignment_id, "assignment updated");
            Ok(ctx.redirect_with(
                FlashKind::Success,
                format!("Affectation de {} mise à jour.", assignment.subject_name),
                &class_href(&state, class.id),
            ))
        }
        Err(errors) => {
            let page =
                assignment_form_page(&state, &ctx, &class, Some(&assignment), &form, &errors)
                    .await?;
            Ok(page.with_status(StatusCode::UNPROCESSABLE_ENTITY))
        }
    }
}

async fn delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
) -> Result<Response> {
    let assignment_id = state.decode(scope::ASSIGNMENT, &token)?;
    let school_id = ctx.school_id;
    let (assignment, class) = load_assignment(&state, school_id, assignment_id).await?;
    state
        .db(move |conn| Ok(delete_assignment(conn, school_id, assignment_id)?))
        .await?;
    tracing::info!(school_id, assignment_id, "assignment removed");
    Ok(ctx.redirect_with(
        FlashKind::Success,
        format!("{} retirée de la classe {}.", assignment.subject_name, class.name),
        &class_href(&state, class.id),
    ))
}
