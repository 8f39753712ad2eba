use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Form, Router,
};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::records::teachers::{
    create_teacher, email_taken, get_teacher, list_teachers, update_teacher, Teacher, TeacherInput,
};
use crate::secure_id::scope;
use crate::session::FlashKind;
use crate::web::forms::{self, FormErrors};
use crate::web::guard::RequestContext;
use crate::web::html::{self, Page};
use crate::AppState;

pub fn read_routes() -> Router<AppState> {
    Router::new().route("/enseignants", get(list))
}

pub fn manage_routes() -> Router<AppState> {
    Router::new()
        .route("/enseignants/new", get(new_form).post(create))
        .route("/enseignants/:id/edit", get(edit_form).post(update))
}

fn edit_href(state: &AppState, id: i64) -> String {
    format!("/enseignants/{}/edit", state.token(scope::TEACHER, id))
}

async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response> {
    let school_id = ctx.school_id;
    let teachers = state
        .db(move |conn| Ok(list_teachers(conn, school_id, false)?))
        .await?;

    let can_manage = ctx.user.role.can_manage();
    let mut page = Page::new("Enseignants", &ctx);
    page.heading("Enseignants");
    if can_manage {
        page.push(format!(
            "<p>{}</p>\n",
            html::link("/enseignants/new", "Nouvel enseignant")
        ));
    }
    let rows: Vec<Vec<String>> = teachers
        .iter()
        .map(|t| {
            let name = if can_manage {
                html::link(&edit_href(&state, t.id), &t.display_name())
            } else {
                html::escape(&t.display_name())
            };
            vec![
                name,
                html::text_or_dash(t.specialty.as_deref()),
                html::text_or_dash(t.email.as_deref()),
                html::text_or_dash(t.phone.as_deref()),
                if t.active {
                    html::badge("actif", true)
                } else {
                    html::badge("inactif", false)
                },
            ]
        })
        .collect();
    page.push(html::table(
        &["Nom", "Spécialité", "E-mail", "Téléphone", "Statut"],
        &rows,
        "Aucun enseignant.",
    ));
    Ok(page.into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TeacherForm {
    pub nom: String,
    pub prenom: String,
    pub email: String,
    pub telephone: String,
    pub specialite: String,
    pub actif: Option<String>,
}

impl TeacherForm {
    fn from_teacher(t: &Teacher) -> Self {
        Self {
            nom: t.last_name.clone(),
            prenom: t.first_name.clone(),
            email: t.email.clone().unwrap_or_default(),
            telephone: t.phone.clone().unwrap_or_default(),
            specialite: t.specialty.clone().unwrap_or_default(),
            actif: t.active.then(|| "1".to_string()),
        }
    }

    fn validate(&self) -> (TeacherInput, FormErrors) {
        let mut errors = FormErrors::new();
        let email = forms::optional(&self.email).map(|e| e.to_lowercase());
        if let Some(e) = &email {
            if !e.contains('@') {
                errors.add("email", "Adresse e-mail invalide.");
            }
        }
        let input = TeacherInput {
            last_name: forms::required(&mut errors, "nom", &self.nom),
            first_name: self.prenom.trim().to_string(),
            email,
            phone: forms::optional(&self.telephone),
            specialty: forms::optional(&self.specialite),
            active: forms::checked(&self.actif),
        };
        (input, errors)
    }
}

fn teacher_form_page(
    ctx: &RequestContext,
    title: &str,
    action: &str,
    form: &TeacherForm,
    errors: &FormErrors,
) -> Page {
    let mut page = Page::new(title, ctx);
    page.heading(title);
    page.push(html::form_start(action))
        .push(html::input("text", "nom", "Nom", &form.nom, errors.get("nom")))
        .push(html::input("text", "prenom", "Prénom", &form.prenom, errors.get("prenom")))
        .push(html::input("email", "email", "E-mail", &form.email, errors.get("email")))
        .push(html::input("tel", "telephone", "Téléphone", &form.telephone, errors.get("telephone")))
        .push(html::input("text", "specialite", "Spécialité", &form.specialite, errors.get("specialite")))
        .push(html::checkbox("actif", "Enseignant actif", forms::checked(&form.actif)))
        .push(html::form_end("Enregistrer", Some("/enseignants")));
    page
}

async fn new_form(Extension(ctx): Extension<RequestContext>) -> Response {
    let form = TeacherForm {
        actif: Some("1".to_string()),
        ..Default::default()
    };
    teacher_form_page(&ctx, "Nouvel enseignant", "/enseignants/new", &form, &FormErrors::new())
        .into_response()
}

async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Form(form): Form<TeacherForm>,
) -> Result<Response> {
    let (input, errors) = form.validate();
    let school_id = ctx.school_id;
    let outcome = state
        .db(move |conn| {
            let mut errors = errors;
            if let Some(email) = &input.email {
                if email_taken(conn, school_id, email, None)? {
                    errors.add("email", "Cette adresse est déjà utilisée.");
                }
            }
            if !errors.is_empty() {
                return Ok(Err(errors));
            }
            Ok(Ok(create_teacher(conn, school_id, &input)?))
        })
        .await?;
    match outcome {
        Ok(id) => {
            tracing::info!(school_id, teacher_id = id, "teacher created");
            Ok(ctx.redirect_with(FlashKind::Success, "Enseignant enregistré.", "/enseignants"))
        }
        Err(errors) => Ok(
            teacher_form_page(&ctx, "Nouvel enseignant", "/enseignants/new", &form, &errors)
                .with_status(StatusCode::UNPROCESSABLE_ENTITY),
        ),
    }
}

async fn edit_form(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
) -> Result<Response> {
    let teacher_id = state.decode(scope::TEACHER, &token)?;
    let school_id = ctx.school_id;
    let teacher = state
        .db(move |conn| {
            get_teacher(conn, school_id, teacher_id)?
                .ok_or_else(|| AppError::not_found("Enseignant"))
        })
        .await?;
    Ok(teacher_form_page(
        &ctx,
        &format!("Modifier {}", teacher.display_name()),
        &edit_href(&state, teacher.id),
        &TeacherForm::from_teacher(&teacher),
        &FormErrors::new(),
    )
    .into_response())
}

async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
    Form(form): Form<TeacherForm>,
) -> Result<Response> {
    let teacher_id = state.decode(scope::TEACHER, &token)?;
    let school_id = ctx.school_id;
    let (input, errors) = form.validate();
    let outcome = state
        .db(move |conn| {
            let mut errors = errors;
            let current = get_teacher(conn, school_id, teacher_id)?
                .ok_or_else(|| AppError::not_found("Enseignant"))?;
            if let Some(email) = &input.email {
                if email_taken(conn, school_id, email, Some(teacher_id))? {
                    errors.add("email", "Cette adresse est déjà utilisée.");
                }
            }
            if !errors.is_empty() {
                return Ok(Err((current.display_name(), errors)));
            }
            update_teacher(conn, school_id, teacher_id, &input)?;
            Ok(Ok(()))
        })
        .await?;
    match outcome {
        Ok(()) => {
            tracing::info!(school_id, teacher_id, "teacher updated");
            Ok(ctx.redirect_with(FlashKind::Success, "Enseignant mis à jour.", "/enseignants"))
        }
        Err((name, errors)) => Ok(teacher_form_page(
            &ctx,
            &format!("Modifier {name}"),
            &edit_href(&state, teacher_id),
            &form,
            &errors,
        )
        .with_status(StatusCode::UNPROCESSABLE_ENTITY)),
    }
}
