use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Form, Router,
};
use rusqlite::TransactionBehavior;
use serde::Deserialize;

use crate::enrollment::{self, EnrollmentState};
use crate::error::{AppError, Result};
use crate::records::classes::{list_classes, ClassFilter};
use crate::records::enrollments::{list_enrollments, EnrollmentFilter};
use crate::records::students::{
    create_student, get_student, has_active_enrollment, list_students, matricule_taken,
    update_student, Student, StudentInput,
};
use crate::secure_id::scope;
use crate::session::FlashKind;
use crate::web::forms::{self, FormErrors};
use crate::web::guard::RequestContext;
use crate::web::handlers::classes::class_href;
use crate::web::handlers::{current_year, flash_or_fail, today};
use crate::web::html::{self, Page};
use crate::AppState;

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/eleves", get(list))
        .route("/eleves/:id", get(view))
}

pub fn staff_routes() -> Router<AppState> {
    Router::new()
        .route("/eleves/new", get(new_form).post(create))
        .route("/eleves/:id/edit", get(edit_form).post(update))
        .route("/eleves/:id/reassign", get(reassign_form).post(reassign))
}

pub(crate) fn student_href(state: &AppState, id: i64) -> String {
    format!("/eleves/{}", state.token(scope::STUDENT, id))
}

const SEX_OPTIONS: [(&str, &str); 2] = [("F", "Féminin"), ("M", "Masculin")];

fn sex_label(code: Option<&str>) -> String {
    SEX_OPTIONS
        .iter()
        .find(|(c, _)| Some(*c) == code)
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| "-".to_string())
}

// ---------------------------------------------------------------------------
// List and view
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub q: Option<String>,
}

async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let school_id = ctx.school_id;
    let search = query.q.as_deref().and_then(forms::optional);
    let term = search.clone();
    let (year, students) = state
        .db(move |conn| {
            let year = current_year(conn, school_id)?;
            let students = list_students(conn, school_id, &year, term.as_deref())?;
            Ok((year, students))
        })
        .await?;

    let mut page = Page::new("Élèves", &ctx);
    page.heading("Élèves");
    if ctx.user.role.can_enroll() {
        page.push(format!("<p>{}</p>\n", html::link("/eleves/new", "Nouvel élève")));
    }
    page.push(html::filter_bar(
        "/eleves",
        &[html::input(
            "search",
            "q",
            "Nom ou matricule",
            search.as_deref().unwrap_or(""),
            None,
        )],
    ));
    let rows: Vec<Vec<String>> = students
        .iter()
        .map(|s| {
            vec![
                html::link(&student_href(&state, s.id), &s.display_name()),
                html::text_or_dash(s.matricule.as_deref()),
                html::text_or_dash(s.birth_date.as_deref()),
                match &s.current_class {
                    Some((id, name)) => html::link(&class_href(&state, *id), name),
                    None => "-".to_string(),
                },
                if s.active {
                    html::badge("actif", true)
                } else {
                    html::badge("archivé", false)
                },
            ]
        })
        .collect();
    let class_header = format!("Classe {year}");
    page.push(html::table(
        &["Élève", "Matricule", "Naissance", class_header.as_str(), "Statut"],
        &rows,
        "Aucun élève.",
    ));
    Ok(page.into_response())
}

async fn view(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
) -> Result<Response> {
    let student_id = state.decode(scope::STUDENT, &token)?;
    let school_id = ctx.school_id;
    let (student, history) = state
        .db(move |conn| {
            let year = current_year(conn, school_id)?;
            let student = get_student(conn, school_id, student_id, &year)?
                .ok_or_else(|| AppError::not_found("Élève"))?;
            let history = list_enrollments(
                conn,
                school_id,
                &EnrollmentFilter {
                    student_id: Some(student_id),
                    ..Default::default()
                },
            )?;
            Ok((student, history))
        })
        .await?;

    let href = student_href(&state, student.id);
    let mut page = Page::new(student.display_name(), &ctx);
    page.heading(&student.display_name());
    page.push(html::details(&[
        ("Matricule", html::text_or_dash(student.matricule.as_deref())),
        ("Date de naissance", html::text_or_dash(student.birth_date.as_deref())),
        ("Sexe", html::escape(&sex_label(student.sex.as_deref()))),
        (
            "Classe actuelle",
            match &student.current_class {
                Some((id, name)) => html::link(&class_href(&state, *id), name),
                None => "-".to_string(),
            },
        ),
        (
            "Statut",
            if student.active {
                html::badge("actif", true)
            } else {
                html::badge("archivé", false)
            },
        ),
    ]));

    let has_active = history.iter().any(|e| e.state == EnrollmentState::Active);
    if ctx.user.role.can_enroll() {
        let mut actions = vec![html::link(&format!("{href}/edit"), "Modifier")];
        if has_active {
            actions.push(html::link(&format!("{href}/reassign"), "Changer de classe"));
        } else if student.active {
            actions.push(html::link(
                &format!("/inscriptions/new?eleve={}", state.token(scope::STUDENT, student.id)),
                "Inscrire",
            ));
        }
        page.push(format!("<p>{}</p>\n", actions.join(" · ")));
    }

    page.section("Historique des inscriptions");
    let rows: Vec<Vec<String>> = history
        .iter()
        .map(|e| {
            vec![
                html::escape(&e.school_year),
                html::link(&class_href(&state, e.class_id), &e.class_name),
                html::badge(e.state.label(), e.state == EnrollmentState::Active),
                html::escape(&e.enrolled_on),
                html::text_or_dash(e.left_on.as_deref()),
                html::text_or_dash(e.reason.as_deref()),
            ]
        })
        .collect();
    page.push(html::table(
        &["Année", "Classe", "État", "Inscrit le", "Sorti le", "Motif"],
        &rows,
        "Aucune inscription.",
    ));
    Ok(page.into_response())
}

// ---------------------------------------------------------------------------
// Create / edit
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StudentForm {
    pub matricule: String,
    pub nom: String,
    pub prenom: String,
    pub date_naissance: String,
    pub sexe: String,
    pub actif: Option<String>,
}

impl StudentForm {
    fn from_student(s: &Student) -> Self {
        Self {
            matricule: s.matricule.clone().unwrap_or_default(),
            nom: s.last_name.clone(),
            prenom: s.first_name.clone(),
            date_naissance: s.birth_date.clone().unwrap_or_default(),
            sexe: s.sex.clone().unwrap_or_default(),
            actif: s.active.then(|| "1".to_string()),
        }
    }

    fn validate(&self) -> (StudentInput, FormErrors) {
        let mut errors = FormErrors::new();
        let sex = forms::optional(&self.sexe);
        if let Some(code) = &sex {
            if !SEX_OPTIONS.iter().any(|(c, _)| c == code) {
                errors.add("sexe", "Valeur inconnue.");
            }
        }
        let input = StudentInput {
            matricule: forms::optional(&self.matricule),
            last_name: forms::required(&mut errors, "nom", &self.nom),
            first_name: forms::required(&mut errors, "prenom", &self.prenom),
            birth_date: forms::optional_date(&mut errors, "date_naissance", &self.date_naissance)
                .map(|d| d.format("%Y-%m-%d").to_string()),
            sex,
            active: forms::checked(&self.actif),
        };
        (input, errors)
    }
}

fn student_form_page(
    ctx: &RequestContext,
    title: &str,
    action: &str,
    form: &StudentForm,
    errors: &FormErrors,
) -> Page {
    let sex_options: Vec<(String, String)> = SEX_OPTIONS
        .iter()
        .map(|(c, l)| (c.to_string(), l.to_string()))
        .collect();
    let mut page = Page::new(title, ctx);
    page.heading(title);
    page.push(html::form_start(action))
        .push(html::input("text", "matricule", "Matricule", &form.matricule, errors.get("matricule")))
        .push(html::input("text", "nom", "Nom", &form.nom, errors.get("nom")))
        .push(html::input("text", "prenom", "Prénom", &form.prenom, errors.get("prenom")))
        .push(html::input(
            "date",
            "date_naissance",
            "Date de naissance",
            &form.date_naissance,
            errors.get("date_naissance"),
        ))
        .push(html::select("sexe", "Sexe", &sex_options, &form.sexe, Some("-"), errors.get("sexe")))
        .push(html::checkbox("actif", "Élève actif", forms::checked(&form.actif)));
    if let Some(message) = errors.get("actif") {
        page.alert(message);
    }
    page.push(html::form_end("Enregistrer", Some("/eleves")));
    page
}

async fn new_form(Extension(ctx): Extension<RequestContext>) -> Response {
    let form = StudentForm {
        actif: Some("1".to_string()),
        ..Default::default()
    };
    student_form_page(&ctx, "Nouvel élève", "/eleves/new", &form, &FormErrors::new())
        .into_response()
}

async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Form(form): Form<StudentForm>,
) -> Result<Response> {
    let (input, errors) = form.validate();
    let school_id = ctx.school_id;
    let outcome = state
        .db(move |conn| {
            let mut errors = errors;
            if let Some(m) = &input.matricule {
                if matricule_taken(conn, school_id, m, None)? {
                    errors.add("matricule", format!("Le matricule {m} est déjà attribué."));
                }
            }
            if !errors.is_empty() {
                return Ok(Err(errors));
            }
            let id = create_student(conn, school_id, &input)?;
            Ok(Ok(id))
        })
        .await?;

    match outcome {
        Ok(id) => {
            tracing::info!(school_id, student_id = id, "student created");
            Ok(ctx.redirect_with(
                FlashKind::Success,
                "Élève enregistré(e).",
                &student_href(&state, id),
            ))
        }
        Err(errors) => Ok(
            student_form_page(&ctx, "Nouvel élève", "/eleves/new", &form, &errors)
                .with_status(StatusCode::UNPROCESSABLE_ENTITY),
        ),
    }
}

async fn edit_form(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
) -> Result<Response> {
    let student_id = state.decode(scope::STUDENT, &token)?;
    let school_id = ctx.school_id;
    let student = state
        .db(move |conn| {
            let year = current_year(conn, school_id)?;
            get_student(conn, school_id, student_id, &year)?
                .ok_or_else(|| AppError::not_found("Élève"))
        })
        .await?;
    let action = format!("{}/edit", student_href(&state, student.id));
    let title = format!("Modifier {}", student.display_name());
    Ok(student_form_page(
        &ctx,
        &title,
        &action,
        &StudentForm::from_student(&student),
        &FormErrors::new(),
    )
    .into_response())
}

async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
    Form(form): Form<StudentForm>,
) -> Result<Response> {
    let student_id = state.decode(scope::STUDENT, &token)?;
    let school_id = ctx.school_id;
    let (input, errors) = form.validate();
    let outcome = state
        .db(move |conn| {
            let mut errors = errors;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let year = current_year(&tx, school_id)?;
            let current = get_student(&tx, school_id, student_id, &year)?
                .ok_or_else(|| AppError::not_found("Élève"))?;
            if let Some(m) = &input.matricule {
                if matricule_taken(&tx, school_id, m, Some(student_id))? {
                    errors.add("matricule", format!("Le matricule {m} est déjà attribué."));
                }
            }
            if current.active && !input.active && has_active_enrollment(&tx, student_id)? {
                errors.add(
                    "actif",
                    "Cet élève a une inscription active : retirez-le de sa classe avant de l'archiver.",
                );
            }
            if !errors.is_empty() {
                return Ok(Err((current.display_name(), errors)));
            }
            update_student(&tx, school_id, student_id, &input)?;
            tx.commit()?;
            Ok(Ok(()))
        })
        .await?;

    match outcome {
        Ok(()) => {
            tracing::info!(school_id, student_id, "student updated");
            Ok(ctx.redirect_with(
                FlashKind::Success,
                "Fiche élève mise à jour.",
                &student_href(&state, student_id),
            ))
        }
        Err((name, errors)) => {
            let action = format!("{}/edit", student_href(&state, student_id));
            Ok(
                student_form_page(&ctx, &format!("Modifier {name}"), &action, &form, &errors)
                    .with_status(StatusCode::UNPROCESSABLE_ENTITY),
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Reassign
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReassignForm {
    pub classe: String,
    pub date: String,
    pub motif: String,
}

async fn reassign_form(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
) -> Result<Response> {
    let student_id = state.decode(scope::STUDENT, &token)?;
    reassign_page(&state, &ctx, student_id, &ReassignForm::default(), &FormErrors::new())
        .await
        .map(IntoResponse::into_response)
}

async fn reassign_page(
    state: &AppState,
    ctx: &RequestContext,
    student_id: i64,
    form: &ReassignForm,
    errors: &FormErrors,
) -> Result<Page> {
    let school_id = ctx.school_id;
    let (student, classes) = state
        .db(move |conn| {
            let year = current_year(conn, school_id)?;
            let student = get_student(conn, school_id, student_id, &year)?
                .ok_or_else(|| AppError::not_found("Élève"))?;
            let classes = list_classes(
                conn,
                school_id,
                &ClassFilter {
                    school_year: Some(year),
                    only_active: true,
                    ..Default::default()
                },
            )?;
            Ok((student, classes))
        })
        .await?;

    let current_id = student.current_class.as_ref().map(|(id, _)| *id);
    let options: Vec<(String, String)> = classes
        .iter()
        .filter(|c| Some(c.id) != current_id)
        .map(|c| {
            let label = if c.is_full() {
                format!("{} ({}, complète)", c.name, c.capacity_label())
            } else {
                format!("{} ({})", c.name, c.capacity_label())
            };
            (state.token(scope::CLASS, c.id), label)
        })
        .collect();

    let title = format!("Changer {} de classe", student.display_name());
    let href = student_href(state, student.id);
    let mut page = Page::new(title.clone(), ctx);
    page.heading(&title);
    page.push(format!(
        "<p>Classe actuelle : {}</p>\n",
        match &student.current_class {
            Some((_, name)) => html::escape(name),
            None => "aucune".to_string(),
        }
    ));
    page.push(html::form_start(&format!("{href}/reassign")))
        .push(html::select(
            "classe",
            "Nouvelle classe",
            &options,
            &form.classe,
            Some("Choisir…"),
            errors.get("classe"),
        ))
        .push(html::input("date", "date", "Date du changement", &form.date, errors.get("date")))
        .push(html::textarea("motif", "Motif", &form.motif, errors.get("motif")))
        .push(html::form_end("Changer de classe", Some(&href)));
    Ok(page)
}

async fn reassign(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
    Form(form): Form<ReassignForm>,
) -> Result<Response> {
    let student_id = state.decode(scope::STUDENT, &token)?;
    let mut errors = FormErrors::new();
    let class_id = match state.decode_optional(scope::CLASS, &form.classe) {
        Ok(Some(id)) => Some(id),
        _ => {
            errors.add("classe", "Choisissez une classe.");
            None
        }
    };
    let on = forms::optional_date(&mut errors, "date", &form.date).unwrap_or_else(today);
    let (Some(class_id), true) = (class_id, errors.is_empty()) else {
        let page = reassign_page(&state, &ctx, student_id, &form, &errors).await?;
        return Ok(page.with_status(StatusCode::UNPROCESSABLE_ENTITY));
    };

    let school_id = ctx.school_id;
    let reason = forms::optional(&form.motif);
    let result = state
        .db(move |conn| {
            Ok(enrollment::reassign(
                conn,
                school_id,
                student_id,
                class_id,
                on,
                reason.as_deref(),
            )?)
        })
        .await;
    let href = student_href(&state, student_id);
    match result {
        Ok(moved) => {
            let message = if moved.withdrawn.is_some() {
                "Changement de classe enregistré."
            } else {
                "Élève inscrit(e) dans la nouvelle classe."
            };
            Ok(ctx.redirect_with(FlashKind::Success, message, &href))
        }
        Err(err) => flash_or_fail(&ctx, err, &format!("{href}/reassign")),
    }
}
