use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Form, Router,
};
use rusqlite::TransactionBehavior;
use serde::Deserialize;

use crate::enrollment;
use crate::error::{AppError, Result};
use crate::records::assignments::list_for_class;
use crate::records::classes::{
    self, enrollment_count, get_class, list_classes, list_levels, name_taken, Class, ClassFilter,
    ClassInput,
};
use crate::records::enrollments::class_roster;
use crate::records::students::{get_student, list_unenrolled};
use crate::records::teachers::{get_teacher, list_teachers};
use crate::secure_id::scope;
use crate::session::FlashKind;
use crate::web::forms::{self, FormErrors};
use crate::web::guard::RequestContext;
use crate::web::handlers::{current_year, flash_or_fail, teacher_options, today};
use crate::web::html::{self, Page};
use crate::AppState;

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/classes", get(list))
        .route("/classes/:id", get(view))
}

pub fn staff_routes() -> Router<AppState> {
    Router::new().route("/classes/:id/enroll", post(enroll))
}

pub fn manage_routes() -> Router<AppState> {
    Router::new()
        .route("/classes/new", get(new_form).post(create))
        .route("/classes/:id/edit", get(edit_form).post(update))
        .route("/classes/:id/delete", post(delete))
}

pub(crate) fn class_href(state: &AppState, id: i64) -> String {
    format!("/classes/{}", state.token(scope::CLASS, id))
}

// ---------------------------------------------------------------------------
// List and view
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Absent means the current year; empty means every year.
    pub annee: Option<String>,
    pub niveau: Option<String>,
}

async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let school_id = ctx.school_id;
    let (year, level, classes, levels) = state
        .db(move |conn| {
            let year = match query.annee {
                Some(y) => forms::optional(&y),
                None => Some(current_year(conn, school_id)?),
            };
            let level = query.niveau.as_deref().and_then(forms::optional);
            let filter = ClassFilter {
                school_year: year.clone(),
                level: level.clone(),
                only_active: false,
            };
            let classes = list_classes(conn, school_id, &filter)?;
            let levels = list_levels(conn, school_id)?;
            Ok((year, level, classes, levels))
        })
        .await?;

    let mut page = Page::new("Classes", &ctx);
    page.heading("Classes");
    if ctx.user.role.can_manage() {
        page.push(format!(
            "<p>{}</p>\n",
            html::link("/classes/new", "Nouvelle classe")
        ));
    }
    let level_options: Vec<(String, String)> =
        levels.iter().map(|l| (l.clone(), l.clone())).collect();
    page.push(html::filter_bar(
        "/classes",
        &[
            html::input("text", "annee", "Année scolaire", year.as_deref().unwrap_or(""), None),
            html::select(
                "niveau",
                "Niveau",
                &level_options,
                level.as_deref().unwrap_or(""),
                Some("Tous"),
                None,
            ),
        ],
    ));

    let rows: Vec<Vec<String>> = classes
        .iter()
        .map(|c| {
            vec![
                html::link(&class_href(&state, c.id), &c.name),
                html::escape(&c.level),
                html::escape(&c.school_year),
                html::text_or_dash(c.homeroom_teacher_name.as_deref()),
                occupancy(c),
                status_badge(c.active),
            ]
        })
        .collect();
    page.push(html::table(
        &["Classe", "Niveau", "Année", "Professeur principal", "Effectif", "Statut"],
        &rows,
        "Aucune classe pour ces critères.",
    ));
    Ok(page.into_response())
}

fn occupancy(class: &Class) -> String {
    if class.is_full() {
        format!("{} {}", html::escape(&class.capacity_label()), html::badge("complète", false))
    } else {
        html::escape(&class.capacity_label())
    }
}

fn status_badge(active: bool) -> String {
    if active {
        html::badge("active", true)
    } else {
        html::badge("inactive", false)
    }
}

async fn view(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
) -> Result<Response> {
    let class_id = state.decode(scope::CLASS, &token)?;
    let school_id = ctx.school_id;
    let (class, roster, assignments, candidates) = state
        .db(move |conn| {
            let class = get_class(conn, school_id, class_id)?
                .ok_or_else(|| AppError::not_found("Classe"))?;
            let roster = class_roster(conn, school_id, class_id)?;
            let assignments = list_for_class(conn, school_id, class_id)?;
            let candidates = list_unenrolled(conn, school_id, &class.school_year)?;
            Ok((class, roster, assignments, candidates))
        })
        .await?;

    let href = class_href(&state, class.id);
    let mut page = Page::new(format!("Classe {}", class.name), &ctx);
    page.heading(&format!("Classe {}", class.name));
    page.push(html::details(&[
        ("Niveau", html::escape(&class.level)),
        ("Cycle", html::text_or_dash(class.cycle.as_deref())),
        ("Année scolaire", html::escape(&class.school_year)),
        ("Effectif", occupancy(&class)),
        (
            "Professeur principal",
            html::text_or_dash(class.homeroom_teacher_name.as_deref()),
        ),
        ("Salle", html::text_or_dash(class.room.as_deref())),
        ("Statut", status_badge(class.active)),
    ]));
    if ctx.user.role.can_manage() {
        page.push(format!(
            "<p>{} {}</p>\n",
            html::link(&format!("{href}/edit"), "Modifier"),
            html::post_button(
                &format!("{href}/delete"),
                "Supprimer",
                Some("Supprimer définitivement cette classe ?"),
            )
        ));
    }

    page.section("Élèves inscrits");
    let can_enroll = ctx.user.role.can_enroll();
    let rows: Vec<Vec<String>> = roster
        .iter()
        .map(|row| {
            let student_href = format!("/eleves/{}", state.token(scope::STUDENT, row.student_id));
            let mut actions = String::new();
            if can_enroll {
                let enrollment_href =
                    format!("/inscriptions/{}", state.token(scope::ENROLLMENT, row.id));
                actions.push_str(&html::post_button(
                    &format!("{enrollment_href}/withdraw"),
                    "Retirer",
                    Some("Retirer cet élève de la classe ?"),
                ));
                actions.push_str(&html::post_button(
                    &format!("{enrollment_href}/cancel"),
                    "Annuler",
                    Some("Annuler cette inscription (saisie erronée) ?"),
                ));
            }
            vec![
                html::link(&student_href, &row.student_name),
                html::text_or_dash(row.matricule.as_deref()),
                html::escape(&row.enrolled_on),
                actions,
            ]
        })
        .collect();
    page.push(html::table(
        &["Élève", "Matricule", "Inscrit le", ""],
        &rows,
        "Aucun élève inscrit.",
    ));

    if can_enroll && class.active {
        if class.is_full() {
            page.push("<p>La classe est complète.</p>\n");
        } else if candidates.is_empty() {
            page.push("<p>Tous les élèves actifs sont déjà inscrits pour cette année.</p>\n");
        } else {
            let options: Vec<(String, String)> = candidates
                .iter()
                .map(|s| (state.token(scope::STUDENT, s.id), s.display_name()))
                .collect();
            page.push(html::form_start(&format!("{href}/enroll")))
                .push(html::select("eleve", "Inscrire un élève", &options, "", None, None))
                .push(html::input("date", "date", "Date d'inscription", "", None))
                .push(html::form_end("Inscrire", None));
        }
    }

    page.section("Matières enseignées");
    let can_manage = ctx.user.role.can_manage();
    let rows: Vec<Vec<String>> = assignments
        .iter()
        .map(|a| {
            let subject_href = format!("/matieres/{}", state.token(scope::SUBJECT, a.subject_id));
            let teacher = match (&a.teacher_name, a.teacher_active) {
                (Some(name), true) => html::escape(name),
                (Some(name), false) => {
                    format!("{} {}", html::escape(name), html::badge("inactif", false))
                }
                (None, _) => "-".to_string(),
            };
            let mut actions = String::new();
            if can_manage {
                let assignment_href =
                    format!("/affectations/{}", state.token(scope::ASSIGNMENT, a.id));
                actions.push_str(&html::link(&format!("{assignment_href}/edit"), "Modifier"));
                actions.push(' ');
                actions.push_str(&html::post_button(
                    &format!("{assignment_href}/delete"),
                    "Retirer",
                    Some("Retirer cette matière de la classe ?"),
                ));
            }
            vec![
                html::link(&subject_href, &a.subject_name),
                teacher,
                html::number(a.coefficient()),
                a.weekly_hours.map(html::number).unwrap_or_else(|| "-".to_string()),
                actions,
            ]
        })
        .collect();
    page.push(html::table(
        &["Matière", "Enseignant", "Coefficient", "Heures / semaine", ""],
        &rows,
        "Aucune matière affectée.",
    ));
    if can_manage {
        page.push(format!(
            "<p>{}</p>\n",
            html::link(&format!("{href}/assign"), "Affecter une matière")
        ));
    }
    Ok(page.into_response())
}

// ---------------------------------------------------------------------------
// Create / edit / delete
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClassForm {
    pub nom: String,
    pub niveau: String,
    pub cycle: String,
    pub annee_scolaire: String,
    pub capacite_max: String,
    pub enseignant_principal: String,
    pub salle: String,
    pub actif: Option<String>,
}

impl ClassForm {
    fn from_class(state: &AppState, class: &Class) -> Self {
        Self {
            nom: class.name.clone(),
            niveau: class.level.clone(),
            cycle: class.cycle.clone().unwrap_or_default(),
            annee_scolaire: class.school_year.clone(),
            capacite_max: class.capacity.to_string(),
            enseignant_principal: class
                .homeroom_teacher_id
                .map(|id| state.token(scope::TEACHER, id))
                .unwrap_or_default(),
            salle: class.room.clone().unwrap_or_default(),
            actif: class.active.then(|| "1".to_string()),
        }
    }

    fn validate(&self, state: &AppState) -> (ClassInput, FormErrors) {
        let mut errors = FormErrors::new();
        let homeroom_teacher_id = match state.decode_optional(scope::TEACHER, &self.enseignant_principal) {
            Ok(id) => id,
            Err(_) => {
                errors.add("enseignant_principal", "Enseignant inconnu.");
                None
            }
        };
        let input = ClassInput {
            name: forms::required(&mut errors, "nom", &self.nom),
            level: forms::required(&mut errors, "niveau", &self.niveau),
            cycle: forms::optional(&self.cycle),
            school_year: forms::school_year(&mut errors, "annee_scolaire", &self.annee_scolaire),
            capacity: forms::non_negative_int(&mut errors, "capacite_max", &self.capacite_max, 0),
            homeroom_teacher_id,
            room: forms::optional(&self.salle),
            active: forms::checked(&self.actif),
        };
        (input, errors)
    }
}

async fn class_form_page(
    state: &AppState,
    ctx: &RequestContext,
    title: &str,
    action: &str,
    form: &ClassForm,
    errors: &FormErrors,
) -> Result<Page> {
    let school_id = ctx.school_id;
    let teachers = state
        .db(move |conn| Ok(list_teachers(conn, school_id, true)?))
        .await?;
    let mut page = Page::new(title, ctx);
    page.heading(title);
    page.push(html::form_start(action))
        .push(html::input("text", "nom", "Nom", &form.nom, errors.get("nom")))
        .push(html::input("text", "niveau", "Niveau", &form.niveau, errors.get("niveau")))
        .push(html::input("text", "cycle", "Cycle", &form.cycle, errors.get("cycle")))
        .push(html::input(
            "text",
            "annee_scolaire",
            "Année scolaire (AAAA-AAAA)",
            &form.annee_scolaire,
            errors.get("annee_scolaire"),
        ))
        .push(html::input(
            "number",
            "capacite_max",
            "Capacité maximale (0 = illimitée)",
            &form.capacite_max,
            errors.get("capacite_max"),
        ))
        .push(html::select(
            "enseignant_principal",
            "Professeur principal",
            &teacher_options(state, &teachers),
            &form.enseignant_principal,
            Some("Aucun"),
            errors.get("enseignant_principal"),
        ))
        .push(html::input("text", "salle", "Salle", &form.salle, errors.get("salle")))
        .push(html::checkbox("actif", "Classe active", forms::checked(&form.actif)))
        .push(html::form_end("Enregistrer", Some("/classes")));
    Ok(page)
}

/// Checks that depend on stored data: unique name per year, homeroom teacher in this school.
fn check_class_rules(
    conn: &rusqlite::Connection,
    school_id: i64,
    input: &ClassInput,
    except_id: Option<i64>,
    errors: &mut FormErrors,
) -> Result<()> {
    if name_taken(conn, school_id, &input.name, &input.school_year, except_id)? {
        errors.add(
            "nom",
            format!(
                "Une classe nommée {} existe déjà pour l'année {}.",
                input.name, input.school_year
            ),
        );
    }
    if let Some(teacher_id) = input.homeroom_teacher_id {
        if get_teacher(conn, school_id, teacher_id)?.is_none() {
            errors.add("enseignant_principal", "Enseignant inconnu.");
        }
    }
    Ok(())
}

async fn new_form(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response> {
    let school_id = ctx.school_id;
    let year = state.db(move |conn| current_year(conn, school_id)).await?;
    let form = ClassForm {
        annee_scolaire: year,
        capacite_max: "0".to_string(),
        actif: Some("1".to_string()),
        ..Default::default()
    };
    let page = class_form_page(&state, &ctx, "Nouvelle classe", "/classes/new", &form, &FormErrors::new()).await?;
    Ok(page.into_response())
}

async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Form(form): Form<ClassForm>,
) -> Result<Response> {
    let (input, errors) = form.validate(&state);
    let school_id = ctx.school_id;
    let outcome = if errors.is_empty() {
        state
            .db(move |conn| {
                let mut errors = errors;
                check_class_rules(conn, school_id, &input, None, &mut errors)?;
                if !errors.is_empty() {
                    return Ok(Err(errors));
                }
                let id = classes::create_class(conn, school_id, &input)?;
                Ok(Ok((id, input.name)))
            })
            .await?
    } else {
        Err(errors)
    };

    match outcome {
        Ok((id, name)) => {
            tracing::info!(school_id, class_id = id, "class created");
            Ok(ctx.redirect_with(
                FlashKind::Success,
                format!("Classe {name} créée."),
                &class_href(&state, id),
            ))
        }
        Err(errors) => {
            let page = class_form_page(&state, &ctx, "Nouvelle classe", "/classes/new", &form, &errors).await?;
            Ok(page.with_status(StatusCode::UNPROCESSABLE_ENTITY))
        }
    }
}

async fn edit_form(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
) -> Result<Response> {
    let class_id = state.decode(scope::CLASS, &token)?;
    let school_id = ctx.school_id;
    let class = state
        .db(move |conn| {
            get_class(conn, school_id, class_id)?.ok_or_else(|| AppError::not_found("Classe"))
        })
        .await?;
    let form = ClassForm::from_class(&state, &class);
    let action = format!("{}/edit", class_href(&state, class.id));
    let title = format!("Modifier la classe {}", class.name);
    let page = class_form_page(&state, &ctx, &title, &action, &form, &FormErrors::new()).await?;
    Ok(page.into_response())
}

async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
    Form(form): Form<ClassForm>,
) -> Result<Response> {
    let class_id = state.decode(scope::CLASS, &token)?;
    let school_id = ctx.school_id;
    let (input, errors) = form.validate(&state);
    let outcome = state
        .db(move |conn| {
            let mut errors = errors;
            // Enrollments take the same write lock, so the count cannot move under the check.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current = get_class(&tx, school_id, class_id)?
                .ok_or_else(|| AppError::not_found("Classe"))?;
            if !errors.is_empty() {
                return Ok(Err((current.name, errors)));
            }
            check_class_rules(&tx, school_id, &input, Some(class_id), &mut errors)?;
            let enrolled = enrollment::active_count(&tx, class_id)?;
            if input.capacity > 0 && input.capacity < enrolled {
                errors.add(
                    "capacite_max",
                    format!(
                        "La capacité ne peut pas être inférieure à l'effectif actuel ({enrolled})."
                    ),
                );
            }
            if input.school_year != current.school_year && enrollment_count(&tx, class_id)? > 0 {
                errors.add(
                    "annee_scolaire",
                    "L'année scolaire ne peut plus changer : la classe a des inscriptions.",
                );
            }
            if !errors.is_empty() {
                return Ok(Err((current.name, errors)));
            }
            classes::update_class(&tx, school_id, class_id, &input)?;
            tx.commit()?;
            Ok(Ok(input.name))
        })
        .await?;

    match outcome {
        Ok(name) => {
            tracing::info!(school_id, class_id, "class updated");
            Ok(ctx.redirect_with(
                FlashKind::Success,
                format!("Classe {name} mise à jour."),
                &class_href(&state, class_id),
            ))
        }
        Err((name, errors)) => {
            let action = format!("{}/edit", class_href(&state, class_id));
            let title = format!("Modifier la classe {name}");
            let page = class_form_page(&state, &ctx, &title, &action, &form, &errors).await?;
            Ok(page.with_status(StatusCode::UNPROCESSABLE_ENTITY))
        }
    }
}

async fn delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
) -> Result<Response> {
    let class_id = state.decode(scope::CLASS, &token)?;
    let school_id = ctx.school_id;
    match state
        .db(move |conn| classes::delete_class(conn, school_id, class_id))
        .await
    {
        Ok(name) => {
            tracing::info!(school_id, class_id, "class deleted");
            Ok(ctx.redirect_with(
                FlashKind::Success,
                format!("Classe {name} supprimée."),
                "/classes",
            ))
        }
        Err(err) => flash_or_fail(&ctx, err, &class_href(&state, class_id)),
    }
}

// ---------------------------------------------------------------------------
// Enroll from the class view
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EnrollForm {
    pub eleve: String,
    pub date: String,
}

async fn enroll(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(token): Path<String>,
    Form(form): Form<EnrollForm>,
) -> Result<Response> {
    let class_id = state.decode(scope::CLASS, &token)?;
    let back = class_href(&state, class_id);
    let Ok(student_id) = state.decode(scope::STUDENT, &form.eleve) else {
        return Ok(ctx.redirect_with(FlashKind::Error, "Choisissez un élève.", &back));
    };
    let mut errors = FormErrors::new();
    let on = forms::optional_date(&mut errors, "date", &form.date).unwrap_or_else(today);
    if let Some(message) = errors.get("date") {
        return Ok(ctx.redirect_with(FlashKind::Error, message, &back));
    }

    let school_id = ctx.school_id;
    let result = state
        .db(move |conn| {
            let enrollment = enrollment::enroll(conn, school_id, student_id, class_id, on)?;
            let year = enrollment.school_year.clone();
            let student = get_student(conn, school_id, student_id, &year)?
                .map(|s| s.display_name())
                .unwrap_or_default();
            let class = get_class(conn, school_id, class_id)?
                .map(|c| c.name)
                .unwrap_or_default();
            Ok((student, class))
        })
        .await;
    match result {
        Ok((student, class)) => Ok(ctx.redirect_with(
            FlashKind::Success,
            format!("{student} est inscrit(e) en {class}."),
            &back,
        )),
        Err(err) => flash_or_fail(&ctx, err, &back),
    }
}
