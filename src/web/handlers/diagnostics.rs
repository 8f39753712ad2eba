use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Router,
};

use crate::enrollment::recount;
use crate::error::Result;
use crate::records::diagnostics::build_report;
use crate::session::FlashKind;
use crate::web::guard::RequestContext;
use crate::web::handlers::classes::class_href;
use crate::web::handlers::students::student_href;
use crate::web::html::{self, Page};
use crate::AppState;

pub fn manage_routes() -> Router<AppState> {
    Router::new()
        .route("/diagnostics", get(report))
        .route("/diagnostics/recount", post(recount_counters))
}

async fn report(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response> {
    let school_id = ctx.school_id;
    let report = state
        .db(move |conn| Ok(build_report(conn, school_id)?))
        .await?;
    let summary = report.summary();

    let mut page = Page::new("Diagnostics", &ctx);
    page.heading("Diagnostics");
    page.push(format!(
        "<div class=\"cards\">\n\
         <div class=\"card\"><strong>{}</strong>classes</div>\n\
         <div class=\"card\"><strong>{}</strong>compteurs incohérents</div>\n\
         <div class=\"card\"><strong>{}</strong>classes en sureffectif</div>\n\
         <div class=\"card\"><strong>{}</strong>élèves archivés inscrits</div>\n\
         <div class=\"card\"><strong>{}</strong>enseignants inactifs affectés</div>\n\
         </div>\n",
        summary.classes,
        summary.counter_mismatches,
        summary.over_capacity,
        summary.inactive_students_enrolled,
        summary.inactive_teachers_assigned,
    ));
    if report.is_clean() {
        page.push("<p>Aucune anomalie détectée.</p>\n");
    }
    page.push(format!(
        "<p>{}</p>\n",
        html::post_button("/diagnostics/recount", "Recalculer les effectifs", None)
    ));

    page.section("Effectifs par classe");
    let rows: Vec<Vec<String>> = report
        .counts
        .iter()
        .map(|c| {
            let capacity = if c.capacity == 0 {
                "illimitée".to_string()
            } else {
                c.capacity.to_string()
            };
            let mut flags = Vec::new();
            if !c.is_consistent() {
                flags.push(html::badge("compteur incohérent", false));
            }
            if c.over_capacity() {
                flags.push(html::badge("sureffectif", false));
            }
            if flags.is_empty() {
                flags.push(html::badge("ok", true));
            }
            vec![
                html::link(&class_href(&state, c.class_id), &c.class_name),
                html::escape(&c.school_year),
                c.cached.to_string(),
                c.actual.to_string(),
                capacity,
                flags.join(" "),
            ]
        })
        .collect();
    page.push(html::table(
        &["Classe", "Année", "Effectif enregistré", "Inscrits actifs", "Capacité", ""],
        &rows,
        "Aucune classe.",
    ));

    page.section("Élèves archivés avec une inscription active");
    let rows: Vec<Vec<String>> = report
        .inactive_students_enrolled
        .iter()
        .map(|e| {
            vec![
                html::link(&student_href(&state, e.student_id), &e.student_name),
                html::link(&class_href(&state, e.class_id), &e.class_name),
                html::escape(&e.school_year),
            ]
        })
        .collect();
    page.push(html::table(&["Élève", "Classe", "Année"], &rows, "Aucun."));

    page.section("Affectations à un enseignant inactif");
    let rows: Vec<Vec<String>> = report
        .inactive_teachers_assigned
        .iter()
        .map(|a| {
            vec![
                html::link(&class_href(&state, a.class_id), &a.class_name),
                html::escape(&a.subject_name),
                html::text_or_dash(a.teacher_name.as_deref()),
            ]
        })
        .collect();
    page.push(html::table(&["Classe", "Matière", "Enseignant"], &rows, "Aucune."));
    Ok(page.into_response())
}

async fn recount_counters(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response> {
    let school_id = ctx.school_id;
    let fixed = state
        .db(move |conn| Ok(recount(conn, Some(school_id))?))
        .await?;
    tracing::info!(school_id, fixed, "class counters re-aggregated");
    let message = if fixed == 0 {
        "Tous les effectifs étaient déjà à jour.".to_string()
    } else {
        format!("{fixed} effectif(s) de classe corrigé(s).")
    };
    Ok(ctx.redirect_with(FlashKind::Success, message, "/diagnostics"))
}
