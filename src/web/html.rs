//! Server-side HTML building.
//!
//! Pages are assembled with `push_str`/`format!` into a single document with
//! inline CSS. Every piece of user data goes through [`escape`].

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

use crate::auth::CurrentUser;
use crate::session::Flash;
use crate::web::guard::RequestContext;

pub fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Escaped text, or a dash for missing values.
pub fn text_or_dash(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => escape(v),
        _ => "-".to_string(),
    }
}

/// Decimal without a trailing `.0`.
pub fn number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

pub fn link(href: &str, label: &str) -> String {
    format!("<a href=\"{}\">{}</a>", escape(href), escape(label))
}

/// A single-button form, used for state-changing actions from list rows.
pub fn post_button(action: &str, label: &str, confirm: Option<&str>) -> String {
    let onsubmit = confirm
        .map(|msg| format!(" onsubmit=\"return confirm('{}');\"", escape(&msg.replace('\'', "’"))))
        .unwrap_or_default();
    format!(
        "<form class=\"inline\" method=\"post\" action=\"{}\"{onsubmit}><button type=\"submit\">{}</button></form>",
        escape(action),
        escape(label)
    )
}

pub fn badge(label: &str, ok: bool) -> String {
    let class = if ok { "badge-ok" } else { "badge-warn" };
    format!("<span class=\"badge {class}\">{}</span>", escape(label))
}

/// Table with escaped headers; cells are inserted as-is.
pub fn table(headers: &[&str], rows: &[Vec<String>], empty: &str) -> String {
    let mut html = String::from("<table>\n<thead><tr>");
    for h in headers {
        html.push_str(&format!("<th>{}</th>", escape(h)));
    }
    html.push_str("</tr></thead>\n<tbody>\n");
    if rows.is_empty() {
        html.push_str(&format!(
            "<tr><td class=\"empty\" colspan=\"{}\">{}</td></tr>\n",
            headers.len().max(1),
            escape(empty)
        ));
    }
    for row in rows {
        html.push_str("<tr>");
        for cell in row {
            html.push_str(&format!("<td>{cell}</td>"));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</tbody>\n</table>\n");
    html
}

/// Definition list of label/value pairs; values are inserted as-is.
pub fn details(items: &[(&str, String)]) -> String {
    let mut html = String::from("<dl class=\"details\">\n");
    for (label, value) in items {
        html.push_str(&format!("<dt>{}</dt><dd>{value}</dd>\n", escape(label)));
    }
    html.push_str("</dl>\n");
    html
}

// ---------------------------------------------------------------------------
// Forms
// ---------------------------------------------------------------------------

pub fn form_start(action: &str) -> String {
    format!(
        "<form class=\"stacked\" method=\"post\" action=\"{}\">\n",
        escape(action)
    )
}

pub fn form_end(submit_label: &str, cancel_href: Option<&str>) -> String {
    let cancel = cancel_href
        .map(|href| format!(" <a class=\"cancel\" href=\"{}\">Annuler</a>", escape(href)))
        .unwrap_or_default();
    format!(
        "<div class=\"actions\"><button type=\"submit\">{}</button>{cancel}</div>\n</form>\n",
        escape(submit_label)
    )
}

fn field_error(error: Option<&str>) -> String {
    error
        .map(|e| format!("<span class=\"field-error\">{}</span>", escape(e)))
        .unwrap_or_default()
}

pub fn input(kind: &str, name: &str, label: &str, value: &str, error: Option<&str>) -> String {
    let invalid = if error.is_some() { " class=\"invalid\"" } else { "" };
    format!(
        "<label>{label}<input type=\"{kind}\" name=\"{name}\" value=\"{value}\"{invalid}>{err}</label>\n",
        label = escape(label),
        kind = kind,
        name = escape(name),
        value = escape(value),
        err = field_error(error),
    )
}

pub fn textarea(name: &str, label: &str, value: &str, error: Option<&str>) -> String {
    format!(
        "<label>{}<textarea name=\"{}\" rows=\"3\">{}</textarea>{}</label>\n",
        escape(label),
        escape(name),
        escape(value),
        field_error(error)
    )
}

/// `<select>` from (value, label) pairs. `blank` adds a leading empty option.
pub fn select(
    name: &str,
    label: &str,
    options: &[(String, String)],
    selected: &str,
    blank: Option<&str>,
    error: Option<&str>,
) -> String {
    let mut html = format!("<label>{}<select name=\"{}\">", escape(label), escape(name));
    if let Some(blank) = blank {
        html.push_str(&format!("<option value=\"\">{}</option>", escape(blank)));
    }
    for (value, text) in options {
        let sel = if value == selected { " selected" } else { "" };
        html.push_str(&format!(
            "<option value=\"{}\"{sel}>{}</option>",
            escape(value),
            escape(text)
        ));
    }
    html.push_str("</select>");
    html.push_str(&field_error(error));
    html.push_str("</label>\n");
    html
}

pub fn checkbox(name: &str, label: &str, checked: bool) -> String {
    let checked = if checked { " checked" } else { "" };
    format!(
        "<label class=\"check\"><input type=\"checkbox\" name=\"{}\" value=\"1\"{checked}> {}</label>\n",
        escape(name),
        escape(label)
    )
}

/// GET filter bar; `fields` are pre-rendered controls.
pub fn filter_bar(action: &str, fields: &[String]) -> String {
    let mut html = format!(
        "<form class=\"filters\" method=\"get\" action=\"{}\">",
        escape(action)
    );
    for f in fields {
        html.push_str(f);
    }
    html.push_str("<button type=\"submit\">Filtrer</button></form>\n");
    html
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// A full HTML document under construction.
pub struct Page {
    title: String,
    user: Option<CurrentUser>,
    flashes: Vec<Flash>,
    body: String,
}

impl Page {
    /// Page for a signed-in user; consumes the session's pending flash messages.
    pub fn new(title: impl Into<String>, ctx: &RequestContext) -> Self {
        Self {
            title: title.into(),
            user: Some(ctx.user.clone()),
            flashes: ctx.session.take_flashes(),
            body: String::new(),
        }
    }

    pub fn public(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            user: None,
            flashes: Vec::new(),
            body: String::new(),
        }
    }

    pub fn push(&mut self, html: impl AsRef<str>) -> &mut Self {
        self.body.push_str(html.as_ref());
        self
    }

    pub fn heading(&mut self, text: &str) -> &mut Self {
        self.body.push_str(&format!("<h1>{}</h1>\n", escape(text)));
        self
    }

    pub fn section(&mut self, text: &str) -> &mut Self {
        self.body.push_str(&format!("<h2>{}</h2>\n", escape(text)));
        self
    }

    /// Inline message on the page itself, e.g. a business-rule error on a re-rendered form.
    pub fn alert(&mut self, message: &str) -> &mut Self {
        self.body.push_str(&format!(
            "<div class=\"flash flash-error\">{}</div>\n",
            escape(message)
        ));
        self
    }

    pub fn render(&self) -> String {
        let mut html = String::with_capacity(4096 + self.body.len());
        html.push_str("<!DOCTYPE html>\n<html lang=\"fr\">\n<head>\n");
        html.push_str("<meta charset=\"UTF-8\">\n");
        html.push_str(
            "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
        );
        html.push_str(&format!(
            "<title>{} · Scolarité</title>\n",
            escape(&self.title)
        ));
        html.push_str("<style>\n");
        html.push_str(INLINE_CSS);
        html.push_str("</style>\n</head>\n<body>\n");

        if let Some(user) = &self.user {
            html.push_str(&nav(user));
        }

        html.push_str("<main>\n");
        for flash in &self.flashes {
            html.push_str(&format!(
                "<div class=\"flash {}\">{}</div>\n",
                flash.kind.css_class(),
                escape(&flash.message)
            ));
        }
        html.push_str(&self.body);
        html.push_str("</main>\n</body>\n</html>\n");
        html
    }

    /// The page with a non-200 status, e.g. 422 for a form with validation errors.
    pub fn with_status(self, status: StatusCode) -> Response {
        (status, Html(self.render())).into_response()
    }
}

impl IntoResponse for Page {
    fn into_response(self) -> Response {
        Html(self.render()).into_response()
    }
}

fn nav(user: &CurrentUser) -> String {
    let mut links = vec![
        ("/", "Tableau de bord"),
        ("/classes", "Classes"),
        ("/eleves", "Élèves"),
        ("/inscriptions", "Inscriptions"),
        ("/matieres", "Matières"),
        ("/enseignants", "Enseignants"),
    ];
    if user.role.can_manage() {
        links.push(("/diagnostics", "Diagnostics"));
    }
    let mut html = String::from("<nav>\n<span class=\"brand\">Scolarité</span>\n");
    for (href, label) in links {
        html.push_str(&format!("<a href=\"{href}\">{}</a>\n", escape(label)));
    }
    html.push_str(&format!(
        "<span class=\"who\">{} ({})</span>\n",
        escape(&user.name),
        escape(user.role.label())
    ));
    html.push_str(&post_button("/logout", "Déconnexion", None));
    html.push_str("</nav>\n");
    html
}

/// Standalone error document. `message` must already be safe to show.
pub fn error_page(status: StatusCode, code: &str, message: &str) -> String {
    let mut page = Page::public(status.canonical_reason().unwrap_or("Erreur"));
    page.push(format!(
        "<h1>{}</h1>\n<p class=\"error-message\" data-code=\"{}\">{}</p>\n<p><a href=\"/\">Retour à l'accueil</a></p>\n",
        status.as_u16(),
        escape(code),
        escape(message)
    ));
    page.render()
}

const INLINE_CSS: &str = r#"
body { font-family: system-ui, sans-serif; margin: 0; color: #1f2933; background: #f5f7fa; }
nav { display: flex; gap: 1rem; align-items: center; padding: .6rem 1.2rem; background: #243b53; }
nav a, nav .brand, nav .who { color: #f0f4f8; text-decoration: none; }
nav .brand { font-weight: 700; margin-right: 1rem; }
nav .who { margin-left: auto; font-size: .9rem; }
main { max-width: 1100px; margin: 1.5rem auto; padding: 0 1.2rem; }
table { width: 100%; border-collapse: collapse; background: #fff; margin-bottom: 1.5rem; }
th, td { padding: .45rem .6rem; border-bottom: 1px solid #d9e2ec; text-align: left; }
td.empty { color: #829ab1; font-style: italic; }
.flash { padding: .6rem .9rem; border-radius: 4px; margin-bottom: 1rem; }
.flash-success { background: #e3f9e5; color: #0e5814; }
.flash-error { background: #ffe3e3; color: #8a1c1c; }
.flash-info { background: #e6f6ff; color: #035388; }
form.stacked { display: grid; gap: .8rem; max-width: 520px; background: #fff; padding: 1rem; }
form.stacked label { display: grid; gap: .25rem; font-weight: 600; }
form.stacked label.check { display: flex; font-weight: 400; }
form.inline { display: inline; }
form.filters { display: flex; gap: .6rem; align-items: end; margin-bottom: 1rem; }
input.invalid { border-color: #cf1124; }
.field-error { color: #cf1124; font-weight: 400; font-size: .85rem; }
.badge { padding: .1rem .45rem; border-radius: 3px; font-size: .8rem; }
.badge-ok { background: #e3f9e5; color: #0e5814; }
.badge-warn { background: #fff3c4; color: #8d2b0b; }
dl.details { display: grid; grid-template-columns: max-content 1fr; gap: .3rem 1rem; }
dl.details dt { font-weight: 600; }
.cards { display: flex; flex-wrap: wrap; gap: 1rem; }
.card { background: #fff; padding: 1rem 1.4rem; min-width: 150px; }
.card strong { display: block; font-size: 1.8rem; }
"#;
