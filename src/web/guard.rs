//! Session cookie handling and the per-group access middleware.
//!
//! Each route group is wrapped with one of the `require_*` functions below,
//! so handlers never check roles themselves. A successful check stores a
//! [`RequestContext`] in the request extensions.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::auth::{CurrentUser, Role};
use crate::error::AppError;
use crate::session::{FlashKind, Session};
use crate::AppState;

pub const SESSION_COOKIE: &str = "scolarite_session";

/// Signed-in user attached to a school, available to every protected handler.
#[derive(Clone)]
pub struct RequestContext {
    pub user: CurrentUser,
    pub school_id: i64,
    pub session: Arc<Session>,
}

impl RequestContext {
    pub fn flash(&self, kind: FlashKind, message: impl Into<String>) {
        self.session.flash(kind, message);
    }

    /// Post/redirect/get: queue a message and send the browser to `to`.
    pub fn redirect_with(&self, kind: FlashKind, message: impl Into<String>, to: &str) -> Response {
        self.session.flash(kind, message);
        Redirect::to(to).into_response()
    }
}

/// Signed-in user that may not have a school yet; only the setup screen uses it.
#[derive(Clone)]
pub struct SessionContext {
    pub user: CurrentUser,
    pub session: Arc<Session>,
}

pub fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn session_cookie(session_id: &str, secure: bool) -> HeaderValue {
    let secure = if secure { "; Secure" } else { "" };
    let cookie = format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax{secure}");
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

pub fn clear_session_cookie(secure: bool) -> HeaderValue {
    if secure {
        HeaderValue::from_static(
            "scolarite_session=; Path=/; HttpOnly; SameSite=Lax; Secure; Max-Age=0",
        )
    } else {
        HeaderValue::from_static("scolarite_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
    }
}

fn current_session(state: &AppState, headers: &HeaderMap) -> Result<Arc<Session>, AppError> {
    session_id_from_headers(headers)
        .and_then(|id| state.sessions.get(&id))
        .ok_or(AppError::Unauthenticated)
}

fn authorize(state: &AppState, req: &mut Request, roles: &[Role]) -> Result<(), AppError> {
    let session = current_session(state, req.headers())?;
    let user = session.user();
    let Some(school_id) = user.school_id else {
        return Err(if user.role == Role::Admin {
            AppError::SchoolSetupRequired
        } else {
            AppError::Forbidden("Aucun établissement n'est associé à votre compte.".to_string())
        });
    };
    if !roles.contains(&user.role) {
        tracing::info!(
            user_id = user.user_id,
            role = user.role.as_str(),
            path = %req.uri().path(),
            "access denied"
        );
        return Err(AppError::Forbidden(
            "Accès refusé : votre rôle ne permet pas cette action.".to_string(),
        ));
    }
    req.extensions_mut().insert(RequestContext {
        user,
        school_id,
        session,
    });
    Ok(())
}

/// Any signed-in user of a configured school.
pub async fn require_reader(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    authorize(&state, &mut req, &Role::ALL)?;
    Ok(next.run(req).await)
}

/// Admin, direction and secretariat.
pub async fn require_enrollment_staff(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    authorize(&state, &mut req, &Role::ENROLLMENT_STAFF)?;
    Ok(next.run(req).await)
}

/// Admin and direction.
pub async fn require_management(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    authorize(&state, &mut req, &Role::MANAGEMENT)?;
    Ok(next.run(req).await)
}

/// Signed-in administrator, school optional.
pub async fn require_admin_login(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let session = current_session(&state, req.headers())?;
    let user = session.user();
    if user.role != Role::Admin {
        return Err(AppError::Forbidden(
            "Seul un administrateur peut configurer l'établissement.".to_string(),
        ));
    }
    req.extensions_mut().insert(SessionContext { user, session });
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_session_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; scolarite_session=abc123; lang=fr"),
        );
        assert_eq!(session_id_from_headers(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn missing_or_empty_cookie_is_none() {
        let mut headers = HeaderMap::new();
        assert!(session_id_from_headers(&headers).is_none());
        headers.insert(header::COOKIE, HeaderValue::from_static("scolarite_session="));
        assert!(session_id_from_headers(&headers).is_none());
    }

    #[test]
    fn session_cookie_is_http_only() {
        let value = session_cookie("xyz", false);
        let text = value.to_str().expect("ascii cookie");
        assert!(text.starts_with("scolarite_session=xyz"));
        assert!(text.contains("HttpOnly"));
        assert!(text.contains("SameSite=Lax"));
        assert!(!text.contains("Secure"));
    }

    #[test]
    fn secure_flag_is_set_behind_tls() {
        let set = session_cookie("xyz", true);
        assert!(set.to_str().expect("ascii cookie").ends_with("; Secure"));
        let cleared = clear_session_cookie(true);
        let text = cleared.to_str().expect("ascii cookie");
        assert!(text.contains("Secure"));
        assert!(text.contains("Max-Age=0"));
    }
}
