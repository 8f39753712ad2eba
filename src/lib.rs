//! scolarited: school back office.
//!
//! Server-rendered CRUD for classes, students, enrollments ("inscriptions"),
//! subjects ("matières") and teacher assignments, over SQLite.

pub mod auth;
pub mod backup;
pub mod config;
pub mod db;
pub mod enrollment;
pub mod error;
pub mod legacy;
pub mod records;
pub mod school_year;
pub mod secure_id;
pub mod session;
pub mod web;

pub use config::{AppConfig, Args};
pub use error::AppError;
pub use web::create_router;

use rusqlite::Connection;
use std::sync::Arc;

use crate::secure_id::{IdCodec, KeyedIdCodec};
use crate::session::SessionStore;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub sessions: Arc<SessionStore>,
    pub ids: Arc<dyn IdCodec>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let ids = Arc::new(KeyedIdCodec::new(&config.id_secret));
        Self::with_codec(config, ids)
    }

    pub fn with_codec(config: AppConfig, ids: Arc<dyn IdCodec>) -> Self {
        Self {
            sessions: Arc::new(SessionStore::new(config.session_timeout)),
            config,
            ids,
        }
    }

    /// Runs `f` on a fresh connection on the blocking pool.
    pub async fn db<F, T>(&self, f: F) -> error::Result<T>
    where
        F: FnOnce(&mut Connection) -> error::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.config.database.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db::connect(&path)?;
            f(&mut conn)
        })
        .await?
    }

    pub fn token(&self, scope: &str, id: i64) -> String {
        self.ids.encode(scope, id)
    }

    /// Decodes a path or form token; unknown or forged tokens are a 404.
    pub fn decode(&self, scope: &str, token: &str) -> error::Result<i64> {
        self.ids
            .decode(scope, token)
            .ok_or_else(|| AppError::NotFound("Ressource introuvable".to_string()))
    }

    /// Like [`decode`](Self::decode) for optional select values; blank means none.
    pub fn decode_optional(&self, scope: &str, token: &str) -> error::Result<Option<i64>> {
        if token.trim().is_empty() {
            return Ok(None);
        }
        self.decode(scope, token).map(Some)
    }
}
