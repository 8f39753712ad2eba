use crate::auth::CurrentUser;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashKind {
    Success,
    Error,
    Info,
}

impl FlashKind {
    pub fn css_class(self) -> &'static str {
        match self {
            FlashKind::Success => "flash-success",
            FlashKind::Error => "flash-error",
            FlashKind::Info => "flash-info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    pub kind: FlashKind,
    pub message: String,
}

/// A signed-in browser session.
pub struct Session {
    pub id: String,
    last_activity: AtomicU64,
    user: RwLock<CurrentUser>,
    flashes: Mutex<Vec<Flash>>,
}

impl Session {
    fn new(id: String, user: CurrentUser) -> Self {
        Self {
            id,
            last_activity: AtomicU64::new(now_timestamp()),
            user: RwLock::new(user),
            flashes: Mutex::new(Vec::new()),
        }
    }

    pub fn touch(&self) {
        self.last_activity.store(now_timestamp(), Ordering::SeqCst);
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        let last = self.last_activity.load(Ordering::SeqCst);
        now_timestamp().saturating_sub(last) > timeout.as_secs()
    }

    pub fn user(&self) -> CurrentUser {
        self.user.read().clone()
    }

    pub fn set_school(&self, school_id: i64) {
        self.user.write().school_id = Some(school_id);
    }

    pub fn flash(&self, kind: FlashKind, message: impl Into<String>) {
        self.flashes.lock().push(Flash {
            kind,
            message: message.into(),
        });
    }

    /// Messages queued by earlier requests; the queue is emptied.
    pub fn take_flashes(&self) -> Vec<Flash> {
        std::mem::take(&mut *self.flashes.lock())
    }
}

fn now_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
    timeout: Duration,
}

impl SessionStore {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            timeout,
        }
    }

    pub fn create(&self, user: CurrentUser) -> Arc<Session> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let session = Arc::new(Session::new(id.clone(), user));
        self.sessions.insert(id, session.clone());
        session
    }

    /// Looks a session up and refreshes its activity time. Expired sessions are dropped.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.get(id).map(|entry| entry.clone())?;
        if session.is_expired(self.timeout) {
            self.sessions.remove(id);
            return None;
        }
        session.touch();
        Some(session)
    }

    pub fn delete(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn cleanup_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| !session.is_expired(self.timeout));
        before.saturating_sub(self.sessions.len())
    }
}

/// Periodically evicts expired sessions.
pub async fn cleanup_task(store: Arc<SessionStore>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let cleaned = store.cleanup_expired();
        if cleaned > 0 {
            tracing::info!(cleaned, "expired sessions removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    fn user() -> CurrentUser {
        CurrentUser {
            user_id: 1,
            email: "a@b.c".into(),
            name: "A".into(),
            role: Role::Admin,
            school_id: None,
        }
    }

    #[test]
    fn flashes_are_consumed_once() {
        let store = SessionStore::new(Duration::from_secs(60));
        let s = store.create(user());
        s.flash(FlashKind::Success, "ok");
        assert_eq!(s.take_flashes().len(), 1);
        assert!(s.take_flashes().is_empty());
    }

    #[test]
    fn sessions_can_be_deleted_and_updated() {
        let store = SessionStore::new(Duration::from_secs(60));
        let s = store.create(user());
        s.set_school(9);
        let again = store.get(&s.id).expect("session");
        assert_eq!(again.user().school_id, Some(9));
        assert!(store.delete(&s.id));
        assert!(store.get(&s.id).is_none());
        assert_eq!(store.len(), 0);
    }
}
