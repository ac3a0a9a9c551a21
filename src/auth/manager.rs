//! Session lifecycle: creation, validation with sliding renewal, invalidation,
//! and the cookies that carry a session to the client.
//!
//! A session moves through `Created -> Valid -> (Renewed)* -> Expired | Invalidated`.
//! Expiry is only noticed when a session is validated; nothing sweeps in the
//! background.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use cookie::{Cookie, SameSite};
use hyper::header::{self, HeaderMap};
use tracing::{debug, warn};

use super::session::{Session, SessionStore};
use super::user_store::{UserRecord, UserStore};
use crate::metastore::{Store, StoreError};

/// Name of the cookie holding the session token
pub const SESSION_COOKIE_NAME: &str = "auth_session";

/// Default session lifetime: 1 hour
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

/// Session policy settings
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Lifetime of a session, and the extension applied on renewal
    pub ttl: Duration,
    /// Mark cookies `Secure` (production)
    pub secure_cookies: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_SESSION_TTL,
            secure_cookies: false,
        }
    }
}

/// A session that passed validation, together with its owner
#[derive(Debug, Clone)]
pub struct ValidatedSession {
    pub user: UserRecord,
    pub session: Session,
}

/// Creates, validates and invalidates sessions
#[derive(Debug, Clone)]
pub struct SessionManager {
    sessions: SessionStore,
    users: UserStore,
    ttl: TimeDelta,
    ttl_secs: i64,
    secure_cookies: bool,
}

impl SessionManager {
    pub fn new(store: Arc<dyn Store>, config: SessionConfig) -> Self {
        // Clamp so the chrono conversion can't overflow; no sane TTL gets near this.
        let ttl_secs = i64::try_from(config.ttl.as_secs())
            .unwrap_or(i64::MAX)
            .clamp(1, i64::from(u32::MAX));

        Self {
            sessions: SessionStore::new(store.clone()),
            users: UserStore::new(store),
            ttl: TimeDelta::seconds(ttl_secs),
            ttl_secs,
            secure_cookies: config.secure_cookies,
        }
    }

    /// Session lifetime in whole seconds
    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    /// Creates and stores a new session for the user
    pub fn create_session(&self, user_id: &str) -> Result<Session, StoreError> {
        self.create_session_at(user_id, Utc::now())
    }

    pub fn create_session_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        let session = Session {
            id: SessionStore::generate_session_id(),
            user_id: user_id.to_string(),
            expires_at: now + self.ttl,
            fresh: true,
        };
        self.sessions.insert(&session)?;

        debug!(user_id = %user_id, expires_at = %session.expires_at, "Created session");
        Ok(session)
    }

    /// Looks up a session token.
    ///
    /// Returns `None` for unknown or expired tokens and for sessions whose user is
    /// gone; the latter two are deleted on the way. A session validated in the
    /// second half of its lifetime is extended by a full TTL and comes back with
    /// `fresh` set, so the caller can reissue the cookie.
    pub fn validate_session(&self, token: &str) -> Result<Option<ValidatedSession>, StoreError> {
        self.validate_session_at(token, Utc::now())
    }

    pub fn validate_session_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ValidatedSession>, StoreError> {
        if token.is_empty() {
            return Ok(None);
        }

        let mut session = match self.sessions.get(token)? {
            Some(session) => session,
            None => return Ok(None),
        };

        if session.is_expired_at(now) {
            debug!(user_id = %session.user_id, "Session is expired");
            self.sessions.delete(token)?;
            return Ok(None);
        }

        let user = match self.users.get_user_by_id(&session.user_id)? {
            Some(user) => user,
            None => {
                warn!(user_id = %session.user_id, "Session valid but user not found");
                self.sessions.delete(token)?;
                return Ok(None);
            }
        };

        if now >= session.expires_at - self.ttl / 2 {
            let expires_at = now + self.ttl;
            if !self.sessions.update_expiry(token, &session.user_id, expires_at)? {
                // Invalidated between the read and the renewal
                return Ok(None);
            }
            debug!(user_id = %session.user_id, expires_at = %expires_at, "Renewed session");
            session.expires_at = expires_at;
            session.fresh = true;
        }

        Ok(Some(ValidatedSession { user, session }))
    }

    /// Deletes one session. Returns 1 if a live session was removed, 0 otherwise.
    pub fn invalidate_session(&self, token: &str) -> Result<usize, StoreError> {
        let now = Utc::now();
        let removed = self.sessions.delete(token)?;
        Ok(usize::from(removed.is_some_and(|session| !session.is_expired_at(now))))
    }

    /// Deletes every session of the user ("sign out everywhere").
    ///
    /// Returns the number of live sessions this call removed.
    pub fn invalidate_all_user_sessions(&self, user_id: &str) -> Result<usize, StoreError> {
        let now = Utc::now();
        let removed = self.sessions.delete_user_sessions(user_id)?;
        Ok(removed.iter().filter(|session| !session.is_expired_at(now)).count())
    }

    /// Number of live sessions the user currently has
    pub fn count_user_sessions(&self, user_id: &str) -> Result<usize, StoreError> {
        self.count_user_sessions_at(user_id, Utc::now())
    }

    pub fn count_user_sessions_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        Ok(self
            .sessions
            .user_sessions(user_id)?
            .iter()
            .filter(|session| !session.is_expired_at(now))
            .count())
    }

    /// Removes all expired session records
    pub fn delete_expired_sessions(&self) -> Result<usize, StoreError> {
        self.sessions.delete_expired(Utc::now())
    }

    /// Cookie that hands the session token to the client
    pub fn create_session_cookie(&self, token: &str) -> Cookie<'static> {
        self.session_cookie(token.to_string(), self.ttl_secs)
    }

    /// Cookie that makes the client drop its session cookie immediately
    pub fn create_blank_session_cookie(&self) -> Cookie<'static> {
        self.session_cookie(String::new(), 0)
    }

    fn session_cookie(&self, value: String, max_age_secs: i64) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE_NAME, value))
            .path("/")
            .max_age(cookie::time::Duration::seconds(max_age_secs))
            .http_only(true)
            .secure(self.secure_cookies)
            .same_site(SameSite::Lax)
            .build()
    }

    /// Extracts the session token from the request's `Cookie` headers
    pub fn read_session_cookie(headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(Cookie::split_parse)
            .filter_map(Result::ok)
            .find(|cookie| cookie.name() == SESSION_COOKIE_NAME)
            .map(|cookie| cookie.value().to_string())
            .filter(|value| !value.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metastore::MemoryStore;
    use hyper::header::HeaderValue;

    fn setup(ttl_secs: u64) -> (SessionManager, UserStore, UserRecord) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let users = UserStore::new(store.clone());
        let user = UserRecord::new(
            "alice".to_string(),
            "alice@example.com".to_string(),
            None,
            "$2b$04$notarealhash".to_string(),
        );
        users.create_user(&user).unwrap();

        let config = SessionConfig {
            ttl: Duration::from_secs(ttl_secs),
            secure_cookies: false,
        };
        (SessionManager::new(store, config), users, user)
    }

    #[test]
    fn test_validate_right_after_create() {
        let (manager, _, user) = setup(3600);
        let session = manager.create_session(&user.user_id).unwrap();
        assert!(session.fresh);

        let validated = manager.validate_session(&session.id).unwrap().unwrap();
        assert_eq!(validated.user, user);
        assert_eq!(validated.session.id, session.id);
        assert!(!validated.session.fresh);
        assert!(!validated.session.is_expired_at(Utc::now()));
    }

    #[test]
    fn test_unknown_and_empty_tokens() {
        let (manager, _, _) = setup(3600);
        assert!(manager.validate_session("does-not-exist").unwrap().is_none());
        assert!(manager.validate_session("").unwrap().is_none());
    }

    #[test]
    fn test_invalidated_session_is_gone() {
        let (manager, _, user) = setup(3600);
        let session = manager.create_session(&user.user_id).unwrap();

        assert_eq!(manager.invalidate_session(&session.id).unwrap(), 1);
        assert!(manager.validate_session(&session.id).unwrap().is_none());
        // idempotent
        assert_eq!(manager.invalidate_session(&session.id).unwrap(), 0);
    }

    #[test]
    fn test_invalidate_all_user_sessions() {
        let (manager, users, user) = setup(3600);
        let bob = UserRecord::new(
            "bob".to_string(),
            "bob@example.com".to_string(),
            None,
            String::new(),
        );
        users.create_user(&bob).unwrap();

        manager.create_session(&user.user_id).unwrap();
        manager.create_session(&user.user_id).unwrap();
        let bobs = manager.create_session(&bob.user_id).unwrap();
        assert_eq!(manager.count_user_sessions(&user.user_id).unwrap(), 2);

        assert_eq!(manager.invalidate_all_user_sessions(&user.user_id).unwrap(), 2);
        assert_eq!(manager.count_user_sessions(&user.user_id).unwrap(), 0);
        assert_eq!(manager.invalidate_all_user_sessions(&user.user_id).unwrap(), 0);
        assert!(manager.validate_session(&bobs.id).unwrap().is_some());
    }

    #[test]
    fn test_no_renewal_early_in_lifetime() {
        let (manager, _, user) = setup(3600);
        let start = Utc::now();
        let session = manager.create_session_at(&user.user_id, start).unwrap();

        let validated = manager
            .validate_session_at(&session.id, start + TimeDelta::minutes(10))
            .unwrap()
            .unwrap();
        assert!(!validated.session.fresh);
        assert_eq!(
            validated.session.expires_at.timestamp_millis(),
            session.expires_at.timestamp_millis()
        );
    }

    #[test]
    fn test_renewal_inside_window() {
        let (manager, _, user) = setup(3600);
        let start = Utc::now();
        let session = manager.create_session_at(&user.user_id, start).unwrap();

        let late = start + TimeDelta::minutes(45);
        let validated = manager.validate_session_at(&session.id, late).unwrap().unwrap();
        assert!(validated.session.fresh);
        assert_eq!(validated.session.expires_at, late + TimeDelta::hours(1));

        // The extension is persisted: still valid past the original expiry
        let after_original = start + TimeDelta::minutes(70);
        let validated = manager
            .validate_session_at(&session.id, after_original)
            .unwrap()
            .unwrap();
        assert!(!validated.session.fresh);
    }

    #[test]
    fn test_expired_session_is_deleted() {
        let (manager, _, user) = setup(60);
        let start = Utc::now();
        let session = manager.create_session_at(&user.user_id, start).unwrap();

        let expired = manager
            .validate_session_at(&session.id, start + TimeDelta::seconds(60))
            .unwrap();
        assert!(expired.is_none());
        // Record was removed, so even an earlier clock no longer finds it
        assert!(manager.validate_session_at(&session.id, start).unwrap().is_none());
    }

    #[test]
    fn test_count_ignores_expired_sessions() {
        let (manager, _, user) = setup(60);
        let start = Utc::now() - TimeDelta::minutes(5);
        manager.create_session_at(&user.user_id, start).unwrap();
        manager.create_session(&user.user_id).unwrap();

        assert_eq!(manager.count_user_sessions(&user.user_id).unwrap(), 1);
        assert_eq!(manager.invalidate_all_user_sessions(&user.user_id).unwrap(), 1);
    }

    #[test]
    fn test_delete_expired_sessions() {
        let (manager, _, user) = setup(60);
        manager
            .create_session_at(&user.user_id, Utc::now() - TimeDelta::minutes(5))
            .unwrap();
        let live = manager.create_session(&user.user_id).unwrap();

        assert_eq!(manager.delete_expired_sessions().unwrap(), 1);
        assert!(manager.validate_session(&live.id).unwrap().is_some());
    }

    #[test]
    fn test_session_of_deleted_user_is_rejected() {
        let (manager, _, _) = setup(3600);
        let session = manager.create_session("no-such-user").unwrap();

        assert!(manager.validate_session(&session.id).unwrap().is_none());
        assert_eq!(manager.count_user_sessions("no-such-user").unwrap(), 0);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let (manager, _, _) = setup(3600);
        let cookie = manager.create_session_cookie("token123");

        assert_eq!(cookie.name(), SESSION_COOKIE_NAME);
        assert_eq!(cookie.value(), "token123");
        assert_eq!(cookie.max_age(), Some(cookie::time::Duration::seconds(3600)));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert!(!cookie.to_string().contains("Secure"));

        let blank = manager.create_blank_session_cookie();
        assert_eq!(blank.value(), "");
        assert_eq!(blank.max_age(), Some(cookie::time::Duration::ZERO));
    }

    #[test]
    fn test_secure_cookies_in_production() {
        let config = SessionConfig {
            ttl: DEFAULT_SESSION_TTL,
            secure_cookies: true,
        };
        let manager = SessionManager::new(Arc::new(MemoryStore::new()), config);

        assert_eq!(manager.create_session_cookie("t").secure(), Some(true));
        assert_eq!(manager.create_blank_session_cookie().secure(), Some(true));
    }

    #[test]
    fn test_read_session_cookie() {
        let mut headers = HeaderMap::new();
        assert_eq!(SessionManager::read_session_cookie(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; auth_session=abc123"));
        assert_eq!(SessionManager::read_session_cookie(&headers), Some("abc123".to_string()));

        headers.insert(header::COOKIE, HeaderValue::from_static("auth_session="));
        assert_eq!(SessionManager::read_session_cookie(&headers), None);
    }
}
