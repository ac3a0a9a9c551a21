use cookie::Cookie;
use hyper::HeaderMap;

use crate::auth::{SessionManager, ValidatedSession};
use crate::metastore::StoreError;
use crate::metrics::SharedMetrics;

/// Result of authenticating a request by its session cookie
#[derive(Debug)]
pub struct AuthOutcome {
    pub session: Option<ValidatedSession>,
    /// Cookie the response has to carry: the renewed session cookie, or the blank
    /// cookie when the client holds a dead token
    pub cookie: Option<Cookie<'static>>,
}

/// Session cookie authentication for API requests
#[derive(Debug, Clone)]
pub struct RequestAuth {
    sessions: SessionManager,
    metrics: SharedMetrics,
}

impl RequestAuth {
    pub fn new(sessions: SessionManager, metrics: SharedMetrics) -> Self {
        Self { sessions, metrics }
    }

    /// Validates the session named by the request's cookie
    #[tracing::instrument(skip_all, fields(user_id, renewed))]
    pub fn validate_request(&self, headers: &HeaderMap) -> Result<AuthOutcome, StoreError> {
        let Some(token) = SessionManager::read_session_cookie(headers) else {
            return Ok(AuthOutcome {
                session: None,
                cookie: None,
            });
        };

        match self.sessions.validate_session(&token)? {
            Some(validated) => {
                let span = tracing::Span::current();
                span.record("user_id", tracing::field::display(&validated.user.user_id));
                span.record("renewed", validated.session.fresh);

                let cookie = if validated.session.fresh {
                    self.metrics.record_session_renewed();
                    Some(self.sessions.create_session_cookie(&validated.session.id))
                } else {
                    None
                };
                Ok(AuthOutcome {
                    session: Some(validated),
                    cookie,
                })
            }
            None => {
                tracing::debug!("Request carried an invalid session cookie");
                Ok(AuthOutcome {
                    session: None,
                    cookie: Some(self.sessions.create_blank_session_cookie()),
                })
            }
        }
    }
}
