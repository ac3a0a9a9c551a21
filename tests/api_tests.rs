use std::sync::Arc;

use bytes::Bytes;
use cookie::Cookie;
use http_body_util::{BodyExt, Full};
use hyper::header::{self, HeaderMap};
use hyper::{Method, Request, StatusCode};
use serde_json::{json, Value};

use chrono::{Duration, Utc};
use notes_api::auth::{
    PasswordHasher, Session, SessionConfig, SessionStore, UserStore, SESSION_COOKIE_NAME,
};
use notes_api::http::{ApiService, MAX_BODY_BYTES};
use notes_api::metastore::{MemoryStore, Store};
use notes_api::metrics::SharedMetrics;

struct TestApp {
    service: ApiService,
    store: Arc<dyn Store>,
}

struct TestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl TestResponse {
    fn session_cookie(&self) -> Option<Cookie<'static>> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| Cookie::parse(value.to_string()).ok())
            .find(|cookie| cookie.name() == SESSION_COOKIE_NAME)
    }
}

impl TestApp {
    fn new() -> Self {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let service = ApiService::new(
            store.clone(),
            SessionConfig::default(),
            PasswordHasher::new(4),
            SharedMetrics::new().unwrap(),
        );
        Self { service, store }
    }

    async fn send_raw(
        &self,
        method: Method,
        uri: &str,
        body: Bytes,
        token: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::COOKIE, format!("{}={}", SESSION_COOKIE_NAME, token));
        }
        let req = builder.body(Full::new(body)).unwrap();

        let response = self.service.handle_request(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        TestResponse { status, headers, body }
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        let body = body.map(|b| Bytes::from(b.to_string())).unwrap_or_default();
        self.send_raw(method, uri, body, token).await
    }

    async fn signup(&self, username: &str, email: &str, password: &str) -> TestResponse {
        let body = json!({ "username": username, "email": email, "password": password });
        self.send(Method::POST, "/api/signup", Some(body), None).await
    }

    async fn signin(&self, email: &str, password: &str) -> TestResponse {
        let body = json!({ "email": email, "password": password });
        self.send(Method::POST, "/api/signin", Some(body), None).await
    }

    fn user_count(&self) -> usize {
        UserStore::new(self.store.clone()).count_users().unwrap()
    }

    fn session_count(&self) -> usize {
        SessionStore::new(self.store.clone()).total_session_count().unwrap()
    }
}

#[tokio::test]
async fn test_full_session_scenario() {
    let app = TestApp::new();

    let signup = app.signup("alice", "alice@example.com", "password123").await;
    assert_eq!(signup.status, StatusCode::CREATED);
    assert_eq!(signup.body, json!({ "expiresIn": 3600 }));
    let first = signup.session_cookie().expect("signup sets a session cookie");
    assert!(!first.value().is_empty());

    let wrong = app.signin("alice@example.com", "wrongpassword").await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.body["message"], "Invalid credentials.");
    assert!(wrong.session_cookie().is_none());

    let signin = app.signin("alice@example.com", "password123").await;
    assert_eq!(signin.status, StatusCode::OK);
    assert_eq!(signin.body, json!({ "expiresIn": 3600 }));
    let second = signin.session_cookie().expect("signin sets a session cookie");
    assert_ne!(first.value(), second.value());

    let signout = app
        .send(Method::POST, "/api/signout?all=true", None, Some(second.value()))
        .await;
    assert_eq!(signout.status, StatusCode::OK);
    assert_eq!(signout.body, json!({ "count": 2 }));
    let blank = signout.session_cookie().expect("signout blanks the cookie");
    assert_eq!(blank.value(), "");
    assert_eq!(blank.max_age(), Some(cookie::time::Duration::ZERO));

    let user = app.send(Method::GET, "/api/user", None, Some(first.value())).await;
    assert_eq!(user.status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.session_count(), 0);
}

#[tokio::test]
async fn test_session_cookie_attributes() {
    let app = TestApp::new();
    let signup = app.signup("alice", "alice@example.com", "password123").await;

    let raw = signup.headers.get(header::SET_COOKIE).unwrap().to_str().unwrap().to_string();
    assert!(raw.starts_with("auth_session="));
    assert!(raw.contains("HttpOnly"));
    assert!(raw.contains("SameSite=Lax"));
    assert!(raw.contains("Path=/"));
    assert!(raw.contains("Max-Age=3600"));
    assert!(!raw.contains("Secure"));
}

#[tokio::test]
async fn test_duplicate_email_conflicts() {
    let app = TestApp::new();
    let first = app.signup("alice", "alice@example.com", "password123").await;
    assert_eq!(first.status, StatusCode::CREATED);

    let again = app.signup("alice2", "Alice@Example.com", "password456").await;
    assert_eq!(again.status, StatusCode::CONFLICT);
    assert_eq!(again.body["message"], "Email already used.");
    assert!(again.session_cookie().is_none());
    assert_eq!(app.user_count(), 1);
    assert_eq!(app.session_count(), 1);
}

#[tokio::test]
async fn test_failed_signin_creates_no_session() {
    let app = TestApp::new();
    app.signup("alice", "alice@example.com", "password123").await;
    let before = app.session_count();

    assert_eq!(
        app.signin("alice@example.com", "wrongpassword").await.status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        app.signin("nobody@example.com", "password123").await.status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(app.session_count(), before);
}

#[tokio::test]
async fn test_signout_requires_session() {
    let app = TestApp::new();

    let response = app.send(Method::POST, "/api/signout", None, None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["message"], "You are not signed in.");
    assert!(response.session_cookie().is_none());

    let stale = app.send(Method::POST, "/api/signout", None, Some("deadbeef")).await;
    assert_eq!(stale.status, StatusCode::UNAUTHORIZED);
    assert_eq!(stale.session_cookie().unwrap().value(), "");
}

#[tokio::test]
async fn test_signout_single_session() {
    let app = TestApp::new();
    let signup = app.signup("alice", "alice@example.com", "password123").await;
    let first = signup.session_cookie().unwrap();
    let second = app.signin("alice@example.com", "password123").await.session_cookie().unwrap();

    let signout = app.send(Method::POST, "/api/signout", None, Some(first.value())).await;
    assert_eq!(signout.status, StatusCode::OK);
    assert_eq!(signout.body, json!({ "count": 1 }));

    let user = app.send(Method::GET, "/api/user", None, Some(second.value())).await;
    assert_eq!(user.status, StatusCode::OK);
    assert_eq!(user.body["sessions"], 1);

    // Signing out the same session again finds nothing to sign out
    let again = app.send(Method::POST, "/api/signout", None, Some(first.value())).await;
    assert_eq!(again.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signout_rejects_bad_flag() {
    let app = TestApp::new();
    let signup = app.signup("alice", "alice@example.com", "password123").await;
    let cookie = signup.session_cookie().unwrap();

    let response = app
        .send(Method::POST, "/api/signout?all=maybe", None, Some(cookie.value()))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(app.session_count(), 1);
}

#[tokio::test]
async fn test_current_user() {
    let app = TestApp::new();
    let body = json!({
        "username": "alice",
        "email": "alice@example.com",
        "name": "Alice",
        "password": "password123"
    });
    let cookie = app
        .send(Method::POST, "/api/signup", Some(body), None)
        .await
        .session_cookie()
        .unwrap();

    let user = app.send(Method::GET, "/api/user", None, Some(cookie.value())).await;
    assert_eq!(user.status, StatusCode::OK);
    assert_eq!(user.body["username"], "alice");
    assert_eq!(user.body["email"], "alice@example.com");
    assert_eq!(user.body["name"], "Alice");
    assert_eq!(user.body["sessions"], 1);
    assert!(user.body["id"].as_str().is_some_and(|id| !id.is_empty()));
    // Well inside its lifetime the session is not renewed
    assert!(user.session_cookie().is_none());

    let anonymous = app.send(Method::GET, "/api/user", None, None).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
    assert!(anonymous.session_cookie().is_none());
}

#[tokio::test]
async fn test_current_user_renews_session_near_expiry() {
    let app = TestApp::new();
    app.signup("alice", "alice@example.com", "password123").await;
    let user = UserStore::new(app.store.clone())
        .get_user_by_email("alice@example.com")
        .unwrap()
        .unwrap();

    let sessions = SessionStore::new(app.store.clone());
    let near_expiry = Session {
        id: SessionStore::generate_session_id(),
        user_id: user.user_id,
        expires_at: Utc::now() + Duration::minutes(10),
        fresh: false,
    };
    sessions.insert(&near_expiry).unwrap();

    let response = app.send(Method::GET, "/api/user", None, Some(&near_expiry.id)).await;
    assert_eq!(response.status, StatusCode::OK);

    let reissued = response.session_cookie().expect("renewal reissues the session cookie");
    assert_eq!(reissued.value(), near_expiry.id);
    assert_eq!(reissued.max_age(), Some(cookie::time::Duration::seconds(3600)));

    let stored = sessions.get(&near_expiry.id).unwrap().unwrap();
    assert!(stored.expires_at > Utc::now() + Duration::minutes(59));
}

#[tokio::test]
async fn test_validation_errors() {
    let app = TestApp::new();

    let short = app.signup("al", "alice@example.com", "password123").await;
    assert_eq!(short.status, StatusCode::BAD_REQUEST);
    assert_eq!(short.body["message"], "Validation failed.");
    assert!(short.body["details"].as_str().unwrap().contains("username"));

    let bad_email = app.signup("alice", "alice", "password123").await;
    assert_eq!(bad_email.status, StatusCode::BAD_REQUEST);
    let short_password = app.signup("alice", "alice@example.com", "short").await;
    assert_eq!(short_password.status, StatusCode::BAD_REQUEST);
    let long_password = app.signin("alice@example.com", &"p".repeat(33)).await;
    assert_eq!(long_password.status, StatusCode::BAD_REQUEST);

    let missing = app
        .send(Method::POST, "/api/signup", Some(json!({ "username": "alice" })), None)
        .await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);

    let garbage = app
        .send_raw(Method::POST, "/api/signin", Bytes::from_static(b"not json"), None)
        .await;
    assert_eq!(garbage.status, StatusCode::BAD_REQUEST);

    assert_eq!(app.user_count(), 0);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let app = TestApp::new();
    let body = Bytes::from(vec![b' '; MAX_BODY_BYTES + 1]);

    let response = app.send_raw(Method::POST, "/api/signup", body, None).await;
    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_routing() {
    let app = TestApp::new();

    let health = app.send(Method::GET, "/api/health", None, None).await;
    assert_eq!(health.status, StatusCode::OK);
    assert_eq!(health.body, json!({ "status": "healthy" }));

    let root = app.send(Method::GET, "/api", None, None).await;
    assert_eq!(root.status, StatusCode::OK);
    assert!(root.body["endpoints"].is_object());

    let missing = app.send(Method::GET, "/api/notes", None, None).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.body, json!({ "message": "Not Found" }));

    let wrong_method = app.send(Method::GET, "/api/signin", None, None).await;
    assert_eq!(wrong_method.status, StatusCode::METHOD_NOT_ALLOWED);
    assert!(wrong_method.body["message"].is_string());
}
