mod auth;
pub mod error;
pub mod middleware;
pub mod responses;
mod user;
pub mod validation;

pub use error::ApiError;
pub use middleware::{AuthOutcome, RequestAuth};

use std::convert::Infallible;
use std::error::Error as StdError;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::{Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::auth::{PasswordHasher, SessionConfig, SessionManager, UserStore};
use crate::metastore::Store;
use crate::metrics::SharedMetrics;

pub type HttpResponse = Response<Full<Bytes>>;

/// Upper bound on accepted request bodies
pub const MAX_BODY_BYTES: usize = 64 * 1024;

const KNOWN_PATHS: &[&str] = &[
    "/",
    "/api",
    "/api/health",
    "/api/signup",
    "/api/signin",
    "/api/signout",
    "/api/user",
];

/// Everything a handler needs, shared by all connections
pub(crate) struct ApiContext {
    pub users: UserStore,
    pub sessions: SessionManager,
    pub request_auth: RequestAuth,
    pub hasher: PasswordHasher,
    pub metrics: SharedMetrics,
}

/// JSON API service
#[derive(Clone)]
pub struct ApiService {
    ctx: Arc<ApiContext>,
}

impl ApiService {
    pub fn new(
        store: Arc<dyn Store>,
        session_config: SessionConfig,
        hasher: PasswordHasher,
        metrics: SharedMetrics,
    ) -> Self {
        let sessions = SessionManager::new(store.clone(), session_config);
        let request_auth = RequestAuth::new(sessions.clone(), metrics.clone());
        Self {
            ctx: Arc::new(ApiContext {
                users: UserStore::new(store),
                sessions,
                request_auth,
                hasher,
                metrics,
            }),
        }
    }

    /// Main request handler
    pub async fn handle_request<B>(&self, req: Request<B>) -> Result<HttpResponse, Infallible>
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let response = self
            .route_request(req)
            .await
            .unwrap_or_else(ApiError::into_response);

        debug!(%method, %path, status = response.status().as_u16(), "Handled request");
        self.ctx.metrics.record_response(response.status());
        Ok(response)
    }

    async fn route_request<B>(&self, req: Request<B>) -> Result<HttpResponse, ApiError>
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let ctx = self.ctx.as_ref();
        match (req.method(), req.uri().path()) {
            (&Method::GET, "/" | "/api") => Ok(handle_root()),
            (&Method::GET, "/api/health") => Ok(handle_health()),
            (&Method::POST, "/api/signup") => auth::handle_signup(req, ctx).await,
            (&Method::POST, "/api/signin") => auth::handle_signin(req, ctx).await,
            (&Method::POST, "/api/signout") => auth::handle_signout(req, ctx).await,
            (&Method::GET, "/api/user") => user::handle_current_user(req, ctx).await,
            (_, path) if KNOWN_PATHS.contains(&path) => Err(ApiError::MethodNotAllowed),
            _ => Err(ApiError::NotFound),
        }
    }
}

fn handle_root() -> HttpResponse {
    let info = serde_json::json!({
        "name": "notes-api",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "POST /api/signup": "Create an account and start a session",
            "POST /api/signin": "Start a session",
            "POST /api/signout?all=bool": "End the current session, or every session of the user",
            "GET /api/user": "Current user and live session count",
            "GET /api/health": "Health check"
        }
    });
    responses::json_response(StatusCode::OK, &info)
}

fn handle_health() -> HttpResponse {
    responses::json_response(StatusCode::OK, &serde_json::json!({ "status": "healthy" }))
}

/// Reads a size limited JSON body
pub(crate) async fn read_json<B, T>(req: Request<B>) -> Result<T, ApiError>
where
    B: Body,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
    T: DeserializeOwned,
{
    let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            return Err(ApiError::PayloadTooLarge)
        }
        Err(e) => {
            debug!(error = %e, "Failed to read request body");
            return Err(ApiError::validation("Failed to read request body"));
        }
    };

    serde_json::from_slice(&body).map_err(|e| ApiError::validation(e.to_string()))
}
