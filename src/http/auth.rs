use std::error::Error as StdError;

use hyper::body::Body;
use hyper::{Request, StatusCode};
use serde::Serialize;
use tracing::{info, warn};

use super::error::{ApiError, EMAIL_TAKEN, INVALID_CREDENTIALS, NOT_SIGNED_IN};
use super::responses::{json_response, set_cookie};
use super::validation::{self, SigninRequest, SignupRequest};
use super::{read_json, ApiContext, HttpResponse};
use crate::auth::{SessionManager, UserRecord};

#[derive(Debug, Serialize)]
struct SessionIssued {
    #[serde(rename = "expiresIn")]
    expires_in: i64,
}

#[derive(Debug, Serialize)]
struct SignedOut {
    count: usize,
}

/// Starts a session for the user and renders the response carrying its cookie
fn issue_session(
    ctx: &ApiContext,
    user_id: &str,
    status: StatusCode,
) -> Result<HttpResponse, ApiError> {
    let session = ctx.sessions.create_session(user_id)?;
    ctx.metrics.record_session_created();

    let mut response = json_response(
        status,
        &SessionIssued {
            expires_in: ctx.sessions.ttl_secs(),
        },
    );
    set_cookie(&mut response, &ctx.sessions.create_session_cookie(&session.id));
    Ok(response)
}

/// POST /api/signup
#[tracing::instrument(skip_all, fields(username, user_id))]
pub async fn handle_signup<B>(req: Request<B>, ctx: &ApiContext) -> Result<HttpResponse, ApiError>
where
    B: Body,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let body: SignupRequest = read_json(req).await?;
    body.validate()?;
    tracing::Span::current().record("username", tracing::field::display(&body.username));

    // Checked again atomically by create_user; this just skips hashing for the common case
    if ctx.users.email_exists(&body.email)? {
        warn!("Signup with an email that is already registered");
        return Err(ApiError::Conflict(EMAIL_TAKEN));
    }

    let password_hash = ctx.hasher.hash(&body.password).await?;
    let user = UserRecord::new(body.username, body.email, body.name, password_hash);
    ctx.users.create_user(&user)?;
    ctx.metrics.record_signup();

    tracing::Span::current().record("user_id", tracing::field::display(&user.user_id));
    info!(user_id = %user.user_id, "Account created");

    issue_session(ctx, &user.user_id, StatusCode::CREATED)
}

/// POST /api/signin
#[tracing::instrument(skip_all, fields(user_id, success))]
pub async fn handle_signin<B>(req: Request<B>, ctx: &ApiContext) -> Result<HttpResponse, ApiError>
where
    B: Body,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let body: SigninRequest = read_json(req).await?;
    body.validate()?;

    let user = match ctx.users.get_user_by_email(&body.email)? {
        Some(user) => user,
        None => {
            tracing::Span::current().record("success", false);
            ctx.metrics.record_login_attempt(false);
            warn!("Sign-in for unknown email");
            return Err(ApiError::Unauthorized(INVALID_CREDENTIALS));
        }
    };
    tracing::Span::current().record("user_id", tracing::field::display(&user.user_id));

    let valid = ctx.hasher.verify(&body.password, &user.password_hash).await?;
    tracing::Span::current().record("success", valid);
    ctx.metrics.record_login_attempt(valid);
    if !valid {
        warn!(user_id = %user.user_id, "Sign-in with wrong password");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS));
    }

    info!(user_id = %user.user_id, "User signed in");
    issue_session(ctx, &user.user_id, StatusCode::OK)
}

/// POST /api/signout?all=bool
#[tracing::instrument(skip_all, fields(user_id, all, count))]
pub async fn handle_signout<B>(
    req: Request<B>,
    ctx: &ApiContext,
) -> Result<HttpResponse, ApiError> {
    let all = validation::parse_all_flag(req.uri().query())?;
    tracing::Span::current().record("all", all);

    let token = SessionManager::read_session_cookie(req.headers())
        .ok_or(ApiError::Unauthorized(NOT_SIGNED_IN))?;

    let validated = match ctx.sessions.validate_session(&token)? {
        Some(validated) => validated,
        None => {
            let mut response = ApiError::Unauthorized(NOT_SIGNED_IN).into_response();
            set_cookie(&mut response, &ctx.sessions.create_blank_session_cookie());
            return Ok(response);
        }
    };
    let user_id = &validated.user.user_id;
    tracing::Span::current().record("user_id", tracing::field::display(user_id));

    let count = if all {
        ctx.sessions.invalidate_all_user_sessions(user_id)?
    } else {
        ctx.sessions.invalidate_session(&token)?
    };
    ctx.metrics.record_sessions_invalidated(count);
    tracing::Span::current().record("count", count);
    info!(user_id = %user_id, all, count, "User signed out");

    let mut response = json_response(StatusCode::OK, &SignedOut { count });
    set_cookie(&mut response, &ctx.sessions.create_blank_session_cookie());
    Ok(response)
}
