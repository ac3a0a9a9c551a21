use hyper::{Request, StatusCode};
use serde::Serialize;

use super::error::{ApiError, NOT_SIGNED_IN};
use super::middleware::AuthOutcome;
use super::responses::{json_response, set_cookie};
use super::{ApiContext, HttpResponse};

#[derive(Debug, Serialize)]
struct CurrentUser<'a> {
    id: &'a str,
    username: &'a str,
    email: &'a str,
    name: Option<&'a str>,
    sessions: usize,
}

/// GET /api/user
#[tracing::instrument(skip_all, fields(user_id))]
pub async fn handle_current_user<B>(
    req: Request<B>,
    ctx: &ApiContext,
) -> Result<HttpResponse, ApiError> {
    let AuthOutcome { session, cookie } = ctx.request_auth.validate_request(req.headers())?;

    let mut response = match session {
        Some(validated) => {
            let user = &validated.user;
            tracing::Span::current().record("user_id", tracing::field::display(&user.user_id));
            let sessions = ctx.sessions.count_user_sessions(&user.user_id)?;
            json_response(
                StatusCode::OK,
                &CurrentUser {
                    id: &user.user_id,
                    username: &user.username,
                    email: &user.email,
                    name: user.name.as_deref(),
                    sessions,
                },
            )
        }
        None => ApiError::Unauthorized(NOT_SIGNED_IN).into_response(),
    };

    if let Some(cookie) = cookie {
        set_cookie(&mut response, &cookie);
    }
    Ok(response)
}
