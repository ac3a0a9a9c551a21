use bytes::Bytes;
use cookie::Cookie;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::{debug, error};

use super::HttpResponse;

/// Builds a JSON response
pub fn json_response<T: Serialize>(status: StatusCode, data: &T) -> HttpResponse {
    let (status, body) = match serde_json::to_vec(data) {
        Ok(body) => (status, body),
        Err(e) => {
            error!(error = %e, "Failed to serialize response body");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"message":"Internal server error."}"#.to_vec(),
            )
        }
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Appends a `Set-Cookie` header.
///
/// A cookie that does not form a valid header value is dropped; emitting it is
/// best effort.
pub fn set_cookie(response: &mut HttpResponse, cookie: &Cookie<'_>) {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => debug!(
            error = %e,
            cookie = cookie.name(),
            "Dropping cookie with invalid header value"
        ),
    }
}
