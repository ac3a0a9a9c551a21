//! Request body and query checks for the auth endpoints.

use email_address::{EmailAddress, Options};
use serde::Deserialize;

use super::error::ApiError;

const USERNAME_LEN: (usize, usize) = (3, 16);
const NAME_LEN: (usize, usize) = (3, 16);
const PASSWORD_LEN: (usize, usize) = (8, 32);

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    pub password: String,
}

impl SignupRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        check_length("username", &self.username, USERNAME_LEN)?;
        check_email(&self.email)?;
        if let Some(name) = &self.name {
            check_length("name", name, NAME_LEN)?;
        }
        check_length("password", &self.password, PASSWORD_LEN)
    }
}

#[derive(Debug, Deserialize)]
pub struct SigninRequest {
    pub email: String,
    pub password: String,
}

impl SigninRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        check_email(&self.email)?;
        check_length("password", &self.password, PASSWORD_LEN)
    }
}

/// Lengths are counted in characters, not bytes
fn check_length(field: &str, value: &str, (min, max): (usize, usize)) -> Result<(), ApiError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ApiError::validation(format!(
            "{} must be between {} and {} characters",
            field, min, max
        )));
    }
    Ok(())
}

fn check_email(email: &str) -> Result<(), ApiError> {
    if is_valid_email(email) {
        Ok(())
    } else {
        Err(ApiError::validation("email must be a valid email address"))
    }
}

/// Checks the `local@domain.tld` shape. Display names and domain literals are refused,
/// and the domain needs at least two labels.
pub fn is_valid_email(email: &str) -> bool {
    let options = Options::default()
        .with_required_tld()
        .without_display_text()
        .without_domain_literal();
    EmailAddress::parse_with_options(email, options).is_ok()
}

/// Reads the `all` flag of the sign-out query. Absent means `false`.
pub fn parse_all_flag(query: Option<&str>) -> Result<bool, ApiError> {
    let Some(query) = query else {
        return Ok(false);
    };

    for param in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        if key != "all" {
            continue;
        }
        let value = urlencoding::decode(value)
            .map_err(|_| ApiError::validation("all must be a boolean"))?;
        return match value.as_ref() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(ApiError::validation("all must be a boolean")),
        };
    }
    Ok(false)
}
