//! Request input validation
//!
//! Each validator consumes raw input and returns either a validated value
//! (trimmed, ready to use) or the first failing field. Handlers `match` on the
//! result; nothing here touches the database.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex"));
static VERIFY_TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{8}$").expect("valid regex"));
static RESET_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{64}$").expect("valid regex"));
static SHORT_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

const EMAIL_LEN: (usize, usize) = (6, 100);
const PASSWORD_LEN: (usize, usize) = (6, 100);
const NAME_LEN: (usize, usize) = (3, 100);
const URL_LEN: (usize, usize) = (2, 1024);
const SHORT_CODE_LEN: (usize, usize) = (2, 50);

/// The first invalid field and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidLogin {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRegistration {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidVerifyEmail {
    pub token: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidShortLink {
    pub url: String,
    pub short_code: Option<String>,
}

fn check_len(
    field: &'static str,
    value: &str,
    (min, max): (usize, usize),
) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ValidationError::new(
            field,
            format!("must be between {} and {} characters", min, max),
        ));
    }
    Ok(())
}

pub fn email(raw: &str) -> Result<String, ValidationError> {
    let email = raw.trim();
    check_len("email", email, EMAIL_LEN)?;
    if !EMAIL_RE.is_match(email) {
        return Err(ValidationError::new("email", "must be a valid email address"));
    }
    Ok(email.to_string())
}

pub fn password(field: &'static str, raw: &str) -> Result<String, ValidationError> {
    check_len(field, raw, PASSWORD_LEN)?;
    Ok(raw.to_string())
}

pub fn name(raw: &str) -> Result<String, ValidationError> {
    let name = raw.trim();
    check_len("name", name, NAME_LEN)?;
    Ok(name.to_string())
}

pub fn login(email_raw: &str, password_raw: &str) -> Result<ValidLogin, ValidationError> {
    Ok(ValidLogin {
        email: email(email_raw)?,
        password: password("password", password_raw)?,
    })
}

pub fn registration(
    name_raw: &str,
    email_raw: &str,
    password_raw: &str,
) -> Result<ValidRegistration, ValidationError> {
    Ok(ValidRegistration {
        name: name(name_raw)?,
        email: email(email_raw)?,
        password: password("password", password_raw)?,
    })
}

pub fn verify_email(token_raw: &str, email_raw: &str) -> Result<ValidVerifyEmail, ValidationError> {
    let token = token_raw.trim();
    if !VERIFY_TOKEN_RE.is_match(token) {
        return Err(ValidationError::new("token", "must be 8 digits"));
    }
    Ok(ValidVerifyEmail {
        token: token.to_string(),
        email: email(email_raw)?,
    })
}

pub fn reset_token(raw: &str) -> Result<String, ValidationError> {
    let token = raw.trim();
    if !RESET_TOKEN_RE.is_match(token) {
        return Err(ValidationError::new("token", "malformed reset token"));
    }
    Ok(token.to_string())
}

pub fn short_code(raw: &str) -> Result<String, ValidationError> {
    let code = raw.trim();
    check_len("short_code", code, SHORT_CODE_LEN)?;
    if !SHORT_CODE_RE.is_match(code) {
        return Err(ValidationError::new(
            "short_code",
            "may only contain letters, digits, '-' and '_'",
        ));
    }
    Ok(code.to_string())
}

/// An empty or whitespace-only code is treated as absent.
pub fn short_link(url_raw: &str, code_raw: Option<&str>) -> Result<ValidShortLink, ValidationError> {
    let url = url_raw.trim();
    check_len("url", url, URL_LEN)?;
    if !(url.starts_with("http://") || url.starts_with("https://")) || url.contains(char::is_whitespace)
    {
        return Err(ValidationError::new("url", "must be an http or https URL"));
    }

    let short_code = match code_raw.map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => Some(short_code(code)?),
        None => None,
    };

    Ok(ValidShortLink {
        url: url.to_string(),
        short_code,
    })
}
