//! Request validation.
//!
//! Each public function runs an ordered list of per-field checks. A field
//! reports only its first failing rule; all failing fields are collected
//! before returning, so the caller sees every problem in one response.

use lazy_static::lazy_static;
use regex::Regex;

use super::dto::{ForgotPasswordRequest, LoginRequest, ResetPasswordRequest, SignupRequest};
use crate::error::ValidationErrors;

const PASSWORD_SPECIALS: &str = "@$!%*?&";

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref USERNAME_RE: Regex = Regex::new(r"^[a-zA-Z0-9_.]+$").unwrap();
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidSignup {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginIdentifier {
    Email(String),
    Username(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidLogin {
    pub identifier: LoginIdentifier,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidReset {
    pub token: String,
    pub password: String,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn check_username(value: Option<&str>) -> Result<String, &'static str> {
    let v = present(value.map(str::trim)).ok_or("Username is required")?;
    let len = v.chars().count();
    if !(3..=30).contains(&len) {
        return Err("Username must be between 3 and 30 characters");
    }
    if !USERNAME_RE.is_match(v) {
        return Err("Username can only contain letters, numbers, underscores, or dots");
    }
    if v.chars().all(|c| c.is_ascii_digit()) {
        return Err("Username cannot be only digits");
    }
    if v.chars().all(|c| c == '_') {
        return Err("Username cannot be only underscores");
    }
    if v.chars().all(|c| c == '.') {
        return Err("Username cannot be only dots");
    }
    Ok(v.to_string())
}

fn check_email(value: Option<&str>) -> Result<String, &'static str> {
    let v = present(value.map(str::trim)).ok_or("Email is required")?;
    let v = v.to_lowercase();
    if !is_valid_email(&v) {
        return Err("Please provide a valid email");
    }
    Ok(v)
}

fn check_password(value: Option<&str>) -> Result<String, &'static str> {
    let v = present(value).ok_or("Password is required")?;
    let len = v.chars().count();
    if !(8..=32).contains(&len) {
        return Err("Password must be 8-32 characters");
    }
    let has_lower = v.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = v.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = v.chars().any(|c| c.is_ascii_digit());
    let has_special = v.chars().any(|c| PASSWORD_SPECIALS.contains(c));
    if !(has_lower && has_upper && has_digit && has_special) {
        return Err("Password must include uppercase, lowercase, number, and special character");
    }
    if !v
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || PASSWORD_SPECIALS.contains(c))
    {
        return Err("Password may only contain letters, numbers, and the characters @$!%*?&");
    }
    Ok(v.to_string())
}

fn check_confirmation(value: Option<&str>, password: Option<&str>) -> Result<(), &'static str> {
    let v = present(value).ok_or("Password confirmation is required")?;
    if Some(v) != password {
        return Err("Passwords do not match");
    }
    Ok(())
}

/// Records the error (if any) under `field` and yields the value on success.
fn run<T>(
    errors: &mut ValidationErrors,
    field: &'static str,
    result: Result<T, &'static str>,
) -> Option<T> {
    result.map_err(|msg| errors.push(field, msg)).ok()
}

/// Validates the password/confirmation pair shared by signup and reset.
fn new_password(
    errors: &mut ValidationErrors,
    password: Option<&str>,
    confirm: Option<&str>,
) -> Option<String> {
    let password_ok = run(errors, "password", check_password(password));
    run(errors, "passwordConfirm", check_confirmation(confirm, password));
    password_ok
}

pub fn signup(req: &SignupRequest) -> Result<ValidSignup, ValidationErrors> {
    let mut errors = ValidationErrors::default();
    let username = run(&mut errors, "username", check_username(req.username.as_deref()));
    let email = run(&mut errors, "email", check_email(req.email.as_deref()));
    let password = new_password(
        &mut errors,
        req.password.as_deref(),
        req.password_confirm.as_deref(),
    );

    match (username, email, password) {
        (Some(username), Some(email), Some(password)) if errors.is_empty() => Ok(ValidSignup {
            username,
            email,
            password,
        }),
        _ => Err(errors),
    }
}

/// Either identifier is enough; a well-formed email wins when both are sent.
pub fn login(req: &LoginRequest) -> Result<ValidLogin, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let email = check_email(req.email.as_deref()).ok();
    let username = present(req.username.as_deref().map(str::trim)).map(str::to_string);
    let identifier = match (email, username) {
        (Some(email), _) => Some(LoginIdentifier::Email(email)),
        (None, Some(username)) => Some(LoginIdentifier::Username(username)),
        (None, None) => {
            errors.push(
                "identifier",
                "You must provide either a valid username or a valid email",
            );
            None
        }
    };

    let password = present(req.password.as_deref()).map(str::to_string);
    if password.is_none() {
        errors.push("password", "Password is required");
    }

    match (identifier, password) {
        (Some(identifier), Some(password)) => Ok(ValidLogin {
            identifier,
            password,
        }),
        _ => Err(errors),
    }
}

pub fn forgot_password(req: &ForgotPasswordRequest) -> Result<String, ValidationErrors> {
    check_email(req.email.as_deref()).map_err(|msg| ValidationErrors::single("email", msg))
}

pub fn reset_password(
    token: &str,
    req: &ResetPasswordRequest,
) -> Result<ValidReset, ValidationErrors> {
    let mut errors = ValidationErrors::default();
    let token = token.trim();
    if token.is_empty() {
        errors.push("token", "Reset token is required");
    }
    let password = new_password(
        &mut errors,
        req.password.as_deref(),
        req.password_confirm.as_deref(),
    );

    match password {
        Some(password) if errors.is_empty() => Ok(ValidReset {
            token: token.to_string(),
            password,
        }),
        _ => Err(errors),
    }
}
