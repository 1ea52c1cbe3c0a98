use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, ForgotPasswordRequest, LoginRequest, MeResponse, MessageResponse,
            ResetPasswordRequest, SignupRequest, UserData,
        },
        extractors::CurrentUser,
        password,
        repo::{RepoError, UniqueField},
        repo_types::{NewUser, User},
        validate::{self, LoginIdentifier},
    },
    error::{AppError, AppJson, ValidationErrors},
    mail,
    state::AppState,
};

pub const INVALID_CREDENTIALS: &str = "Incorrect username/email or password";
/// Same wording whether or not the address belongs to an account.
pub const RESET_SENT: &str = "Token sent to email, if an account with that address exists.";
pub const RESET_MAIL_FAILED: &str = "There was an error sending the email. Try again later!";
pub const RESET_TOKEN_INVALID: &str = "Token is invalid or has expired";

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/forgotPassword", post(forgot_password))
        .route("/resetPassword/:token", patch(reset_password))
        .route("/me", get(get_me))
}

/// Issues a token for `user` and answers with the auth envelope, echoing
/// the token on the `Authorization` header.
fn send_token(state: &AppState, user: User, status: StatusCode) -> Result<Response, AppError> {
    let token = state.keys.sign(user.id)?;
    let bearer =
        HeaderValue::from_str(&format!("Bearer {token}")).map_err(anyhow::Error::from)?;

    let body = AuthResponse {
        status: "success",
        token: state.config.expose_token_in_body.then_some(token),
        data: UserData { user },
    };
    Ok((status, [(header::AUTHORIZATION, bearer)], Json(body)).into_response())
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    AppJson(payload): AppJson<SignupRequest>,
) -> Result<Response, AppError> {
    let valid = validate::signup(&payload).map_err(|errors| {
        debug!(?errors, "signup rejected");
        AppError::Validation(errors)
    })?;

    let password_hash = password::hash(valid.password).await?;
    let new_user = NewUser {
        username: valid.username,
        email: valid.email,
        password_hash,
    };

    let user = match state.users.create(new_user).await {
        Ok(u) => u,
        Err(RepoError::Duplicate(field)) => {
            warn!(field = field.as_str(), "signup duplicate");
            let message = match field {
                UniqueField::Username => "Username is already taken",
                UniqueField::Email => "Email is already registered",
            };
            return Err(AppError::Validation(ValidationErrors::single(
                field.as_str(),
                message,
            )));
        }
        Err(e) => return Err(e.into()),
    };

    info!(user_id = %user.id, username = %user.username, "user signed up");
    send_token(&state, user, StatusCode::CREATED)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<Response, AppError> {
    let valid = validate::login(&payload).map_err(AppError::Validation)?;

    let found = match &valid.identifier {
        LoginIdentifier::Email(email) => state.users.find_by_email(email).await?,
        LoginIdentifier::Username(username) => state.users.find_by_username(username).await?,
    };

    // Unknown users still cost one argon2 verification.
    let hash = match &found {
        Some(u) => u.password_hash.clone(),
        None => state.placeholder_hash.to_string(),
    };
    let matches = password::verify(valid.password, hash).await?;

    let user = match found {
        Some(u) if matches => u,
        Some(u) => {
            warn!(user_id = %u.id, "login invalid password");
            return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
        }
        None => {
            warn!(identifier = ?valid.identifier, "login unknown user");
            return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
        }
    };

    info!(user_id = %user.id, "user logged in");
    send_token(&state, user, StatusCode::OK)
}

/// Link mailed to the user; the origin is configured, never read from request headers.
fn reset_url(public_base_url: &str, code: &str) -> String {
    format!(
        "{}/api/v1/users/resetPassword/{code}",
        public_base_url.trim_end_matches('/')
    )
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    AppJson(payload): AppJson<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let email = validate::forgot_password(&payload).map_err(AppError::Validation)?;
    let sent = Json(MessageResponse {
        status: "success",
        message: RESET_SENT,
    });

    let Some(user) = state.users.find_by_email(&email).await? else {
        info!("password reset requested for unknown email");
        return Ok(sent);
    };

    let issued = state.reset_tokens.issue(OffsetDateTime::now_utc());
    state
        .users
        .set_reset_token(user.id, &issued.hash, issued.expires_at)
        .await?;
    if state.config.log_reset_tokens {
        debug!(user_id = %user.id, code = %issued.plaintext, "reset token issued");
    }

    let message = mail::password_reset_email(
        &user.email,
        &issued.plaintext,
        &reset_url(&state.config.public_base_url, &issued.plaintext),
    );
    if let Err(e) = state.mailer.send(message).await {
        error!(error = ?e, user_id = %user.id, "reset email failed; clearing token");
        state.users.clear_reset_token(user.id).await?;
        return Err(AppError::Dependency(RESET_MAIL_FAILED.into()));
    }

    info!(user_id = %user.id, "reset token sent");
    Ok(sent)
}

#[instrument(skip(state, token, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    AppJson(payload): AppJson<ResetPasswordRequest>,
) -> Result<Response, AppError> {
    let valid = validate::reset_password(&token, &payload).map_err(AppError::Validation)?;
    let token_hash = state.reset_tokens.hash(&valid.token);

    let user = state
        .users
        .find_by_reset_token(&token_hash, OffsetDateTime::now_utc())
        .await?
        .ok_or_else(|| AppError::BadRequest(RESET_TOKEN_INVALID.into()))?;

    let password_hash = password::hash(valid.password).await?;
    let user = state
        .users
        .complete_password_reset(user.id, &token_hash, &password_hash)
        .await?
        .ok_or_else(|| {
            warn!(user_id = %user.id, "reset token consumed concurrently");
            AppError::BadRequest(RESET_TOKEN_INVALID.into())
        })?;

    info!(user_id = %user.id, "password reset");
    send_token(&state, user, StatusCode::OK)
}

#[instrument(skip_all)]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<MeResponse> {
    Json(MeResponse {
        status: "success",
        data: UserData { user },
    })
}
