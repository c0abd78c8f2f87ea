use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{error, info, warn};

use super::{
    dto::{LoginRequest, LoginResponse, PublicUser, ResetPasswordRequest, SignUpRequest},
    repo_types::{AccountToken, CreateUserError, NewUser, TokenPurpose, User},
    tokens,
};
use crate::{
    auth::{password, AuthUser},
    error::AppError,
    mail::MailMessage,
    state::AppState,
};

const MIN_PASSWORD_LEN: usize = 6;
const MAX_USERNAME_LEN: usize = 64;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Case-insensitive lookup key kept next to the email.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_uppercase()
}

fn validate_email(email: &str) -> Result<(), AppError> {
    if !is_valid_email(email) {
        return Err(AppError::validation("Invalid email"));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_username(username: &str) -> Result<(), AppError> {
    if username.is_empty() {
        return Err(AppError::validation("Username is required"));
    }
    if username.chars().count() > MAX_USERNAME_LEN || username.chars().any(char::is_whitespace) {
        return Err(AppError::validation("Invalid username"));
    }
    // Login treats any identifier with '@' as an email.
    if username.contains('@') {
        return Err(AppError::validation("Username must not contain '@'"));
    }
    Ok(())
}

fn account_link(st: &AppState, action: &str, token: &str, email: &str) -> String {
    format!(
        "{}/account/{}?token={}&email={}",
        st.config.public_base_url,
        action,
        urlencoding::encode(token),
        urlencoding::encode(email)
    )
}

/// Stores the digest of a new token for `user` and returns the raw value.
async fn mint_token(st: &AppState, user: &User, purpose: TokenPurpose) -> anyhow::Result<String> {
    let ttl_minutes = match purpose {
        TokenPurpose::EmailConfirmation => st.config.confirm_token_ttl_minutes,
        TokenPurpose::PasswordReset => st.config.reset_token_ttl_minutes,
    };
    let minted = tokens::mint();
    let record = AccountToken::new(
        user.id,
        purpose,
        minted.hash,
        OffsetDateTime::now_utc() + Duration::minutes(ttl_minutes),
    );
    st.store.insert_token(&record).await?;
    Ok(minted.raw)
}

async fn send_confirmation(st: &AppState, user: &User) -> anyhow::Result<()> {
    let token = mint_token(st, user, TokenPurpose::EmailConfirmation).await?;
    let link = account_link(st, "confirm-email", &token, &user.email);
    let body = format!(
        "Hello {},\n\nPlease confirm your email address by opening the link below:\n\n{}\n",
        user.username, link
    );
    st.mailer
        .send(&MailMessage::new(&user.email, "Confirm Email", body))
        .await
}

async fn user_by_email(st: &AppState, email: &str) -> Result<User, AppError> {
    st.store
        .find_by_normalized_email(&normalize_email(email))
        .await?
        .ok_or_else(AppError::user_not_found)
}

pub async fn sign_up(st: &AppState, req: SignUpRequest) -> Result<PublicUser, AppError> {
    let username = req.username.trim();
    let email = req.email.trim();
    validate_username(username)?;
    validate_email(email)?;
    validate_password(&req.password)?;

    let normalized_email = normalize_email(email);
    if st.store.find_by_normalized_email(&normalized_email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AppError::Conflict("User already exists".into()));
    }
    if st.store.find_by_username(username).await?.is_some() {
        warn!(username = %username, "username already taken");
        return Err(AppError::Conflict("Username already taken".into()));
    }

    let hash = password::hash_password(&req.password)?;
    let user = st
        .store
        .create(NewUser {
            username,
            email,
            normalized_email: &normalized_email,
            password_hash: &hash,
        })
        .await
        .map_err(|e| match e {
            CreateUserError::Duplicate => AppError::Conflict("User already exists".into()),
            CreateUserError::Other(e) => AppError::Internal(e),
        })?;

    // The account is committed; a lost email can be re-requested.
    if let Err(e) = send_confirmation(st, &user).await {
        error!(error = ?e, user_id = user.id, "confirmation email failed");
    }

    info!(user_id = user.id, username = %user.username, "user registered");
    Ok(user.into())
}

pub async fn resend_confirmation(st: &AppState, email: &str) -> Result<(), AppError> {
    let user = user_by_email(st, email).await?;
    if user.email_confirmed {
        return Ok(());
    }
    send_confirmation(st, &user).await?;
    info!(user_id = user.id, "confirmation email resent");
    Ok(())
}

pub async fn confirm_email(st: &AppState, token: &str, email: &str) -> Result<(), AppError> {
    let user = user_by_email(st, email).await?;
    if user.email_confirmed {
        return Ok(());
    }

    let confirmed = st
        .store
        .confirm_email_with_token(user.id, &tokens::digest(token), OffsetDateTime::now_utc())
        .await?;
    if !confirmed {
        warn!(user_id = user.id, "confirmation with unusable token");
        return Err(AppError::validation("Invalid or expired token"));
    }

    info!(user_id = user.id, "email confirmed");
    Ok(())
}

pub async fn login(st: &AppState, req: LoginRequest) -> Result<LoginResponse, AppError> {
    let login = req.username.trim();
    if login.is_empty() || req.password.is_empty() {
        return Err(AppError::validation("Username and password are required"));
    }

    let found = if login.contains('@') {
        st.store.find_by_normalized_email(&normalize_email(login)).await?
    } else {
        st.store.find_by_username(login).await?
    };

    let Some(user) = found else {
        password::verify_against_dummy(&req.password);
        warn!(login = %login, "login unknown account");
        return Err(AppError::invalid_credentials());
    };

    if !password::verify_password(&req.password, &user.password_hash)? {
        warn!(user_id = user.id, "login invalid password");
        return Err(AppError::invalid_credentials());
    }

    let token = st.jwt.sign(user.id, &user.username)?;
    info!(user_id = user.id, "user logged in");
    Ok(LoginResponse {
        token,
        token_type: "Bearer",
        expires_in: st.jwt.ttl().as_secs(),
    })
}

pub async fn forgot_password(st: &AppState, email: &str) -> Result<(), AppError> {
    validate_email(email.trim())?;
    let user = user_by_email(st, email).await?;

    let token = mint_token(st, &user, TokenPurpose::PasswordReset).await?;
    let link = account_link(st, "reset-password", &token, &user.email);
    let body = format!(
        "Hello {},\n\nA password reset was requested for your account. Use the link below to choose a new password:\n\n{}\n\nIf you did not request this, you can ignore this email.\n",
        user.username, link
    );
    st.mailer
        .send(&MailMessage::new(&user.email, "Password Reset Link", body))
        .await?;

    info!(user_id = user.id, "password reset link sent");
    Ok(())
}

pub async fn reset_password(st: &AppState, req: ResetPasswordRequest) -> Result<(), AppError> {
    validate_email(req.email.trim())?;
    validate_password(&req.password)?;
    if req.token.trim().is_empty() {
        return Err(AppError::validation("Token is required"));
    }

    let user = user_by_email(st, &req.email).await?;
    let hash = password::hash_password(&req.password)?;
    let reset = st
        .store
        .reset_password_with_token(
            user.id,
            &tokens::digest(&req.token),
            &hash,
            OffsetDateTime::now_utc(),
        )
        .await?;
    if !reset {
        warn!(user_id = user.id, "password reset with unusable token");
        return Err(AppError::validation("Invalid or expired token"));
    }

    info!(user_id = user.id, "password reset");
    Ok(())
}

pub async fn get_user(st: &AppState, id: i64) -> Result<PublicUser, AppError> {
    st.store
        .find_by_id(id)
        .await?
        .map(PublicUser::from)
        .ok_or_else(AppError::user_not_found)
}

pub async fn list_users(st: &AppState, caller: &AuthUser) -> Result<Vec<PublicUser>, AppError> {
    let users = st.store.list().await?;
    info!(caller = caller.id, count = users.len(), "users listed");
    Ok(users.into_iter().map(PublicUser::from).collect())
}

pub async fn get_profile(st: &AppState, caller: &AuthUser) -> Result<PublicUser, AppError> {
    get_user(st, caller.id).await
}

pub async fn delete_user(st: &AppState, caller: &AuthUser, id: i64) -> Result<(), AppError> {
    if !st.store.delete(id).await? {
        return Err(AppError::user_not_found());
    }
    info!(caller = caller.id, user_id = id, "user deleted");
    Ok(())
}
