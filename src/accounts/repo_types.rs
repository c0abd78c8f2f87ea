use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub normalized_email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string, never exposed
    pub email_confirmed: bool,
    pub created_at: OffsetDateTime,
}

/// Values for a user insert. The store assigns `id` and `created_at`.
#[derive(Debug)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub normalized_email: &'a str,
    pub password_hash: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    EmailConfirmation,
    PasswordReset,
}

impl TokenPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenPurpose::EmailConfirmation => "email_confirmation",
            TokenPurpose::PasswordReset => "password_reset",
        }
    }
}

/// Single-use emailed token. Only the digest of the raw value is kept.
#[derive(Debug, Clone)]
pub struct AccountToken {
    pub id: Uuid,
    pub user_id: i64,
    pub purpose: TokenPurpose,
    pub token_hash: String,
    pub expires_at: OffsetDateTime,
    pub used_at: Option<OffsetDateTime>,
}

impl AccountToken {
    pub fn new(
        user_id: i64,
        purpose: TokenPurpose,
        token_hash: String,
        expires_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            purpose,
            token_hash,
            expires_at,
            used_at: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CreateUserError {
    #[error("username or email already registered")]
    Duplicate,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
