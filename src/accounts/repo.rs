use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;

use super::repo_types::{AccountToken, CreateUserError, NewUser, TokenPurpose, User};

/// Persistence boundary for users and their emailed tokens.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>>;
    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_normalized_email(&self, normalized_email: &str)
        -> anyhow::Result<Option<User>>;
    async fn list(&self) -> anyhow::Result<Vec<User>>;
    async fn create(&self, user: NewUser<'_>) -> Result<User, CreateUserError>;
    /// Returns false when no row had that id.
    async fn delete(&self, id: i64) -> anyhow::Result<bool>;

    /// Stores `token` as the only live token of its purpose for the user.
    /// Earlier tokens of that purpose are retired, and the user's spent or
    /// expired tokens are pruned.
    async fn insert_token(&self, token: &AccountToken) -> anyhow::Result<()>;
    /// Consumes a usable confirmation token and marks the email confirmed,
    /// atomically. Returns false if the token was not usable.
    async fn confirm_email_with_token(
        &self,
        user_id: i64,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<bool>;
    /// Consumes a usable reset token and replaces the password hash,
    /// atomically. Returns false if the token was not usable.
    async fn reset_password_with_token(
        &self,
        user_id: i64,
        token_hash: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<bool>;
}

#[derive(Clone)]
pub struct PgAccountStore {
    db: PgPool,
}

impl PgAccountStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Marks a matching unused, unexpired token as used inside `tx`.
async fn consume_token_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    purpose: TokenPurpose,
    token_hash: &str,
    now: OffsetDateTime,
) -> anyhow::Result<bool> {
    let consumed = sqlx::query_scalar::<_, uuid::Uuid>(
        r#"
        UPDATE account_tokens
           SET used_at = $4
         WHERE user_id = $1
           AND purpose = $2
           AND token_hash = $3
           AND used_at IS NULL
           AND expires_at > $4
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(purpose.as_str())
    .bind(token_hash)
    .bind(now)
    .fetch_optional(&mut **tx)
    .await
    .context("consume account token")?;

    Ok(consumed.is_some())
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, normalized_email, password_hash, email_confirmed, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, normalized_email, password_hash, email_confirmed, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await
        .context("find user by username")?;
        Ok(user)
    }

    async fn find_by_normalized_email(
        &self,
        normalized_email: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, normalized_email, password_hash, email_confirmed, created_at
            FROM users
            WHERE normalized_email = $1
            "#,
        )
        .bind(normalized_email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn list(&self) -> anyhow::Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, normalized_email, password_hash, email_confirmed, created_at
            FROM users
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.db)
        .await
        .context("list users")?;
        Ok(users)
    }

    async fn create(&self, user: NewUser<'_>) -> Result<User, CreateUserError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, normalized_email, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, email, normalized_email, password_hash, email_confirmed, created_at
            "#,
        )
        .bind(user.username)
        .bind(user.email)
        .bind(user.normalized_email)
        .bind(user.password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => CreateUserError::Duplicate,
            other => CreateUserError::Other(anyhow::Error::new(other).context("insert user")),
        })
    }

    async fn delete(&self, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete user")?;
        Ok(res.rows_affected() > 0)
    }

    async fn insert_token(&self, token: &AccountToken) -> anyhow::Result<()> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        sqlx::query(
            r#"
            DELETE FROM account_tokens
             WHERE user_id = $1
               AND (purpose = $2 OR used_at IS NOT NULL OR expires_at <= now())
            "#,
        )
        .bind(token.user_id)
        .bind(token.purpose.as_str())
        .execute(&mut *tx)
        .await
        .context("retire previous account tokens")?;

        sqlx::query(
            r#"
            INSERT INTO account_tokens (id, user_id, purpose, token_hash, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(token.purpose.as_str())
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .execute(&mut *tx)
        .await
        .context("insert account token")?;
        tx.commit().await.context("commit tx")?;
        Ok(())
    }

    async fn confirm_email_with_token(
        &self,
        user_id: i64,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        if !consume_token_tx(&mut tx, user_id, TokenPurpose::EmailConfirmation, token_hash, now)
            .await?
        {
            return Ok(false);
        }
        sqlx::query("UPDATE users SET email_confirmed = TRUE WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("mark email confirmed")?;
        tx.commit().await.context("commit tx")?;
        Ok(true)
    }

    async fn reset_password_with_token(
        &self,
        user_id: i64,
        token_hash: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        if !consume_token_tx(&mut tx, user_id, TokenPurpose::PasswordReset, token_hash, now).await? {
            return Ok(false);
        }
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&mut *tx)
            .await
            .context("update password hash")?;
        tx.commit().await.context("commit tx")?;
        Ok(true)
    }
}
