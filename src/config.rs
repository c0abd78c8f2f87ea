use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// SMTP settings. Mail is only sent when host and from address are both set.
#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_tls: bool,
    pub from_address: Option<String>,
    pub from_name: String,
}

impl MailConfig {
    pub fn is_configured(&self) -> bool {
        self.smtp_host.is_some() && self.from_address.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt: JwtConfig,
    pub mail: MailConfig,
    /// Base used for links embedded in confirmation and reset emails.
    pub public_base_url: String,
    pub confirm_token_ttl_minutes: i64,
    pub reset_token_ttl_minutes: i64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let database_url = get("DATABASE_URL").context("DATABASE_URL is not set")?;
        let jwt = JwtConfig {
            secret: get("JWT_SECRET").context("JWT_SECRET is not set")?,
            issuer: or("JWT_ISSUER", "account-api"),
            audience: or("JWT_AUDIENCE", "account-api-users"),
            ttl_minutes: parse_or(&get, "JWT_TTL_MINUTES", 60)?,
        };
        anyhow::ensure!(!jwt.secret.is_empty(), "JWT_SECRET must not be empty");

        let mail = MailConfig {
            smtp_host: get("SMTP_HOST").filter(|v| !v.is_empty()),
            smtp_port: parse_or(&get, "SMTP_PORT", 587)?,
            smtp_username: get("SMTP_USERNAME").filter(|v| !v.is_empty()),
            smtp_password: get("SMTP_PASSWORD").filter(|v| !v.is_empty()),
            smtp_tls: parse_or(&get, "SMTP_TLS", true)?,
            from_address: get("MAIL_FROM_ADDRESS").filter(|v| !v.is_empty()),
            from_name: or("MAIL_FROM_NAME", "Account Service"),
        };

        Ok(Self {
            database_url,
            database_max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            jwt,
            mail,
            public_base_url: or("PUBLIC_BASE_URL", "http://localhost:8080")
                .trim_end_matches('/')
                .to_string(),
            confirm_token_ttl_minutes: parse_or(&get, "CONFIRM_TOKEN_TTL_MINUTES", 60 * 24)?,
            reset_token_ttl_minutes: parse_or(&get, "RESET_TOKEN_TTL_MINUTES", 60)?,
        })
    }
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_required_vars_are_set() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/accounts"),
            ("JWT_SECRET", "s3cret"),
        ]))
        .expect("config should load");

        assert_eq!(cfg.jwt.ttl_minutes, 60);
        assert_eq!(cfg.jwt.issuer, "account-api");
        assert_eq!(cfg.database_max_connections, 10);
        assert_eq!(cfg.confirm_token_ttl_minutes, 1440);
        assert_eq!(cfg.reset_token_ttl_minutes, 60);
        assert_eq!(cfg.mail.smtp_port, 587);
        assert!(!cfg.mail.is_configured());
    }

    #[test]
    fn missing_secret_is_an_error() {
        let err = AppConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://x")])).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn bad_number_is_reported_with_key() {
        let err = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "k"),
            ("JWT_TTL_MINUTES", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("JWT_TTL_MINUTES"));
    }

    #[test]
    fn mail_is_configured_with_host_and_sender() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "k"),
            ("SMTP_HOST", "smtp.example.com"),
            ("MAIL_FROM_ADDRESS", "noreply@example.com"),
            ("SMTP_TLS", "false"),
            ("PUBLIC_BASE_URL", "https://accounts.example.com/"),
        ]))
        .expect("config should load");

        assert!(cfg.mail.is_configured());
        assert!(!cfg.mail.smtp_tls);
        assert_eq!(cfg.public_base_url, "https://accounts.example.com");
    }
}
