use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

/// Deployment environment, selected with `APP_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => anyhow::bail!("unknown APP_ENV {other:?}"),
        }
    }
}

impl Environment {
    pub fn is_development(self) -> bool {
        self == Self::Development
    }

    /// Default tracing filter when `RUST_LOG` is not set.
    pub fn default_log_filter(self) -> &'static str {
        match self {
            Self::Development => "userauth=debug,axum=info,tower_http=debug",
            Self::Production => "userauth=info,axum=warn,tower_http=info",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    /// `None` selects the log-only mailer (development only).
    pub api_key: Option<String>,
    pub api_url: String,
    pub from: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    /// Origin used in links sent by email. Never taken from request headers.
    pub public_base_url: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt: JwtConfig,
    pub reset_token_secret: String,
    pub mail: MailConfig,
    pub expose_token_in_body: bool,
    pub log_reset_tokens: bool,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_hour: u32,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match var("APP_ENV") {
            Some(v) => v.parse()?,
            None => Environment::Development,
        };
        let dev = environment.is_development();

        let jwt_secret = var("JWT_SECRET").context("JWT_SECRET must be set")?;
        // Development tokens expire sooner.
        let ttl_minutes = if dev {
            parse_or(&var, "JWT_EXPIRES_IN_DEV", 60)?
        } else {
            parse_or(&var, "JWT_EXPIRES_IN", 60 * 24)?
        };
        let jwt = JwtConfig {
            secret: jwt_secret.clone(),
            issuer: var("JWT_ISSUER").unwrap_or_else(|| "userauth".into()),
            audience: var("JWT_AUDIENCE").unwrap_or_else(|| "userauth-users".into()),
            ttl_minutes,
        };

        let mail = MailConfig {
            api_key: var("MAIL_API_KEY"),
            api_url: var("MAIL_API_URL").unwrap_or_else(|| "https://api.resend.com/emails".into()),
            from: var("MAIL_FROM").unwrap_or_else(|| "noreply@localhost".into()),
            timeout_secs: parse_or(&var, "MAIL_TIMEOUT_SECS", 10)?,
        };
        if !dev && mail.api_key.is_none() {
            anyhow::bail!("MAIL_API_KEY must be set in production");
        }

        let port = parse_or(&var, "APP_PORT", 8080)?;
        let public_base_url = match var("PUBLIC_BASE_URL") {
            Some(url) => url.trim_end_matches('/').to_string(),
            None if dev => format!("http://localhost:{port}"),
            None => anyhow::bail!("PUBLIC_BASE_URL must be set in production"),
        };

        Ok(Self {
            environment,
            host: var("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            public_base_url,
            database_url: var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: parse_or(&var, "DATABASE_MAX_CONNECTIONS", 10)?,
            jwt,
            reset_token_secret: var("RESET_TOKEN_SECRET").unwrap_or(jwt_secret),
            mail,
            expose_token_in_body: parse_or(&var, "EXPOSE_TOKEN_IN_BODY", dev)?,
            log_reset_tokens: parse_or(&var, "LOG_RESET_TOKENS", dev)?,
            rate_limit_enabled: parse_or(&var, "RATE_LIMIT_ENABLED", !dev)?,
            rate_limit_per_hour: parse_or(&var, "RATE_LIMIT_PER_HOUR", 500)?,
        })
    }
}

/// Parses `key` when set; a value that does not parse is a startup error.
fn parse_or<T>(
    var: impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(v) => v
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key} {v:?}: {e}")),
        None => Ok(default),
    }
}
