use std::{net::SocketAddr, str::FromStr};

use base64::{engine::general_purpose, Engine as _};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Runtime settings, read from the process environment (a `.env` file is loaded first when
/// present).
#[derive(Debug, Clone)]
pub struct Config {
    pub mongodb_uri: String,
    pub database_name: String,
    pub bind_address: SocketAddr,

    pub jwt_secret: Vec<u8>,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,

    pub mail: MailConfig,
    pub cors_origin: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MailConfig {
    pub from: String,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    /// Mailbox that receives staff-facing messages such as new orders.
    pub admin_email: Option<String>,
}

pub const DEFAULT_DATABASE_NAME: &str = "autoparts";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
pub const DEFAULT_MAIL_FROM: &str = "no-reply@autoparts.local";

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &'static str| lookup(name).filter(|it| !it.trim().is_empty());
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let bind_address = parse(
            "BIND_ADDRESS",
            &get("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
        )?;

        let access_token_ttl_minutes = get("ACCESS_TOKEN_TTL_MINUTES")
            .map(|it| parse("ACCESS_TOKEN_TTL_MINUTES", &it))
            .transpose()?
            .unwrap_or(15);
        let refresh_token_ttl_days = get("REFRESH_TOKEN_TTL_DAYS")
            .map(|it| parse("REFRESH_TOKEN_TTL_DAYS", &it))
            .transpose()?
            .unwrap_or(7);

        Ok(Self {
            mongodb_uri: require("MONGODB_URI")?,
            database_name: get("DATABASE_NAME")
                .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string()),
            bind_address,

            jwt_secret: decode_secret(&require("JWT_SECRET")?),
            access_token_ttl_minutes,
            refresh_token_ttl_days,

            mail: MailConfig {
                from: get("MAIL_FROM").unwrap_or_else(|| DEFAULT_MAIL_FROM.to_string()),
                api_url: get("MAIL_API_URL"),
                api_key: get("MAIL_API_KEY"),
                admin_email: get("ADMIN_EMAIL"),
            },
            cors_origin: get("CORS_ORIGIN"),
        })
    }
}

fn parse<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
        name,
        reason: err.to_string(),
    })
}

/// Accepts a base64 secret, falling back to the raw bytes.
fn decode_secret(secret: &str) -> Vec<u8> {
    general_purpose::STANDARD
        .decode(secret.trim())
        .unwrap_or_else(|_| secret.as_bytes().to_vec())
}
