//! Configuration types, built from environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Env var naming an alternate `.env` file.
pub const ENV_FILE_VAR: &str = "INBOX_SENTRY_ENV_FILE";

const DEFAULT_IMAP_SERVER: &str = "imap.gmail.com";
const DEFAULT_SENDER_FILTER: &str = "facebookmail.com";
const DEFAULT_SEARCH_TERMS: &str = "מומה,Moma";
const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Everything one watch run needs.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub username: String,
    pub password: SecretString,
    pub mailbox: String,
    /// Matched against the `From` header by the server-side search.
    pub sender_filter: String,
    pub search_terms: Vec<String>,
    pub follow_links: bool,
    pub link_timeout: Duration,
    pub alert_label: String,
    pub telegram: TelegramConfig,
}

/// Telegram Bot API destination.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_url: String,
    pub bot_token: SecretString,
    pub chat_id: String,
}

impl WatchConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, ConfigError> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let username = required("EMAIL_USER")?;
        let password = SecretString::from(required("EMAIL_PASS")?);
        let bot_token = SecretString::from(required("TELEGRAM_TOKEN")?);
        let chat_id = required("TELEGRAM_CHAT_ID")?;

        let imap_host = lookup("IMAP_SERVER").unwrap_or_else(|| DEFAULT_IMAP_SERVER.to_string());
        let imap_port: u16 = parse_or(&lookup, "IMAP_PORT", 993)?;
        let mailbox = lookup("MAILBOX").unwrap_or_else(|| "INBOX".to_string());
        let sender_filter =
            lookup("SENDER_FILTER").unwrap_or_else(|| DEFAULT_SENDER_FILTER.to_string());

        let raw_terms = lookup("SEARCH_TERMS").unwrap_or_else(|| DEFAULT_SEARCH_TERMS.to_string());
        let search_terms = parse_terms(&raw_terms);
        if search_terms.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "SEARCH_TERMS".into(),
                message: "no search terms left after trimming".into(),
            });
        }

        let follow_links = match lookup("FOLLOW_LINKS") {
            Some(v) => parse_bool("FOLLOW_LINKS", &v)?,
            None => true,
        };
        let link_timeout = Duration::from_secs(parse_or(&lookup, "LINK_TIMEOUT_SECS", 10)?);
        let alert_label = lookup("ALERT_LABEL").unwrap_or_else(|| "Facebook".to_string());

        let api_url = lookup("TELEGRAM_API_URL")
            .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            imap_host,
            imap_port,
            username,
            password,
            mailbox,
            sender_filter,
            search_terms,
            follow_links,
            link_timeout,
            alert_label,
            telegram: TelegramConfig {
                api_url,
                bot_token,
                chat_id,
            },
        })
    }
}

/// Split a comma-separated term list.
///
/// Blank entries are dropped; duplicates (ignoring case) keep the first spelling.
pub fn parse_terms(raw: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let lower = term.to_lowercase();
        if !terms.iter().any(|t| t.to_lowercase() == lower) {
            terms.push(term.to_string());
        }
    }
    terms
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got {other:?}"),
        }),
    }
}

/// Load a `.env` file into the process environment, overriding existing values.
///
/// Uses `INBOX_SENTRY_ENV_FILE` when set, otherwise `./.env`. Returns the
/// path that was loaded, or `None` when there was no file.
pub fn load_env_file() -> Result<Option<PathBuf>, ConfigError> {
    let path = std::env::var(ENV_FILE_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".env"));
    load_env_file_from(&path)
}

/// Load a specific env file; a missing file is not an error.
pub fn load_env_file_from(path: &Path) -> Result<Option<PathBuf>, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No env file found");
        return Ok(None);
    }
    dotenvy::from_path_override(path).map_err(|e| ConfigError::EnvFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(Some(path.to_path_buf()))
}
