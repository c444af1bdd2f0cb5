//! Error types for inbox-sentry.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load env file {path}: {reason}")]
    EnvFile { path: String, reason: String },
}

/// Errors from the mailbox and chat channels.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to connect: {reason}")]
    Connect { name: String, reason: String },

    #[error("Authentication failed for channel {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Protocol error on channel {name}: {reason}")]
    Protocol { name: String, reason: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

impl ChannelError {
    pub(crate) fn protocol(name: &str, reason: impl Into<String>) -> Self {
        Self::Protocol {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
