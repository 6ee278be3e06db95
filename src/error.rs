use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No database location could be resolved; nothing was attempted.
    #[error("storage is not configured")]
    StoreNotConfigured,

    /// No usable upstream token for the workspace.
    #[error("no Meta access token configured for this workspace")]
    CredentialMissing,

    /// The upstream platform rejected the credential itself.
    #[error("Meta access token expired or invalid")]
    AuthExpired,

    /// The upstream platform returned a business error for one call.
    #[error("Meta API error {code}: {message}")]
    UpstreamRejected { code: i64, message: String },

    /// Network failure or timeout reaching the upstream platform.
    #[error("Meta API unreachable: {0}")]
    UpstreamUnavailable(String),

    #[error("Database error: {0}")]
    Persistence(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Short actionable remediation for the caller-facing error classes.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::AuthExpired | Error::CredentialMissing => {
                Some("regenerate the access token and store it with `metadw token set`")
            }
            Error::UpstreamUnavailable(_) => {
                Some("the upstream call timed out; try a smaller or partial sync (--days, --winners-only)")
            }
            Error::StoreNotConfigured => Some("pass --db or set a home directory for the default path"),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Persistence(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Persistence(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::UpstreamUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
