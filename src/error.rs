//! Error handling and custom error types
//!
//! Transport failures and cancellation reject a call. Errors reported by the
//! provider inside a well-formed payload are returned as data instead, see
//! [`crate::ai::gemini::Outcome`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Network failure, missing body, or non-2xx status without a structured
    /// error payload.
    #[error("{message}")]
    Transport {
        status: Option<u16>,
        phrase: &'static str,
        message: String,
    },

    #[error("Request cancelled")]
    Cancelled,
}

impl Error {
    /// HTTP status attached to a transport failure, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Transport { status, .. } => *status,
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
