use std::collections::BTreeMap;
use std::fmt;

/// Coarse classification of every user-visible failure in the system.
///
/// This is deliberately a flat set of codes rather than a type per
/// component: the CLI, the control bridge, and the coordinator all need
/// to render the *same* vocabulary to whatever sits on the other end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Unauthorized,
    TokenExpired,
    InvalidCredentials,
    Forbidden,
    IpExhausted,
    RateLimited,
    Unavailable,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::TokenExpired => "token_expired",
            ErrorKind::InvalidCredentials => "invalid_credentials",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::IpExhausted => "ip_exhausted",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// A user-visible error: a stable [`ErrorKind`], a short message safe to
/// show verbatim, and an optional bag of structured details.
///
/// Never wraps raw driver/library text directly in `message`; callers
/// that need to preserve the underlying cause for logs should attach it
/// via `tracing::error!(error = %underlying, ...)` at the call site and
/// put only a short, stable summary here.
#[derive(Debug, Clone, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[error("{message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

pub type Result<T> = std::result::Result<T, Error>;
