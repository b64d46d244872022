//! Unified session error model.
//! Every session operation reports failure through this enum so callers can
//! branch on kind (retryable vs. terminal vs. informational) instead of
//! string-matching provider messages.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::providers::ProviderError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionError {
    /// Input rejected locally before any remote call.
    Validation { code: String, message: String },
    /// The identity provider rejected the supplied credentials.
    Credentials { code: String, message: String },
    /// The operation requires an active session and none exists.
    NoSession { code: String, message: String },
    /// The account already exists (duplicate registration).
    Conflict { code: String, message: String },
    /// Transport failure or provider outage.
    Network { code: String, message: String },
    /// Another session-mutating operation is already in flight.
    Busy { code: String, message: String },
    /// Not a failure: a non-error condition reported through the error
    /// channel, e.g. "confirm your email to finish registration".
    Informational { code: String, message: String },
}

impl SessionError {
    pub fn code_str(&self) -> &str {
        match self {
            SessionError::Validation { code, .. }
            | SessionError::Credentials { code, .. }
            | SessionError::NoSession { code, .. }
            | SessionError::Conflict { code, .. }
            | SessionError::Network { code, .. }
            | SessionError::Busy { code, .. }
            | SessionError::Informational { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SessionError::Validation { message, .. }
            | SessionError::Credentials { message, .. }
            | SessionError::NoSession { message, .. }
            | SessionError::Conflict { message, .. }
            | SessionError::Network { message, .. }
            | SessionError::Busy { message, .. }
            | SessionError::Informational { message, .. } => message.as_str(),
        }
    }

    pub fn validation<S: Into<String>>(code: S, msg: S) -> Self { SessionError::Validation { code: code.into(), message: msg.into() } }
    pub fn credentials<S: Into<String>>(code: S, msg: S) -> Self { SessionError::Credentials { code: code.into(), message: msg.into() } }
    pub fn no_session<S: Into<String>>(code: S, msg: S) -> Self { SessionError::NoSession { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { SessionError::Conflict { code: code.into(), message: msg.into() } }
    pub fn network<S: Into<String>>(code: S, msg: S) -> Self { SessionError::Network { code: code.into(), message: msg.into() } }
    pub fn busy<S: Into<String>>(code: S, msg: S) -> Self { SessionError::Busy { code: code.into(), message: msg.into() } }
    pub fn informational<S: Into<String>>(code: S, msg: S) -> Self { SessionError::Informational { code: code.into(), message: msg.into() } }

    /// Worth re-submitting without changing the input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Network { .. } | SessionError::Busy { .. })
    }

    pub fn is_informational(&self) -> bool {
        matches!(self, SessionError::Informational { .. })
    }
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for SessionError {}

pub type SessionResult<T> = Result<T, SessionError>;

impl From<ProviderError> for SessionError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Credentials(msg) => SessionError::Credentials { code: "invalid_credentials".into(), message: msg },
            ProviderError::Conflict(msg) => SessionError::Conflict { code: "account_exists".into(), message: msg },
            ProviderError::Service { status, message } => {
                SessionError::Network { code: format!("provider_http_{}", status), message }
            }
            ProviderError::Network(msg) => SessionError::Network { code: "network_error".into(), message: msg },
        }
    }
}
