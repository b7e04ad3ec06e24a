//! Typed failures surfaced to callers of the store, adapters and access manager.

use crate::models::Provider;

pub type Result<T, E = AccessError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// Payload is malformed or cannot be turned into a live session.
    #[error("unusable credential: {reason}")]
    Credential { reason: String },

    #[error("{tool} executable not found (checked {checked})")]
    ToolNotFound { tool: String, checked: String },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("a {provider} credential named {name:?} already exists")]
    DuplicateName { provider: Provider, name: String },

    #[error("credential {name:?} is expired and could not be refreshed")]
    ExpiredCredential { name: String },

    #[error("credential {name:?} is not valid: {reason}")]
    InvalidCredential { name: String, reason: String },

    #[error("refresh failed: {reason}")]
    RefreshFailed { reason: String },

    #[error("{flow} did not complete within {seconds}s")]
    Timeout { flow: String, seconds: u64 },

    #[error("{flow} was cancelled")]
    Cancelled { flow: String },

    /// The provider could not be reached or answered with garbage.
    #[error("network error: {reason}")]
    Network { reason: String },

    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),
}

impl AccessError {
    /// Stable, machine-checkable code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Credential { .. } => "credential_error",
            Self::ToolNotFound { .. } => "tool_not_found",
            Self::NotFound { .. } => "not_found",
            Self::DuplicateName { .. } => "duplicate_name",
            Self::ExpiredCredential { .. } => "expired_credential",
            Self::InvalidCredential { .. } => "invalid_credential",
            Self::RefreshFailed { .. } => "refresh_failed",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::Network { .. } => "network_error",
            Self::Storage(_) => "storage_error",
        }
    }

    pub fn credential(reason: impl Into<String>) -> Self {
        Self::Credential {
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn refresh_failed(reason: impl Into<String>) -> Self {
        Self::RefreshFailed {
            reason: reason.into(),
        }
    }

    pub fn network(reason: impl std::fmt::Display) -> Self {
        Self::Network {
            reason: reason.to_string(),
        }
    }

    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCredential {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Render as the `{"code", "message"}` object used in command output.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

impl From<anyhow::Error> for AccessError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}
