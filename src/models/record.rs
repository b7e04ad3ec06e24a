use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::{Clock, SystemClock};

use super::{CredentialPayload, Provider, Variant};

/// One named credential of a given provider.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub provider: Provider,
    /// Unique within the provider's store.
    pub name: String,
    pub active: bool,
    /// Assigned when the record is created.
    pub created_at: DateTime<Utc>,
    /// Known expiry of the stored material; only bearer-pair records carry one.
    pub expiry: Option<DateTime<Utc>>,
    pub payload: CredentialPayload,
}

impl CredentialRecord {
    /// Create an inactive record stamped with the current time.
    pub fn new(provider: Provider, name: impl Into<String>, payload: CredentialPayload) -> Self {
        Self::new_with_clock(provider, name, payload, &SystemClock)
    }

    pub fn new_with_clock(
        provider: Provider,
        name: impl Into<String>,
        payload: CredentialPayload,
        clock: &dyn Clock,
    ) -> Self {
        Self {
            provider,
            name: name.into(),
            active: false,
            created_at: clock.now(),
            expiry: None,
            payload,
        }
    }

    pub fn with_expiry(mut self, expiry: Option<DateTime<Utc>>) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn variant(&self) -> Variant {
        self.payload.variant()
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            provider: self.provider,
            name: self.name.clone(),
            variant: self.variant(),
            active: self.active,
            created_at: self.created_at,
            expiry: self.expiry,
        }
    }
}

/// Secret-free view of a record, safe to print and return to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSummary {
    pub provider: Provider,
    pub name: String,
    pub variant: Variant,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

/// Names are user-supplied labels; reject the ones that would be unreadable in listings.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Credential name must not be empty".to_string());
    }
    if name.trim() != name {
        return Err(format!(
            "Credential name {name:?} has leading or trailing whitespace"
        ));
    }
    if name.chars().any(char::is_control) {
        return Err(format!(
            "Credential name {name:?} contains control characters"
        ));
    }
    Ok(())
}
