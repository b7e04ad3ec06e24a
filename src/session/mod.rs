//! Live sessions materialized from stored credentials.
//!
//! Each credential [`Variant`] has one [`SessionAdapter`]. An adapter turns a
//! record's payload into a [`LiveSession`], answers whether that session is
//! expired or valid, and refreshes it when the variant allows:
//!
//! | variant       | materialize                   | refresh                          |
//! |---------------|-------------------------------|----------------------------------|
//! | static-key    | shape check, build STS client | no-op (rotated out of band)      |
//! | cli-delegated | locate tool, ask "who am I"   | no-op (the tool owns the session)|
//! | key-file      | parse document, build signer  | sign assertion, fetch new token  |
//! | bearer-pair   | pass-through                  | refresh-token grant, persisted   |

mod bearer;
mod cli;
pub mod device_code;
mod key_file;
pub mod oauth;
mod static_key;

pub use bearer::{BearerPairAdapter, BearerSession, Exchanged};
pub use cli::{
    locate_tool, CliDelegatedAdapter, CliInvocation, CliLogin, CliOutput, CliRunner, CliSession,
    ProcessRunner,
};
pub use key_file::{KeyFileAdapter, KeyFileSession};
pub use static_key::{StaticKeyAdapter, StaticKeySession};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::json;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{AccessError, Result};
use crate::models::{CredentialPayload, CredentialRecord, Variant};

/// One account, subscription or project a principal can act in.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccountRef {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    pub is_default: bool,
}

/// Who a session authenticates as, as reported by the provider.
///
/// When a tool's output cannot be parsed, `raw_output` carries it verbatim
/// and `warning` says why; the session may still be usable.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Identity {
    pub principal: Option<String>,
    pub account: Option<String>,
    pub tenant: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<AccountRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl Identity {
    pub(crate) fn unparsed(raw_output: &str, warning: impl Into<String>) -> Self {
        Self {
            raw_output: Some(raw_output.to_string()),
            warning: Some(warning.into()),
            ..Default::default()
        }
    }
}

/// A ready-to-use authenticated context.
#[derive(Debug)]
pub enum LiveSession {
    StaticKey(StaticKeySession),
    CliDelegated(CliSession),
    KeyFile(KeyFileSession),
    BearerPair(BearerSession),
}

impl LiveSession {
    pub fn variant(&self) -> Variant {
        match self {
            LiveSession::StaticKey(_) => Variant::StaticKey,
            LiveSession::CliDelegated(_) => Variant::CliDelegated,
            LiveSession::KeyFile(_) => Variant::KeyFile,
            LiveSession::BearerPair(_) => Variant::BearerPair,
        }
    }

    /// Bearer token to put in an `Authorization` header, for variants that have one.
    pub fn bearer_token(&self) -> Option<&SecretString> {
        match self {
            LiveSession::KeyFile(session) => session.access_token(),
            LiveSession::BearerPair(session) => Some(session.access_token()),
            LiveSession::StaticKey(_) | LiveSession::CliDelegated(_) => None,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            LiveSession::KeyFile(session) => session.expires_at(),
            LiveSession::BearerPair(session) => session.expires_at,
            LiveSession::StaticKey(_) | LiveSession::CliDelegated(_) => None,
        }
    }

    /// Secret-free description for command output.
    pub fn describe(&self) -> serde_json::Value {
        let mut value = match self {
            LiveSession::StaticKey(s) => json!({
                "access_key_id": s.access_key_id,
                "region": s.region,
                "temporary": s.session_token().is_some(),
            }),
            LiveSession::CliDelegated(s) => json!({
                "tool": s.tool.program(),
                "program": s.program,
                "identity": s.identity,
            }),
            LiveSession::KeyFile(s) => json!({
                "principal": s.principal(),
                "scope": s.scope(),
            }),
            LiveSession::BearerPair(s) => json!({
                "client_id": s.client_id,
                "scope": s.scope,
                "has_refresh_token": s.refresh_token().is_some(),
                "claims": crate::token::decode(s.access_token().expose_secret())
                    .ok()
                    .map(|claims| serde_json::to_value(claims.summary()).unwrap_or_default()),
            }),
        };
        value["variant"] = json!(self.variant());
        if let Some(expires_at) = self.expires_at() {
            value["expires_at"] = json!(expires_at);
        }
        value
    }

    pub(crate) fn mismatch(&self, expected: Variant) -> AccessError {
        AccessError::credential(format!(
            "{expected} adapter was handed a {} session",
            self.variant()
        ))
    }
}

/// Whether `expires_at` falls within `skew` of `now`. An unknown expiry never
/// counts as expired.
pub(crate) fn expires_within(
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    skew: std::time::Duration,
) -> bool {
    let skew = chrono::Duration::from_std(skew).unwrap_or_else(|_| chrono::Duration::zero());
    expires_at.is_some_and(|exp| exp.checked_sub_signed(skew).map_or(true, |t| t <= now))
}

/// Result of a successful refresh.
#[derive(Debug)]
pub struct Refreshed {
    pub session: LiveSession,
    /// New payload to write back to the store, when the stored material changed.
    pub payload: Option<CredentialPayload>,
    pub expiry: Option<DateTime<Utc>>,
}

impl Refreshed {
    /// New session, stored payload left as is.
    pub fn unchanged(session: LiveSession) -> Self {
        Self {
            session,
            payload: None,
            expiry: None,
        }
    }
}

/// Builds and checks live sessions for one credential variant.
#[async_trait]
pub trait SessionAdapter: Send + Sync {
    fn variant(&self) -> Variant;

    /// Whether [`refresh`](Self::refresh) can bring an expired session back.
    fn supports_refresh(&self) -> bool {
        false
    }

    /// Build a live session from a record's payload. Malformed payloads fail
    /// with a credential error.
    async fn materialize(&self, record: &CredentialRecord) -> Result<LiveSession>;

    /// Local, time-based check; never calls the provider.
    fn is_expired(&self, session: &LiveSession) -> bool;

    /// Ask the provider (or check locally) whether the session authenticates.
    /// An expired session is never valid.
    async fn is_valid(&self, session: &LiveSession) -> Result<bool>;

    async fn refresh(&self, session: LiveSession) -> Result<Refreshed> {
        let _ = session;
        Err(AccessError::refresh_failed(format!(
            "{} sessions are renewed outside this tool",
            self.variant()
        )))
    }

    /// Cheapest identity call the provider offers.
    async fn identify(&self, session: &LiveSession) -> Result<Identity>;
}

/// One adapter per variant, sharing an HTTP client and clock.
pub struct SessionAdapters {
    static_key: StaticKeyAdapter,
    cli: CliDelegatedAdapter,
    key_file: KeyFileAdapter,
    bearer: BearerPairAdapter,
}

impl SessionAdapters {
    pub fn new(
        config: &Config,
        http: Client,
        runner: Arc<dyn CliRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            static_key: StaticKeyAdapter::new(&config.aws),
            cli: CliDelegatedAdapter::new(runner, config.cli.clone()),
            key_file: KeyFileAdapter::new(http.clone(), config.clone(), clock.clone()),
            bearer: BearerPairAdapter::new(http, config.clone(), clock),
        }
    }

    pub fn for_variant(&self, variant: Variant) -> &dyn SessionAdapter {
        match variant {
            Variant::StaticKey => &self.static_key,
            Variant::CliDelegated => &self.cli,
            Variant::KeyFile => &self.key_file,
            Variant::BearerPair => &self.bearer,
        }
    }

    pub fn cli(&self) -> &CliDelegatedAdapter {
        &self.cli
    }

    pub fn bearer(&self) -> &BearerPairAdapter {
        &self.bearer
    }
}
