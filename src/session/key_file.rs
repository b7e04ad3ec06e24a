//! Key-file sessions: a service-account document signs its own token requests.
//!
//! Two document shapes are understood:
//! - Google service-account JSON (`type = "service_account"`, `client_email`,
//!   `private_key`), exchanged through the RS256 JWT-bearer grant.
//! - Azure service-principal JSON (`clientId`/`appId`, `clientSecret`/`password`,
//!   `tenantId`/`tenant`), exchanged through the client-credentials grant.
//!
//! No refresh token exists for either; every refresh signs a new request, and
//! the stored document never changes.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{AccessError, Result};
use crate::models::{CredentialPayload, CredentialRecord, KeyFile, Provider, Variant};

use super::oauth::{self, TokenGrant};
use super::{expires_within, Identity, LiveSession, Refreshed, SessionAdapter};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

#[derive(Deserialize)]
struct ServiceAccountDocument {
    #[serde(rename = "type")]
    kind: String,
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Deserialize)]
struct ServicePrincipalDocument {
    #[serde(alias = "clientId", alias = "appId")]
    client_id: String,
    #[serde(alias = "clientSecret", alias = "password")]
    client_secret: String,
    #[serde(alias = "tenantId", alias = "tenant")]
    tenant_id: String,
    #[serde(default, alias = "subscriptionId")]
    subscription_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KeyDocument {
    ServiceAccount(ServiceAccountDocument),
    ServicePrincipal(ServicePrincipalDocument),
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    jti: String,
}

enum Signer {
    ServiceAccount {
        client_email: String,
        key: EncodingKey,
        key_id: Option<String>,
        project_id: Option<String>,
        token_uri: String,
    },
    ClientSecret {
        client_id: String,
        secret: SecretString,
        tenant: String,
        subscription_id: Option<String>,
        token_endpoint: String,
    },
}

/// A parsed key document plus the bearer token it last obtained.
pub struct KeyFileSession {
    signer: Arc<Signer>,
    scope: String,
    token: Option<TokenGrant>,
}

impl fmt::Debug for KeyFileSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyFileSession")
            .field("principal", &self.principal())
            .field("scope", &self.scope)
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

impl KeyFileSession {
    pub fn principal(&self) -> &str {
        match &*self.signer {
            Signer::ServiceAccount { client_email, .. } => client_email,
            Signer::ClientSecret { client_id, .. } => client_id,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn access_token(&self) -> Option<&SecretString> {
        self.token.as_ref().map(|t| &t.access_token)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.token.as_ref().and_then(|t| t.expires_at)
    }
}

fn scope_from(scopes: &[String], default: impl FnOnce() -> String) -> String {
    if scopes.is_empty() {
        default()
    } else {
        scopes.join(" ")
    }
}

/// The client-credentials grant cannot mint refresh tokens.
fn without_offline_access(scope: &str) -> String {
    scope
        .split_whitespace()
        .filter(|s| *s != "offline_access")
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct KeyFileAdapter {
    http: Client,
    config: Config,
    clock: Arc<dyn Clock>,
}

impl KeyFileAdapter {
    pub fn new(http: Client, config: Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            http,
            config,
            clock,
        }
    }

    fn build_session(&self, provider: Provider, key_file: &KeyFile) -> Result<KeyFileSession> {
        let document: KeyDocument = serde_json::from_str(key_file.document.expose_secret())
            .map_err(|e| {
                AccessError::credential(format!("key file is not a recognised document: {e}"))
            })?;

        let (signer, scope) = match document {
            KeyDocument::ServiceAccount(doc) => {
                if doc.kind != "service_account" {
                    return Err(AccessError::credential(format!(
                        "key file type {:?} is not supported",
                        doc.kind
                    )));
                }
                let key = EncodingKey::from_rsa_pem(doc.private_key.as_bytes()).map_err(|e| {
                    AccessError::credential(format!("invalid RSA private key (PEM): {e}"))
                })?;
                let scope = scope_from(&key_file.scopes, || self.config.gcp.scope.clone());
                let signer = Signer::ServiceAccount {
                    client_email: doc.client_email,
                    key,
                    key_id: doc.private_key_id,
                    project_id: doc.project_id,
                    token_uri: doc
                        .token_uri
                        .unwrap_or_else(|| self.config.gcp.token_uri.clone()),
                };
                (signer, scope)
            }
            KeyDocument::ServicePrincipal(doc) => {
                let issuer = if provider == Provider::Directory {
                    Provider::Directory
                } else {
                    Provider::Azure
                };
                let oauth = self.config.oauth(issuer).unwrap_or(&self.config.azure);
                let scope = scope_from(&key_file.scopes, || {
                    without_offline_access(&self.config.scope(issuer))
                });
                let signer = Signer::ClientSecret {
                    token_endpoint: oauth.token_endpoint(Some(&doc.tenant_id)),
                    client_id: doc.client_id,
                    secret: SecretString::from(doc.client_secret),
                    tenant: doc.tenant_id,
                    subscription_id: doc.subscription_id,
                };
                (signer, scope)
            }
        };

        Ok(KeyFileSession {
            signer: Arc::new(signer),
            scope,
            token: None,
        })
    }

    async fn fetch_token(&self, session: &KeyFileSession) -> Result<TokenGrant> {
        let now = self.clock.now();
        let grant = match &*session.signer {
            Signer::ServiceAccount {
                client_email,
                key,
                key_id,
                token_uri,
                ..
            } => {
                let mut header = Header::new(Algorithm::RS256);
                header.typ = Some("JWT".to_string());
                header.kid = key_id.clone();
                let claims = AssertionClaims {
                    iss: client_email,
                    scope: &session.scope,
                    aud: token_uri,
                    iat: now.timestamp(),
                    exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
                    jti: Uuid::new_v4().to_string(),
                };
                let assertion = encode(&header, &claims, key)
                    .map_err(|e| AccessError::credential(format!("failed to sign assertion: {e}")))?;

                oauth::request_token(
                    &self.http,
                    token_uri,
                    &[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())],
                    now,
                )
                .await
            }
            Signer::ClientSecret {
                client_id,
                secret,
                token_endpoint,
                ..
            } => {
                oauth::request_token(
                    &self.http,
                    token_endpoint,
                    &[
                        ("grant_type", "client_credentials"),
                        ("client_id", client_id.as_str()),
                        ("client_secret", secret.expose_secret()),
                        ("scope", session.scope.as_str()),
                    ],
                    now,
                )
                .await
            }
        };
        grant.map_err(|e| e.into_refresh_failed())
    }

    fn session<'a>(&self, session: &'a LiveSession) -> Result<&'a KeyFileSession> {
        match session {
            LiveSession::KeyFile(s) => Ok(s),
            other => Err(other.mismatch(Variant::KeyFile)),
        }
    }

    fn token_expired(&self, session: &KeyFileSession) -> bool {
        match &session.token {
            None => true,
            Some(token) => {
                expires_within(token.expires_at, self.clock.now(), self.config.expiry_skew)
            }
        }
    }
}

#[async_trait]
impl SessionAdapter for KeyFileAdapter {
    fn variant(&self) -> Variant {
        Variant::KeyFile
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    async fn materialize(&self, record: &CredentialRecord) -> Result<LiveSession> {
        let CredentialPayload::KeyFile(key_file) = &record.payload else {
            return Err(AccessError::credential(format!(
                "record {:?} is {}, not key-file",
                record.name,
                record.variant()
            )));
        };
        Ok(LiveSession::KeyFile(
            self.build_session(record.provider, key_file)?,
        ))
    }

    /// A freshly materialized session has no token yet and counts as expired.
    fn is_expired(&self, session: &LiveSession) -> bool {
        match session {
            LiveSession::KeyFile(s) => self.token_expired(s),
            _ => false,
        }
    }

    async fn is_valid(&self, session: &LiveSession) -> Result<bool> {
        let session = self.session(session)?;
        Ok(!self.token_expired(session))
    }

    async fn refresh(&self, session: LiveSession) -> Result<Refreshed> {
        let session = self.session(&session)?;
        let token = self.fetch_token(session).await?;
        tracing::debug!(
            principal = %session.principal(),
            expires_at = ?token.expires_at,
            "Obtained key-file token"
        );
        Ok(Refreshed::unchanged(LiveSession::KeyFile(KeyFileSession {
            signer: session.signer.clone(),
            scope: session.scope.clone(),
            token: Some(token),
        })))
    }

    async fn identify(&self, session: &LiveSession) -> Result<Identity> {
        let session = self.session(session)?;
        Ok(match &*session.signer {
            Signer::ServiceAccount {
                client_email,
                project_id,
                ..
            } => Identity {
                principal: Some(client_email.clone()),
                account: project_id.clone(),
                ..Default::default()
            },
            Signer::ClientSecret {
                client_id,
                tenant,
                subscription_id,
                ..
            } => Identity {
                principal: Some(client_id.clone()),
                account: subscription_id.clone(),
                tenant: Some(tenant.clone()),
                ..Default::default()
            },
        })
    }
}
