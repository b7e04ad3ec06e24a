use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{AccessError, Result};
use crate::models::{BearerPair, CredentialPayload, CredentialRecord, Provider, Variant};
use crate::token;

use super::oauth::{self, TokenGrant};
use super::{expires_within, Identity, LiveSession, Refreshed, SessionAdapter};

/// An access token (the live credential itself) plus what is needed to renew it.
#[derive(Debug, Clone)]
pub struct BearerSession {
    pub provider: Provider,
    access_token: SecretString,
    refresh_token: Option<SecretString>,
    pub client_id: Option<String>,
    pub scope: Option<String>,
    pub token_endpoint: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Payload as stored, so a refresh only swaps the tokens.
    stored: BearerPair,
}

impl BearerSession {
    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&SecretString> {
        self.refresh_token.as_ref()
    }
}

/// Outcome of redeeming a refresh token for a different client application.
#[derive(Debug)]
pub struct Exchanged {
    pub session: BearerSession,
    pub payload: BearerPair,
    pub expiry: Option<DateTime<Utc>>,
}

pub struct BearerPairAdapter {
    http: Client,
    config: Config,
    clock: Arc<dyn Clock>,
}

impl BearerPairAdapter {
    pub fn new(http: Client, config: Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            http,
            config,
            clock,
        }
    }

    /// Expiry of an access token: the record's stored expiry, else its `exp` claim.
    pub fn token_expiry(access_token: &str, stored: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        stored.or_else(|| {
            token::decode(access_token)
                .ok()
                .and_then(|claims| claims.expires_at())
        })
    }

    fn build_session(
        &self,
        provider: Provider,
        pair: &BearerPair,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<BearerSession> {
        let access_token = pair.access_token.expose_secret();
        if access_token.trim().is_empty() {
            return Err(AccessError::credential("access token is empty"));
        }

        Ok(BearerSession {
            provider,
            access_token: pair.access_token.clone(),
            refresh_token: pair.refresh_token.clone(),
            client_id: pair
                .client_id
                .clone()
                .or_else(|| self.config.oauth(provider).map(|o| o.client_id.clone())),
            scope: pair
                .scope
                .clone()
                .or_else(|| Some(self.config.scope(provider))),
            token_endpoint: pair
                .token_endpoint
                .clone()
                .or_else(|| self.config.token_endpoint(provider, pair.tenant.as_deref())),
            expires_at: Self::token_expiry(access_token, expiry),
            stored: pair.clone(),
        })
    }

    fn session<'a>(&self, session: &'a LiveSession) -> Result<&'a BearerSession> {
        match session {
            LiveSession::BearerPair(s) => Ok(s),
            other => Err(other.mismatch(Variant::BearerPair)),
        }
    }

    fn expired(&self, session: &BearerSession) -> bool {
        expires_within(session.expires_at, self.clock.now(), self.config.expiry_skew)
    }

    /// Redeem the session's refresh token at its token endpoint.
    async fn redeem(
        &self,
        session: &BearerSession,
        client_id: &str,
        scope: Option<&str>,
    ) -> Result<TokenGrant> {
        let refresh_token = session
            .refresh_token
            .as_ref()
            .ok_or_else(|| AccessError::refresh_failed("no refresh token is stored"))?;
        let endpoint = session.token_endpoint.as_deref().ok_or_else(|| {
            AccessError::refresh_failed(format!(
                "no token endpoint is known for {}",
                session.provider
            ))
        })?;

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("refresh_token", refresh_token.expose_secret()),
        ];
        if let Some(scope) = scope {
            form.push(("scope", scope));
        }

        oauth::request_token(&self.http, endpoint, &form, self.clock.now())
            .await
            .map_err(|e| e.into_refresh_failed())
    }

    /// Payload and session after a grant, keeping the old refresh token if
    /// the issuer did not rotate it.
    fn apply_grant(
        &self,
        session: &BearerSession,
        stored: BearerPair,
        grant: TokenGrant,
    ) -> (BearerSession, BearerPair) {
        let refresh_token = grant.refresh_token.or_else(|| session.refresh_token.clone());
        let payload = BearerPair {
            access_token: grant.access_token.clone(),
            refresh_token: refresh_token.clone(),
            ..stored
        };
        let next = BearerSession {
            access_token: grant.access_token,
            refresh_token,
            expires_at: grant.expires_at,
            stored: payload.clone(),
            ..session.clone()
        };
        (next, payload)
    }

    /// Use the session's refresh token to obtain a token for another client
    /// application of the same family.
    ///
    /// The result belongs to `client_id` and `scope`; the original session is
    /// left untouched.
    pub async fn exchange(
        &self,
        session: &LiveSession,
        client_id: &str,
        scope: &str,
    ) -> Result<Exchanged> {
        let session = self.session(session)?;
        let grant = self.redeem(session, client_id, Some(scope)).await?;
        tracing::info!(
            provider = %session.provider,
            from = ?session.client_id,
            to = %client_id,
            "Exchanged refresh token for another client"
        );

        let stored = BearerPair {
            client_id: Some(client_id.to_string()),
            scope: Some(scope.to_string()),
            ..session.stored.clone()
        };
        let (mut next, payload) = self.apply_grant(session, stored, grant);
        next.client_id = Some(client_id.to_string());
        next.scope = Some(scope.to_string());
        Ok(Exchanged {
            expiry: next.expires_at,
            session: next,
            payload,
        })
    }
}

#[async_trait]
impl SessionAdapter for BearerPairAdapter {
    fn variant(&self) -> Variant {
        Variant::BearerPair
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    async fn materialize(&self, record: &CredentialRecord) -> Result<LiveSession> {
        let CredentialPayload::BearerPair(pair) = &record.payload else {
            return Err(AccessError::credential(format!(
                "record {:?} is {}, not bearer-pair",
                record.name,
                record.variant()
            )));
        };
        Ok(LiveSession::BearerPair(self.build_session(
            record.provider,
            pair,
            record.expiry,
        )?))
    }

    fn is_expired(&self, session: &LiveSession) -> bool {
        match session {
            LiveSession::BearerPair(s) => self.expired(s),
            _ => false,
        }
    }

    /// Tokens are checked locally: present and not expired.
    async fn is_valid(&self, session: &LiveSession) -> Result<bool> {
        let session = self.session(session)?;
        Ok(!session.access_token.expose_secret().is_empty() && !self.expired(session))
    }

    async fn refresh(&self, session: LiveSession) -> Result<Refreshed> {
        let session = self.session(&session)?;
        let client_id = session.client_id.as_deref().ok_or_else(|| {
            AccessError::refresh_failed(format!(
                "no client id is known for {} refresh",
                session.provider
            ))
        })?;
        let grant = self
            .redeem(session, client_id, session.scope.as_deref())
            .await?;
        if grant.access_token.expose_secret() == session.access_token.expose_secret() {
            return Err(AccessError::refresh_failed(
                "issuer returned the same access token",
            ));
        }

        let rotated = grant.refresh_token.is_some();
        let (next, payload) = self.apply_grant(session, session.stored.clone(), grant);
        tracing::info!(
            provider = %session.provider,
            expires_at = ?next.expires_at,
            rotated,
            "Refreshed bearer token"
        );
        Ok(Refreshed {
            expiry: next.expires_at,
            payload: Some(CredentialPayload::BearerPair(payload)),
            session: LiveSession::BearerPair(next),
        })
    }

    async fn identify(&self, session: &LiveSession) -> Result<Identity> {
        let session = self.session(session)?;
        match token::decode(session.access_token.expose_secret()) {
            Ok(claims) => Ok(Identity {
                principal: claims
                    .principal_name()
                    .or_else(|| claims.app_id())
                    .or_else(|| claims.subject())
                    .map(str::to_string),
                account: claims.object_id().map(str::to_string),
                tenant: claims.tenant().map(str::to_string),
                ..Default::default()
            }),
            Err(_) => Ok(Identity {
                warning: Some("access token is opaque; identity cannot be read from it".into()),
                ..Default::default()
            }),
        }
    }
}
