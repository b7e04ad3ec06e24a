use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{AccessError, Result};
use crate::models::{
    validate_name, BearerPair, CliDelegated, CliTool, CredentialPayload, CredentialRecord,
    Provider, RecordSummary, Variant,
};
use crate::session::device_code::{poll_for_token, request_device_code, DeviceAuthorization};
use crate::session::{
    BearerPairAdapter, CliLogin, CliRunner, Identity, LiveSession, ProcessRunner, SessionAdapter,
    SessionAdapters,
};
use crate::storage::CredentialStore;
use crate::token::{self, TokenClaims};

use super::device_login::DeviceCodeLogin;
use super::validator::ensure_usable;

/// A stored record plus what the identity probe learned about it.
#[derive(Debug, Serialize)]
pub struct Established {
    pub record: RecordSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    /// Set when the record was stored but the probe could not confirm it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Entry point for everything that reads or changes stored credentials.
pub struct AccessManager {
    store: Arc<dyn CredentialStore>,
    adapters: Arc<SessionAdapters>,
    config: Config,
    http: Client,
    clock: Arc<dyn Clock>,
}

impl AccessManager {
    pub fn new(store: Arc<dyn CredentialStore>, config: Config) -> Self {
        Self::with_parts(
            store,
            config,
            Client::new(),
            Arc::new(ProcessRunner),
            Arc::new(SystemClock),
        )
    }

    /// Build with an explicit HTTP client, CLI runner and clock.
    pub fn with_parts(
        store: Arc<dyn CredentialStore>,
        config: Config,
        http: Client,
        runner: Arc<dyn CliRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let adapters = SessionAdapters::new(&config, http.clone(), runner, clock.clone());
        Self {
            store,
            adapters: Arc::new(adapters),
            config,
            http,
            clock,
        }
    }

    /// Reject a bad or taken name before any tool, network or token work.
    async fn ensure_name_free(&self, provider: Provider, name: &str) -> Result<()> {
        validate_name(name).map_err(AccessError::credential)?;
        match self.store.get(provider, name).await {
            Ok(_) => Err(AccessError::DuplicateName {
                provider,
                name: name.to_string(),
            }),
            Err(AccessError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn adapter(&self, variant: Variant) -> &dyn SessionAdapter {
        self.adapters.for_variant(variant)
    }

    /// Live session for the provider's active record, refreshed if needed.
    pub async fn get_current_access(&self, provider: Provider) -> Result<LiveSession> {
        let record = self.store.get_active(provider).await?;
        tracing::debug!(provider = %provider, name = %record.name, variant = %record.variant(), "Materializing active credential");
        ensure_usable(self.store.as_ref(), self.adapter(record.variant()), &record).await
    }

    pub async fn active(&self, provider: Provider) -> Result<RecordSummary> {
        Ok(self.store.get_active(provider).await?.summary())
    }

    /// Store a new credential and probe who it authenticates as.
    ///
    /// Payloads that cannot be materialized are rejected before anything is
    /// written. A failed probe does not undo the store; it comes back as a
    /// warning.
    pub async fn establish(
        &self,
        provider: Provider,
        name: &str,
        payload: CredentialPayload,
        activate: bool,
    ) -> Result<Established> {
        self.ensure_name_free(provider, name).await?;

        let expiry = match &payload {
            CredentialPayload::BearerPair(pair) => {
                BearerPairAdapter::token_expiry(pair.access_token.expose_secret(), None)
            }
            _ => None,
        };
        let mut record =
            CredentialRecord::new_with_clock(provider, name, payload, self.clock.as_ref())
                .with_expiry(expiry);
        let adapter = self.adapter(record.variant());
        let session = adapter.materialize(&record).await?;

        record.active = activate;
        self.store.add(record.clone()).await?;
        tracing::info!(provider = %provider, name = %name, variant = %record.variant(), active = activate, "Stored credential");

        let (identity, warning) = match self.probe(adapter, &record, session).await {
            Ok(identity) => {
                let warning = identity.warning.clone();
                (Some(identity), warning)
            }
            Err(e) => {
                tracing::warn!(provider = %provider, name = %name, error = %e, "Identity probe failed");
                (None, Some(format!("identity probe failed ({}): {e}", e.code())))
            }
        };

        Ok(Established {
            record: self.store.get(provider, name).await?.summary(),
            identity,
            warning,
        })
    }

    /// Refresh if the fresh session is already stale, then ask who it is.
    async fn probe(
        &self,
        adapter: &dyn SessionAdapter,
        record: &CredentialRecord,
        session: LiveSession,
    ) -> Result<Identity> {
        let session = if adapter.is_expired(&session) && adapter.supports_refresh() {
            let refreshed = adapter.refresh(session).await?;
            if let Some(payload) = refreshed.payload {
                self.store
                    .update_payload(record.provider, &record.name, payload, refreshed.expiry)
                    .await?;
            }
            refreshed.session
        } else {
            session
        };

        let mut identity = adapter.identify(&session).await?;
        if adapter.is_expired(&session) && identity.warning.is_none() {
            identity.warning = Some(format!("credential {:?} is already expired", record.name));
        }
        Ok(identity)
    }

    pub async fn list(&self, provider: Provider) -> Result<Vec<RecordSummary>> {
        Ok(self
            .store
            .list(provider)
            .await?
            .iter()
            .map(CredentialRecord::summary)
            .collect())
    }

    /// Make `name` the provider's only active record.
    pub async fn activate(&self, provider: Provider, name: &str) -> Result<RecordSummary> {
        self.store.activate(provider, name).await?;
        tracing::info!(provider = %provider, name = %name, "Activated credential");
        Ok(self.store.get(provider, name).await?.summary())
    }

    pub async fn deactivate_all(&self, provider: Provider) -> Result<()> {
        self.store.deactivate_all(provider).await?;
        tracing::info!(provider = %provider, "Deactivated all credentials");
        Ok(())
    }

    pub async fn delete_active(&self, provider: Provider) -> Result<Option<RecordSummary>> {
        let removed = self.store.delete_active(provider).await?;
        match &removed {
            Some(summary) => {
                tracing::info!(provider = %provider, name = %summary.name, "Deleted active credential")
            }
            None => tracing::debug!(provider = %provider, "No active credential to delete"),
        }
        Ok(removed)
    }

    pub async fn delete(&self, provider: Provider, name: &str) -> Result<RecordSummary> {
        let removed = self.store.delete(provider, name).await?;
        tracing::info!(provider = %provider, name = %name, "Deleted credential");
        Ok(removed)
    }

    /// Unverified claim set of a bearer token, for display only.
    pub fn decode(&self, token: &str) -> Result<TokenClaims> {
        token::decode(token)
    }

    /// Log in through an external CLI tool and record the session it holds.
    pub async fn cli_login(
        &self,
        provider: Provider,
        name: &str,
        tool: CliTool,
        login: &CliLogin,
        activate: bool,
    ) -> Result<Established> {
        self.ensure_name_free(provider, name).await?;

        let session = self.adapters.cli().login(tool, login).await?;
        let identity = session.identity;
        let payload = CredentialPayload::CliDelegated(CliDelegated {
            tool,
            account: identity.account.clone(),
            tenant: identity.tenant.clone(),
        });

        let mut record =
            CredentialRecord::new_with_clock(provider, name, payload, self.clock.as_ref());
        record.active = activate;
        self.store.add(record.clone()).await?;
        tracing::info!(provider = %provider, name = %name, tool = tool.program(), active = activate, "Stored CLI session");

        let warning = identity.warning.clone();
        Ok(Established {
            record: record.summary(),
            identity: Some(identity),
            warning,
        })
    }

    /// Redeem the active bearer record's refresh token for another client
    /// application and store the result as `name`.
    pub async fn exchange(
        &self,
        provider: Provider,
        client_id: &str,
        scope: &str,
        name: &str,
        activate: bool,
    ) -> Result<Established> {
        self.ensure_name_free(provider, name).await?;
        let source = self.store.get_active(provider).await?;
        if source.variant() != Variant::BearerPair {
            return Err(AccessError::credential(format!(
                "active {provider} credential {:?} is {}, not bearer-pair",
                source.name,
                source.variant()
            )));
        }

        let bearer = self.adapters.bearer();
        let session = bearer.materialize(&source).await?;
        let exchanged = bearer.exchange(&session, client_id, scope).await?;

        let mut record = CredentialRecord::new_with_clock(
            provider,
            name,
            CredentialPayload::BearerPair(exchanged.payload),
            self.clock.as_ref(),
        )
        .with_expiry(exchanged.expiry);
        record.active = activate;
        self.store.add(record.clone()).await?;
        tracing::info!(provider = %provider, from = %source.name, name = %name, "Stored exchanged credential");

        let live = LiveSession::BearerPair(exchanged.session);
        let (identity, warning) = match bearer.identify(&live).await {
            Ok(identity) => {
                let warning = identity.warning.clone();
                (Some(identity), warning)
            }
            Err(e) => (None, Some(format!("identity probe failed ({}): {e}", e.code()))),
        };
        Ok(Established {
            record: record.summary(),
            identity,
            warning,
        })
    }

    /// Start a device-code sign-in for `provider` and return right away.
    ///
    /// Polling runs on a spawned task bounded by the configured timeout (or
    /// the code's own lifetime, whichever is shorter). On success the task
    /// stores a bearer-pair record named `name`.
    pub async fn start_device_code(
        &self,
        provider: Provider,
        name: &str,
        tenant: Option<&str>,
        activate: bool,
    ) -> Result<DeviceCodeLogin> {
        let oauth = self.config.oauth(provider).ok_or_else(|| {
            AccessError::credential(format!(
                "device code sign-in is not available for {provider}"
            ))
        })?;
        self.ensure_name_free(provider, name).await?;

        let scope = self.config.scope(provider);
        let authorization = request_device_code(
            &self.http,
            &oauth.device_code_endpoint(tenant),
            &oauth.client_id,
            &scope,
        )
        .await?;
        tracing::info!(provider = %provider, user_code = %authorization.user_code, "Device code issued");

        let poll = DeviceCodePoll {
            provider,
            name: name.to_string(),
            activate,
            client_id: oauth.client_id.clone(),
            scope,
            tenant: tenant.map(str::to_string),
            token_endpoint: oauth.token_endpoint(tenant),
            poll_interval: self.config.device_code.poll_interval,
            limit: self
                .config
                .device_code
                .timeout
                .min(Duration::from_secs(authorization.expires_in)),
            http: self.http.clone(),
            store: self.store.clone(),
            clock: self.clock.clone(),
        };
        let task = tokio::spawn(poll.run(authorization.clone()));
        Ok(DeviceCodeLogin::new(authorization, task))
    }
}

/// Everything the background device-code task owns.
struct DeviceCodePoll {
    provider: Provider,
    name: String,
    activate: bool,
    client_id: String,
    scope: String,
    tenant: Option<String>,
    token_endpoint: String,
    poll_interval: Duration,
    limit: Duration,
    http: Client,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
}

impl DeviceCodePoll {
    async fn run(self, authorization: DeviceAuthorization) -> Result<RecordSummary> {
        let poll = poll_for_token(
            &self.http,
            &self.token_endpoint,
            &self.client_id,
            &authorization,
            self.poll_interval,
            self.clock.as_ref(),
        );
        let grant = match tokio::time::timeout(self.limit, poll).await {
            Ok(grant) => grant?,
            Err(_) => {
                tracing::warn!(provider = %self.provider, user_code = %authorization.user_code, "Device code sign-in timed out");
                return Err(AccessError::Timeout {
                    flow: "device code sign-in".to_string(),
                    seconds: self.limit.as_secs(),
                });
            }
        };

        let pair = BearerPair {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            client_id: Some(self.client_id),
            scope: Some(self.scope),
            tenant: self.tenant,
            token_endpoint: None,
        };
        let mut record = CredentialRecord::new_with_clock(
            self.provider,
            self.name,
            CredentialPayload::BearerPair(pair),
            self.clock.as_ref(),
        )
        .with_expiry(grant.expires_at);
        record.active = self.activate;
        self.store.add(record.clone()).await?;
        tracing::info!(provider = %self.provider, name = %record.name, active = self.activate, "Stored device code credential");
        Ok(record.summary())
    }
}
