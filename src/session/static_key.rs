use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sts::config::Credentials;
use aws_sdk_sts::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use secrecy::{ExposeSecret, SecretString};

use crate::config::AwsConfig;
use crate::error::{AccessError, Result};
use crate::models::{CredentialPayload, CredentialRecord, StaticKey, Variant};

use super::{Identity, LiveSession, SessionAdapter};

const CREDENTIALS_SOURCE: &str = "accesskeep";

/// An access key packaged into an STS client, ready to sign requests.
#[derive(Debug, Clone)]
pub struct StaticKeySession {
    pub access_key_id: String,
    secret_access_key: SecretString,
    session_token: Option<SecretString>,
    pub region: String,
    client: aws_sdk_sts::Client,
}

impl StaticKeySession {
    pub fn secret_access_key(&self) -> &SecretString {
        &self.secret_access_key
    }

    pub fn session_token(&self) -> Option<&SecretString> {
        self.session_token.as_ref()
    }
}

fn check_key(key: &StaticKey) -> Result<()> {
    let id = key.access_key_id.trim();
    if !(16..=128).contains(&id.len()) || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AccessError::credential(format!(
            "access key id {id:?} is malformed"
        )));
    }
    if key.secret_access_key.expose_secret().trim().is_empty() {
        return Err(AccessError::credential("secret access key is empty"));
    }
    if key
        .session_token
        .as_ref()
        .is_some_and(|t| t.expose_secret().trim().is_empty())
    {
        return Err(AccessError::credential("session token is empty"));
    }
    if id.starts_with("ASIA") && key.session_token.is_none() {
        tracing::warn!(access_key_id = %id, "Temporary access key stored without a session token");
    }
    Ok(())
}

enum CallerIdentity {
    Known(Identity),
    Rejected { code: String, message: String },
}

/// Checks access keys against STS `GetCallerIdentity`.
pub struct StaticKeyAdapter {
    default_region: String,
    sts_endpoint: Option<String>,
}

impl StaticKeyAdapter {
    pub fn new(config: &AwsConfig) -> Self {
        Self {
            default_region: config.default_region.clone(),
            sts_endpoint: config.sts_endpoint.clone(),
        }
    }

    fn session<'a>(&self, session: &'a LiveSession) -> Result<&'a StaticKeySession> {
        match session {
            LiveSession::StaticKey(s) => Ok(s),
            other => Err(other.mismatch(Variant::StaticKey)),
        }
    }

    async fn sts_client(&self, key: &StaticKey, region: &str) -> aws_sdk_sts::Client {
        let credentials = Credentials::new(
            key.access_key_id.trim(),
            key.secret_access_key.expose_secret(),
            key.session_token
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
            None,
            CREDENTIALS_SOURCE,
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &self.sts_endpoint {
            loader = loader.endpoint_url(endpoint.trim_end_matches('/'));
        }

        aws_sdk_sts::Client::new(&loader.load().await)
    }

    async fn caller_identity(&self, session: &StaticKeySession) -> Result<CallerIdentity> {
        tracing::debug!(access_key_id = %session.access_key_id, region = %session.region, "Calling GetCallerIdentity");
        match session.client.get_caller_identity().send().await {
            Ok(output) => {
                let principal = output.arn().ok_or_else(|| {
                    AccessError::network("GetCallerIdentity response has no Arn")
                })?;
                Ok(CallerIdentity::Known(Identity {
                    principal: Some(principal.to_string()),
                    account: output.account().map(str::to_string),
                    tenant: output.user_id().map(str::to_string),
                    ..Default::default()
                }))
            }
            Err(SdkError::ServiceError(service)) => {
                let err = service.into_err();
                Ok(CallerIdentity::Rejected {
                    code: err.code().unwrap_or("Unknown").to_string(),
                    message: err.message().unwrap_or_default().to_string(),
                })
            }
            Err(e) => Err(AccessError::network(format!(
                "STS request failed: {}",
                DisplayErrorContext(&e)
            ))),
        }
    }
}

#[async_trait]
impl SessionAdapter for StaticKeyAdapter {
    fn variant(&self) -> Variant {
        Variant::StaticKey
    }

    async fn materialize(&self, record: &CredentialRecord) -> Result<LiveSession> {
        let CredentialPayload::StaticKey(key) = &record.payload else {
            return Err(AccessError::credential(format!(
                "record {:?} is {}, not static-key",
                record.name,
                record.variant()
            )));
        };
        check_key(key)?;

        let region = key
            .region
            .clone()
            .unwrap_or_else(|| self.default_region.clone());
        let client = self.sts_client(key, &region).await;
        Ok(LiveSession::StaticKey(StaticKeySession {
            access_key_id: key.access_key_id.trim().to_string(),
            secret_access_key: key.secret_access_key.clone(),
            session_token: key.session_token.clone(),
            region,
            client,
        }))
    }

    fn is_expired(&self, _session: &LiveSession) -> bool {
        false
    }

    async fn is_valid(&self, session: &LiveSession) -> Result<bool> {
        let session = self.session(session)?;
        match self.caller_identity(session).await? {
            CallerIdentity::Known(_) => Ok(true),
            CallerIdentity::Rejected { code, message } => {
                tracing::warn!(
                    access_key_id = %session.access_key_id,
                    code = %code,
                    message = %message,
                    "STS rejected access key"
                );
                Ok(false)
            }
        }
    }

    async fn identify(&self, session: &LiveSession) -> Result<Identity> {
        let session = self.session(session)?;
        match self.caller_identity(session).await? {
            CallerIdentity::Known(identity) => Ok(identity),
            CallerIdentity::Rejected { code, message } => Err(AccessError::credential(format!(
                "STS rejected access key {}: {code}: {message}",
                session.access_key_id
            ))),
        }
    }
}
