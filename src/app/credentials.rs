use std::path::Path;

use secrecy::SecretString;
use serde_json::{json, Value};

use crate::access::AccessManager;
use crate::error::{AccessError, Result};
use crate::models::{CredentialPayload, KeyFile, Provider};

use super::{established_output, respond};

/// List one provider's records, or every provider's when `provider` is `None`.
pub async fn list_credentials(manager: &AccessManager, provider: Option<Provider>) -> Value {
    respond(
        async {
            let providers = match provider {
                Some(p) => vec![p],
                None => Provider::ALL.to_vec(),
            };
            let mut credentials = Vec::new();
            for provider in providers {
                credentials.extend(manager.list(provider).await?);
            }
            Ok(json!({ "credentials": credentials }))
        }
        .await,
    )
}

pub async fn activate_credential(manager: &AccessManager, provider: Provider, name: &str) -> Value {
    respond(
        manager
            .activate(provider, name)
            .await
            .map(|summary| json!({ "credential": summary })),
    )
}

pub async fn delete_active_credential(manager: &AccessManager, provider: Provider) -> Value {
    respond(manager.delete_active(provider).await.map(|removed| {
        json!({
            "provider": provider,
            "deleted": removed,
        })
    }))
}

pub async fn delete_credential(manager: &AccessManager, provider: Provider, name: &str) -> Value {
    respond(
        manager
            .delete(provider, name)
            .await
            .map(|removed| json!({ "deleted": removed })),
    )
}

/// Store `payload` under `name` and probe it.
pub async fn add_credential(
    manager: &AccessManager,
    provider: Provider,
    name: &str,
    payload: CredentialPayload,
    activate: bool,
) -> Value {
    respond(
        manager
            .establish(provider, name, payload, activate)
            .await
            .map(established_output),
    )
}

async fn read_key_file(path: &Path, scopes: Vec<String>) -> Result<CredentialPayload> {
    let document = tokio::fs::read_to_string(path).await.map_err(|e| {
        AccessError::credential(format!("failed to read key file {}: {e}", path.display()))
    })?;
    Ok(CredentialPayload::KeyFile(KeyFile {
        document: SecretString::from(document),
        scopes,
    }))
}

/// Read a service-account / service-principal document from disk and store it.
pub async fn add_key_file(
    manager: &AccessManager,
    provider: Provider,
    name: &str,
    path: &Path,
    scopes: Vec<String>,
    activate: bool,
) -> Value {
    let payload = match read_key_file(path, scopes).await {
        Ok(payload) => payload,
        Err(e) => return super::failure(&e),
    };
    add_credential(manager, provider, name, payload, activate).await
}

pub async fn deactivate_credentials(manager: &AccessManager, provider: Provider) -> Value {
    respond(
        manager
            .deactivate_all(provider)
            .await
            .map(|()| json!({ "provider": provider })),
    )
}
