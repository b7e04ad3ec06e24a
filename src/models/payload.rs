use std::fmt;
use std::str::FromStr;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Shape of the credential material a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    /// Long-lived access key, optionally with a short-lived session token.
    StaticKey,
    /// Session state lives in an external command-line tool.
    CliDelegated,
    /// Offline-signed service-account document exchanged for bearer tokens.
    KeyFile,
    /// OAuth access token plus optional refresh token.
    BearerPair,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::StaticKey => "static-key",
            Variant::CliDelegated => "cli-delegated",
            Variant::KeyFile => "key-file",
            Variant::BearerPair => "bearer-pair",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "static-key" => Ok(Variant::StaticKey),
            "cli-delegated" => Ok(Variant::CliDelegated),
            "key-file" => Ok(Variant::KeyFile),
            "bearer-pair" => Ok(Variant::BearerPair),
            other => Err(format!("Unknown credential variant: {other}")),
        }
    }
}

/// External command-line tool that owns a cli-delegated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CliTool {
    /// Azure CLI (`az`).
    Az,
    /// Google Cloud CLI (`gcloud`).
    Gcloud,
}

impl CliTool {
    pub fn program(&self) -> &'static str {
        match self {
            CliTool::Az => "az",
            CliTool::Gcloud => "gcloud",
        }
    }
}

impl FromStr for CliTool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "az" | "azure" => Ok(CliTool::Az),
            "gcloud" | "gcp" => Ok(CliTool::Gcloud),
            other => Err(format!("Unsupported CLI tool: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticKey {
    pub access_key_id: String,
    #[serde(with = "super::secret")]
    pub secret_access_key: SecretString,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "super::secret::option"
    )]
    pub session_token: Option<SecretString>,
    /// Default region / locality hint for calls made with this key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Nothing secret is kept for CLI sessions; the account fields are the last
/// values the tool reported and only serve display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliDelegated {
    pub tool: CliTool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFile {
    /// The key document exactly as supplied (JSON text).
    #[serde(with = "super::secret")]
    pub document: SecretString,
    /// Scopes requested when exchanging the document for a token.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BearerPair {
    #[serde(with = "super::secret")]
    pub access_token: SecretString,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "super::secret::option"
    )]
    pub refresh_token: Option<SecretString>,
    /// Client application the refresh token is redeemed for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    /// Token endpoint override; defaults to the provider's configured issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
}

impl BearerPair {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: None,
            client_id: None,
            scope: None,
            tenant: None,
            token_endpoint: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(SecretString::from(refresh_token.into()));
        self
    }

    pub fn with_client(mut self, client_id: impl Into<String>, scope: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self.scope = Some(scope.into());
        self
    }

    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = Some(endpoint.into());
        self
    }
}

/// Credential material, one arm per [`Variant`].
#[derive(Debug, Clone)]
pub enum CredentialPayload {
    StaticKey(StaticKey),
    CliDelegated(CliDelegated),
    KeyFile(KeyFile),
    BearerPair(BearerPair),
}

impl CredentialPayload {
    pub fn variant(&self) -> Variant {
        match self {
            CredentialPayload::StaticKey(_) => Variant::StaticKey,
            CredentialPayload::CliDelegated(_) => Variant::CliDelegated,
            CredentialPayload::KeyFile(_) => Variant::KeyFile,
            CredentialPayload::BearerPair(_) => Variant::BearerPair,
        }
    }

    /// Serialize the variant's fields (without the tag) to JSON.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            CredentialPayload::StaticKey(p) => serde_json::to_value(p),
            CredentialPayload::CliDelegated(p) => serde_json::to_value(p),
            CredentialPayload::KeyFile(p) => serde_json::to_value(p),
            CredentialPayload::BearerPair(p) => serde_json::to_value(p),
        }
    }

    /// Rebuild a payload from its variant tag and the JSON produced by [`Self::to_json`].
    pub fn from_json(variant: Variant, value: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match variant {
            Variant::StaticKey => CredentialPayload::StaticKey(serde_json::from_value(value)?),
            Variant::CliDelegated => CredentialPayload::CliDelegated(serde_json::from_value(value)?),
            Variant::KeyFile => CredentialPayload::KeyFile(serde_json::from_value(value)?),
            Variant::BearerPair => CredentialPayload::BearerPair(serde_json::from_value(value)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn variant_parsing_accepts_snake_case() {
        assert_eq!("bearer_pair".parse::<Variant>(), Ok(Variant::BearerPair));
        assert_eq!("Key-File".parse::<Variant>(), Ok(Variant::KeyFile));
        assert!("password".parse::<Variant>().is_err());
    }

    #[test]
    fn json_keeps_secrets_and_omits_empty_options() {
        let payload = CredentialPayload::StaticKey(StaticKey {
            access_key_id: "AKIAEXAMPLE".into(),
            secret_access_key: SecretString::from("shh".to_string()),
            session_token: None,
            region: Some("eu-west-1".into()),
        });

        let json = payload.to_json().unwrap();
        assert_eq!(json["secret_access_key"], "shh");
        assert!(json.get("session_token").is_none());

        let back = CredentialPayload::from_json(Variant::StaticKey, json).unwrap();
        match back {
            CredentialPayload::StaticKey(key) => {
                assert_eq!(key.secret_access_key.expose_secret(), "shh");
                assert_eq!(key.region.as_deref(), Some("eu-west-1"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn wrong_variant_tag_fails_to_decode() {
        let json = serde_json::json!({"tool": "az"});
        assert!(CredentialPayload::from_json(Variant::BearerPair, json).is_err());
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let pair = BearerPair::new("eyJ.secret.token").with_refresh_token("0.refresh");
        let debug = format!("{pair:?}");
        assert!(!debug.contains("eyJ.secret.token"));
        assert!(!debug.contains("0.refresh"));
    }
}
