//! OAuth 2.0 token endpoint client shared by the bearer, key-file and
//! device-code flows.

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::error::AccessError;
use crate::token;

/// Tokens returned by a successful grant.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The issuer answered with an OAuth error object.
    #[error("{error}: {description}")]
    Rejected { error: String, description: String },

    #[error("{0}")]
    Network(String),
}

impl TokenError {
    /// OAuth error code, when the issuer sent one.
    pub fn code(&self) -> Option<&str> {
        match self {
            TokenError::Rejected { error, .. } => Some(error),
            TokenError::Network(_) => None,
        }
    }

    pub fn into_refresh_failed(self) -> AccessError {
        match self {
            TokenError::Network(reason) => AccessError::Network { reason },
            rejected => AccessError::refresh_failed(rejected.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Some issuers send `expires_in` as a string.
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(i64),
        Text(String),
    }

    Ok(match Option::<Seconds>::deserialize(deserializer)? {
        Some(Seconds::Number(n)) => Some(n),
        Some(Seconds::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

/// POST a form-encoded grant to `endpoint` and parse the token response.
///
/// `now` anchors `expires_in`. When the issuer omits it, the access token's
/// own `exp` claim is used if the token is a JWT.
pub async fn request_token(
    http: &Client,
    endpoint: &str,
    form: &[(&str, &str)],
    now: DateTime<Utc>,
) -> Result<TokenGrant, TokenError> {
    let grant_type = form
        .iter()
        .find(|(key, _)| *key == "grant_type")
        .map(|(_, value)| *value)
        .unwrap_or("unknown");
    tracing::debug!(endpoint, grant_type, "Requesting token");

    let response = http
        .post(endpoint)
        .header("Accept", "application/json")
        .form(form)
        .send()
        .await
        .map_err(|e| TokenError::Network(format!("token request to {endpoint} failed: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| TokenError::Network(format!("failed to read token response: {e}")))?;

    if !status.is_success() {
        return Err(match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) => TokenError::Rejected {
                description: err
                    .error_description
                    .unwrap_or_else(|| format!("HTTP {status}")),
                error: err.error,
            },
            Err(_) => TokenError::Network(format!("token endpoint returned {status}: {body}")),
        });
    }

    let parsed: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| TokenError::Network(format!("failed to parse token response: {e}")))?;
    if parsed.access_token.is_empty() {
        return Err(TokenError::Network(
            "token response has an empty access_token".to_string(),
        ));
    }

    // An `expires_in` chrono cannot represent falls back to the `exp` claim.
    let expires_at = parsed
        .expires_in
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .or_else(|| {
            token::decode(&parsed.access_token)
                .ok()
                .and_then(|claims| claims.expires_at())
        });

    Ok(TokenGrant {
        access_token: SecretString::from(parsed.access_token),
        refresh_token: parsed
            .refresh_token
            .filter(|t| !t.is_empty())
            .map(SecretString::from),
        expires_at,
        scope: parsed.scope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_800_000_000, 0).unwrap()
    }

    #[tokio::test]
    async fn parses_string_expires_in() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer",
                "access_token": "new-access",
                "refresh_token": "new-refresh",
                "expires_in": "3599"
            })))
            .mount(&server)
            .await;

        let grant = request_token(
            &Client::new(),
            &format!("{}/token", server.uri()),
            &[("grant_type", "refresh_token"), ("refresh_token", "r")],
            now(),
        )
        .await
        .unwrap();

        assert_eq!(grant.access_token.expose_secret(), "new-access");
        assert_eq!(
            grant.refresh_token.as_ref().map(|t| t.expose_secret()),
            Some("new-refresh")
        );
        assert_eq!(grant.expires_at, Some(now() + Duration::seconds(3599)));
    }

    #[tokio::test]
    async fn falls_back_to_exp_claim() {
        let server = MockServer::start().await;
        let access = token::unsigned_jwt(&json!({"exp": 1_800_000_500}));
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": access
            })))
            .mount(&server)
            .await;

        let grant = request_token(&Client::new(), &server.uri(), &[], now())
            .await
            .unwrap();
        assert_eq!(grant.expires_at.unwrap().timestamp(), 1_800_000_500);
        assert!(grant.refresh_token.is_none());
    }

    #[tokio::test]
    async fn out_of_range_expires_in_falls_back_to_exp_claim() {
        let server = MockServer::start().await;
        let access = token::unsigned_jwt(&json!({"exp": 1_800_000_500}));
        Mock::given(method("POST"))
            .and(body_string_contains("refresh_token=huge"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": access,
                "expires_in": "9223372036854775807"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("refresh_token=negative"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "opaque-access",
                "expires_in": i64::MIN
            })))
            .mount(&server)
            .await;

        let grant = request_token(
            &Client::new(),
            &server.uri(),
            &[("refresh_token", "huge")],
            now(),
        )
        .await
        .unwrap();
        assert_eq!(grant.expires_at.unwrap().timestamp(), 1_800_000_500);

        let grant = request_token(
            &Client::new(),
            &server.uri(),
            &[("refresh_token", "negative")],
            now(),
        )
        .await
        .unwrap();
        assert_eq!(grant.access_token.expose_secret(), "opaque-access");
        assert!(grant.expires_at.is_none());
    }

    #[tokio::test]
    async fn oauth_errors_are_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "AADSTS70043: The refresh token has expired"
            })))
            .mount(&server)
            .await;

        let err = request_token(&Client::new(), &server.uri(), &[], now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("invalid_grant"));
        assert_eq!(err.into_refresh_failed().code(), "refresh_failed");
    }

    #[tokio::test]
    async fn non_oauth_failure_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = request_token(&Client::new(), &server.uri(), &[], now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), None);
        assert_eq!(err.into_refresh_failed().code(), "network_error");
    }
}
