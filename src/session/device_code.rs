//! OAuth device authorization grant (RFC 8628) against the Microsoft
//! identity platform.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{AccessError, Result};

use super::oauth::{self, TokenGrant};

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// What the user needs to finish signing in on another device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuthorization {
    pub user_code: String,
    #[serde(skip_serializing)]
    device_code: String,
    #[serde(alias = "verification_url")]
    pub verification_uri: String,
    /// Lifetime of the device code in seconds.
    pub expires_in: u64,
    #[serde(default)]
    pub interval: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl DeviceAuthorization {
    /// Instructions to show the user.
    pub fn instructions(&self) -> String {
        self.message.clone().unwrap_or_else(|| {
            format!(
                "To sign in, open {} and enter the code {}",
                self.verification_uri, self.user_code
            )
        })
    }
}

/// Ask the issuer for a user code.
pub async fn request_device_code(
    http: &Client,
    endpoint: &str,
    client_id: &str,
    scope: &str,
) -> Result<DeviceAuthorization> {
    let response = http
        .post(endpoint)
        .header("Accept", "application/json")
        .form(&[("client_id", client_id), ("scope", scope)])
        .send()
        .await
        .map_err(|e| AccessError::network(format!("device code request failed: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| AccessError::network(format!("failed to read device code response: {e}")))?;
    if !status.is_success() {
        return Err(AccessError::credential(format!(
            "device code request rejected ({status}): {body}"
        )));
    }

    serde_json::from_str(&body)
        .map_err(|e| AccessError::network(format!("failed to parse device code response: {e}")))
}

/// Poll the token endpoint until the user completes (or refuses) sign-in.
///
/// `authorization_pending` keeps polling, `slow_down` widens the interval,
/// any other OAuth error ends the flow. Transport errors are retried. The
/// caller bounds the total time.
pub async fn poll_for_token(
    http: &Client,
    token_endpoint: &str,
    client_id: &str,
    authorization: &DeviceAuthorization,
    default_interval: Duration,
    clock: &dyn Clock,
) -> Result<TokenGrant> {
    // A zero interval from the issuer falls back to the configured one.
    let mut interval = authorization
        .interval
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(default_interval);

    loop {
        tokio::time::sleep(interval).await;
        let form = [
            ("grant_type", DEVICE_CODE_GRANT),
            ("client_id", client_id),
            ("device_code", authorization.device_code.as_str()),
        ];
        let err = match oauth::request_token(http, token_endpoint, &form, clock.now()).await {
            Ok(grant) => return Ok(grant),
            Err(err) => err,
        };

        match err.code() {
            Some("authorization_pending") => {
                tracing::debug!(user_code = %authorization.user_code, "Waiting for device sign-in");
            }
            Some("slow_down") => {
                interval += SLOW_DOWN_STEP;
                tracing::debug!(interval_secs = interval.as_secs(), "Issuer asked to slow down");
            }
            Some(_) => {
                return Err(AccessError::credential(format!(
                    "device code sign-in failed: {err}"
                )))
            }
            None => {
                tracing::warn!(error = %err, "Device code poll failed; retrying");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use secrecy::ExposeSecret;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn authorization(interval: u64) -> DeviceAuthorization {
        serde_json::from_value(json!({
            "user_code": "ABCD-EFGH",
            "device_code": "dev-code-1",
            "verification_url": "https://microsoft.com/devicelogin",
            "expires_in": 900,
            "interval": interval
        }))
        .unwrap()
    }

    #[test]
    fn device_code_is_not_serialized() {
        let json = serde_json::to_value(authorization(5)).unwrap();
        assert!(json.get("device_code").is_none());
        assert_eq!(json["verification_uri"], "https://microsoft.com/devicelogin");
        assert!(authorization(5).instructions().contains("ABCD-EFGH"));
    }

    #[tokio::test]
    async fn requests_user_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/common/oauth2/v2.0/devicecode"))
            .and(body_string_contains("client_id=client-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user_code": "WXYZ",
                "device_code": "dc",
                "verification_uri": "https://microsoft.com/devicelogin",
                "expires_in": 900,
                "interval": 5,
                "message": "To sign in, use a web browser..."
            })))
            .mount(&server)
            .await;

        let auth = request_device_code(
            &Client::new(),
            &format!("{}/common/oauth2/v2.0/devicecode", server.uri()),
            "client-1",
            "openid",
        )
        .await
        .unwrap();
        assert_eq!(auth.user_code, "WXYZ");
        assert_eq!(auth.interval, Some(5));
    }

    #[tokio::test]
    async fn polls_through_pending_until_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("device_code=dev-code-1"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "authorization_pending",
                "error_description": "AADSTS70016: pending"
            })))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "device-access",
                "refresh_token": "device-refresh",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = poll_for_token(
            &Client::new(),
            &server.uri(),
            "client-1",
            &authorization(0),
            Duration::ZERO,
            &SystemClock,
        )
        .await
        .unwrap();
        assert_eq!(grant.access_token.expose_secret(), "device-access");
    }

    #[tokio::test]
    async fn zero_interval_uses_configured_interval() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "authorization_pending",
                "error_description": "AADSTS70016: pending"
            })))
            .mount(&server)
            .await;

        let client = Client::new();
        let uri = server.uri();
        let auth = authorization(0);
        let poll = poll_for_token(
            &client,
            &uri,
            "client-1",
            &auth,
            Duration::from_millis(200),
            &SystemClock,
        );
        let timed_out = tokio::time::timeout(Duration::from_millis(700), poll).await;
        assert!(timed_out.is_err());

        let polls = server.received_requests().await.unwrap().len();
        assert!((1..=4).contains(&polls), "polled {polls} times");
    }

    #[tokio::test]
    async fn declined_sign_in_stops_polling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "authorization_declined",
                "error_description": "The user declined"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = poll_for_token(
            &Client::new(),
            &server.uri(),
            "client-1",
            &authorization(0),
            Duration::ZERO,
            &SystemClock,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "credential_error");
        assert!(err.to_string().contains("authorization_declined"));
    }
}
