use serde_json::{json, Value};

use crate::access::AccessManager;
use crate::models::Provider;
use crate::token;

use super::respond;

/// Describe the provider's active credential as a usable session.
///
/// Refreshes (and persists) the credential when it has expired.
pub async fn current_access(manager: &AccessManager, provider: Provider) -> Value {
    respond(
        async {
            let session = manager.get_current_access(provider).await?;
            let credential = manager.active(provider).await?;
            Ok(json!({
                "credential": credential,
                "session": session.describe(),
            }))
        }
        .await,
    )
}

/// Claims of a bearer token. The signature is not checked.
pub fn decode_token(raw: &str) -> Value {
    respond(token::decode(raw).map(|claims| {
        json!({
            "verified": false,
            "summary": claims.summary(),
            "claims": claims.raw(),
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::unsigned_jwt;

    #[test]
    fn decode_reports_claims_unverified() {
        let jwt = unsigned_jwt(&json!({"sub": "s-1", "tid": "t-1", "scp": "User.Read"}));
        let out = decode_token(&jwt);
        assert_eq!(out["success"], true);
        assert_eq!(out["verified"], false);
        assert_eq!(out["claims"]["tid"], "t-1");
    }

    #[test]
    fn opaque_token_is_a_credential_error() {
        let out = decode_token("not-a-jwt");
        assert_eq!(out["success"], false);
        assert_eq!(out["error"]["code"], "credential_error");
    }
}
