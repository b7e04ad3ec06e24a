//! Bearer token introspection.
//!
//! WARNING: [`decode`] does NOT verify the token signature. The claims it
//! returns are whatever the token bytes say and can be forged by anyone.
//! Use them to display a token or to pick a refresh strategy, never to decide
//! whether a caller is authorized to do something.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{AccessError, Result};

/// base64url that accepts segments with or without `=` padding.
const SEGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Claim set decoded from a token's payload segment.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenClaims {
    claims: Map<String, Value>,
}

/// Decode the middle segment of a JWT-shaped bearer token.
///
/// A leading `Bearer ` prefix is ignored. Opaque (non-JWT) tokens fail with a
/// credential error.
pub fn decode(token: &str) -> Result<TokenClaims> {
    let token = token.trim();
    let token = token
        .strip_prefix("Bearer ")
        .or_else(|| token.strip_prefix("bearer "))
        .unwrap_or(token);

    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature)) =
        (segments.next(), segments.next(), segments.next())
    else {
        return Err(AccessError::credential("token is not a JWT (expected 3 segments)"));
    };
    if segments.next().is_some() {
        return Err(AccessError::credential(
            "token has more than 3 segments (encrypted tokens cannot be introspected)",
        ));
    }

    let bytes = SEGMENT_ENGINE
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AccessError::credential(format!("token payload is not base64url: {e}")))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| AccessError::credential(format!("token payload is not JSON: {e}")))?;

    match value {
        Value::Object(claims) => Ok(TokenClaims { claims }),
        _ => Err(AccessError::credential("token payload is not a JSON object")),
    }
}

/// True when the token has the three-segment JWT shape and a decodable payload.
pub fn is_jwt(token: &str) -> bool {
    decode(token).is_ok()
}

impl TokenClaims {
    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.claims.get(claim)
    }

    pub fn raw(&self) -> &Map<String, Value> {
        &self.claims
    }

    fn str_claim(&self, claim: &str) -> Option<&str> {
        self.claims.get(claim).and_then(Value::as_str)
    }

    fn time_claim(&self, claim: &str) -> Option<DateTime<Utc>> {
        let value = self.claims.get(claim)?;
        let secs = value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))?;
        DateTime::from_timestamp(secs, 0)
    }

    pub fn subject(&self) -> Option<&str> {
        self.str_claim("sub")
    }

    /// Directory object id of the principal.
    pub fn object_id(&self) -> Option<&str> {
        self.str_claim("oid")
    }

    /// Human-readable principal name, from whichever claim the issuer used.
    pub fn principal_name(&self) -> Option<&str> {
        ["upn", "unique_name", "preferred_username", "email"]
            .iter()
            .find_map(|claim| self.str_claim(claim))
    }

    /// Target application. Array audiences report their first entry.
    pub fn audience(&self) -> Option<&str> {
        match self.claims.get("aud")? {
            Value::String(aud) => Some(aud),
            Value::Array(auds) => auds.first().and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn issuer(&self) -> Option<&str> {
        self.str_claim("iss")
    }

    pub fn tenant(&self) -> Option<&str> {
        self.str_claim("tid")
    }

    /// Client application the token was issued to.
    pub fn app_id(&self) -> Option<&str> {
        self.str_claim("appid").or_else(|| self.str_claim("azp"))
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.time_claim("iat")
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.time_claim("exp")
    }

    /// Delegated scopes (`scp`, space separated).
    pub fn scopes(&self) -> Vec<&str> {
        self.str_claim("scp")
            .or_else(|| self.str_claim("scope"))
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Application roles granted to app-only tokens.
    pub fn roles(&self) -> Vec<&str> {
        self.claims
            .get("roles")
            .and_then(Value::as_array)
            .map(|roles| roles.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// App-only tokens carry roles and no delegated scope.
    pub fn is_app_only(&self) -> bool {
        if self.str_claim("idtyp") == Some("app") {
            return true;
        }
        self.scopes().is_empty() && !self.roles().is_empty()
    }

    /// Whether `exp` is at or before `now`. Tokens without `exp` never expire here.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|exp| exp <= now)
    }

    pub fn summary(&self) -> TokenSummary<'_> {
        let app_only = self.is_app_only();
        TokenSummary {
            subject: self.subject(),
            object_id: self.object_id(),
            principal_name: self.principal_name(),
            audience: self.audience(),
            issuer: self.issuer(),
            tenant: self.tenant(),
            app_id: self.app_id(),
            issued_at: self.issued_at(),
            expires_at: self.expires_at(),
            scopes: if app_only { Vec::new() } else { self.scopes() },
            roles: if app_only { self.roles() } else { Vec::new() },
            app_only,
        }
    }
}

/// Display view of the claims most techniques care about.
#[derive(Debug, Serialize)]
pub struct TokenSummary<'a> {
    pub subject: Option<&'a str>,
    pub object_id: Option<&'a str>,
    pub principal_name: Option<&'a str>,
    pub audience: Option<&'a str>,
    pub issuer: Option<&'a str>,
    pub tenant: Option<&'a str>,
    pub app_id: Option<&'a str>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<&'a str>,
    pub app_only: bool,
}

/// Build an unsigned JWT-shaped token from a claim set. Test helper.
#[doc(hidden)]
pub fn unsigned_jwt(claims: &Value) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}
