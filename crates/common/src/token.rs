//! Compact bearer token codec.
//!
//! Tokens are three dot-separated base64url segments (`header.payload.signature`).
//! Only the payload is required to decode; the header is parsed when it is
//! valid JSON and ignored otherwise. Signatures are never verified here: the
//! harness trusts its own issuer, and signature rejection is observed through
//! the issuer's 401 responses instead.

use std::fmt;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{AuthError, AuthResult};

/// base64url without padding on encode, padding tolerated on decode
const BASE64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decoded token payload.
///
/// Every accessor returns `None` (or an empty list) when the claim is
/// missing or has an unexpected type; claims are optional by protocol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Raw claim lookup
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// String claim lookup
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// Numeric claim in whole seconds (fractions are truncated)
    pub fn get_seconds(&self, name: &str) -> Option<i64> {
        let value = self.0.get(name)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f.floor() as i64))
    }

    pub fn subject(&self) -> Option<&str> {
        self.get_str("sub")
    }

    pub fn issuer(&self) -> Option<&str> {
        self.get_str("iss")
    }

    /// Expiration instant in seconds since the epoch
    pub fn expiration(&self) -> Option<i64> {
        self.get_seconds("exp")
    }

    pub fn issued_at(&self) -> Option<i64> {
        self.get_seconds("iat")
    }

    pub fn not_before(&self) -> Option<i64> {
        self.get_seconds("nbf")
    }

    /// Audience, normalised to a list (`aud` may be a string or an array)
    pub fn audience(&self) -> Vec<String> {
        match self.0.get("aud") {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => strings(items),
            _ => Vec::new(),
        }
    }

    /// Space-separated `scope` claim
    pub fn scopes(&self) -> Vec<String> {
        self.get_str("scope")
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default()
    }

    /// Role indicators from `roles` and `realm_access.roles`, deduplicated
    pub fn roles(&self) -> Vec<String> {
        let mut roles = Vec::new();
        if let Some(Value::Array(items)) = self.0.get("roles") {
            roles.extend(strings(items));
        }
        if let Some(Value::Array(items)) = self
            .0
            .get("realm_access")
            .and_then(|realm| realm.get("roles"))
        {
            roles.extend(strings(items));
        }
        let mut seen = std::collections::HashSet::new();
        roles.retain(|r| seen.insert(r.clone()));
        roles
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Encode the claim set as a base64url payload segment
    pub fn to_segment(&self) -> String {
        encode_segment(&Value::Object(self.0.clone()))
    }
}

fn strings(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(Value::as_str)
        .map(String::from)
        .collect()
}

/// A decoded bearer token.
///
/// Records are immutable once decoded; refreshing a role produces a new record.
#[derive(Clone, PartialEq)]
pub struct TokenRecord {
    raw_token: String,
    header: Option<Map<String, Value>>,
    claims: Claims,
    expires_at_ms: Option<i64>,
}

impl TokenRecord {
    /// Decode a compact token string
    pub fn decode(raw: &str) -> AuthResult<Self> {
        let raw = raw.trim();
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() != 3 {
            return Err(AuthError::MalformedToken(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        }
        if let Some(idx) = segments.iter().position(|s| s.is_empty()) {
            return Err(AuthError::MalformedToken(format!("segment {} is empty", idx)));
        }

        let header = decode_segment(segments[0])
            .ok()
            .and_then(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            });

        let payload = decode_segment(segments[1])
            .map_err(|e| AuthError::MalformedToken(format!("payload: {}", e)))?;
        let claims = match payload {
            Value::Object(map) => Claims(map),
            other => {
                return Err(AuthError::MalformedToken(format!(
                    "payload is not a JSON object: {}",
                    json_kind(&other)
                )))
            }
        };

        let expires_at_ms = expires_at_ms(&claims);

        Ok(Self {
            raw_token: raw.to_string(),
            header,
            claims,
            expires_at_ms,
        })
    }

    pub fn raw_token(&self) -> &str {
        &self.raw_token
    }

    pub fn header(&self) -> Option<&Map<String, Value>> {
        self.header.as_ref()
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// Expiration in milliseconds since the epoch, if the token carries one
    pub fn expires_at_ms(&self) -> Option<i64> {
        self.expires_at_ms
    }

    /// Value for an `Authorization` header
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.raw_token)
    }

    /// Short SHA-256 fingerprint, safe to log in place of the token
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.raw_token.as_bytes());
        hex::encode(digest)[..12].to_string()
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("fingerprint", &self.fingerprint())
            .field("subject", &self.claims.subject())
            .field("expires_at_ms", &self.expires_at_ms)
            .finish()
    }
}

fn expires_at_ms(claims: &Claims) -> Option<i64> {
    let exp = claims.get("exp")?;
    match exp.as_i64() {
        Some(secs) => secs.checked_mul(1000),
        None => exp.as_f64().map(|secs| (secs * 1000.0).floor() as i64),
    }
}

fn decode_segment(segment: &str) -> Result<Value, String> {
    let bytes = BASE64URL
        .decode(segment)
        .map_err(|e| format!("invalid base64url: {}", e))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("invalid JSON: {}", e))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Encode a JSON value as a base64url segment
pub fn encode_segment(value: &Value) -> String {
    BASE64URL.encode(value.to_string().as_bytes())
}

/// Assemble an unsigned compact token from a header, payload and signature text.
///
/// Used to mint tokens for mock issuers; the signature segment is opaque.
pub fn encode_compact(header: &Value, payload: &Value, signature: &str) -> String {
    format!(
        "{}.{}.{}",
        encode_segment(header),
        encode_segment(payload),
        BASE64URL.encode(signature.as_bytes())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use test_case::test_case;

    fn sample_token() -> String {
        let payload = json!({"sub": "123", "exp": 9999999999u64, "iss": "https://issuer.example"});
        format!("abc.{}.xyz", encode_segment(&payload))
    }

    #[test]
    fn test_sample_claims() {
        let record = TokenRecord::decode(&sample_token()).unwrap();
        let claims = record.claims();

        assert_eq!(claims.subject(), Some("123"));
        assert_eq!(claims.expiration(), Some(9999999999));
        assert_eq!(claims.issuer(), Some("https://issuer.example"));
        assert!(claims.get("aud").is_none());
        assert!(claims.audience().is_empty());
        assert_eq!(record.expires_at_ms(), Some(9_999_999_999_000));
        // "abc" is not base64 JSON
        assert!(record.header().is_none());
    }

    #[test_case("onlyone" ; "one segment")]
    #[test_case("a.b" ; "two segments")]
    #[test_case("a.b.c.d" ; "four segments")]
    #[test_case("a..c" ; "empty payload")]
    #[test_case(".b.c" ; "empty header")]
    #[test_case("a.b." ; "empty signature")]
    #[test_case("a.!!!.c" ; "payload not base64")]
    #[test_case("a.bm90IGpzb24.c" ; "payload not json")]
    #[test_case("a.WzEsMl0.c" ; "payload is an array")]
    fn test_malformed(raw: &str) {
        let err = TokenRecord::decode(raw).unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken(_)), "{:?}", err);
    }

    #[test]
    fn test_padded_payload_accepted() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(br#"{"sub":"a"}"#);
        assert!(payload.ends_with('='));
        let record = TokenRecord::decode(&format!("h.{}.s", payload)).unwrap();
        assert_eq!(record.claims().subject(), Some("a"));
    }

    #[test]
    fn test_missing_exp_has_no_expiry() {
        let token = encode_compact(&json!({"alg": "RS256"}), &json!({"sub": "x"}), "sig");
        let record = TokenRecord::decode(&token).unwrap();
        assert_eq!(record.expires_at_ms(), None);
        assert_eq!(record.header().unwrap()["alg"], "RS256");
    }

    #[test]
    fn test_fractional_exp() {
        let token = encode_compact(&json!({}), &json!({"exp": 1700000000.75}), "sig");
        let record = TokenRecord::decode(&token).unwrap();
        assert_eq!(record.expires_at_ms(), Some(1_700_000_000_750));
        assert_eq!(record.claims().expiration(), Some(1_700_000_000));
    }

    #[test]
    fn test_role_and_scope_claims() {
        let token = encode_compact(
            &json!({}),
            &json!({
                "aud": ["app", "account"],
                "scope": "openid profile",
                "roles": ["manager"],
                "realm_access": {"roles": ["manager", "offline_access"]}
            }),
            "sig",
        );
        let claims = TokenRecord::decode(&token).unwrap().claims().clone();
        assert_eq!(claims.audience(), vec!["app", "account"]);
        assert_eq!(claims.scopes(), vec!["openid", "profile"]);
        assert_eq!(claims.roles(), vec!["manager", "offline_access"]);
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let raw = sample_token();
        let record = TokenRecord::decode(&raw).unwrap();
        let debug = format!("{:?}", record);
        assert!(!debug.contains(&raw));
        assert!(debug.contains(&record.fingerprint()));
        assert_eq!(record.bearer_header(), format!("Bearer {}", raw));
    }

    fn claim_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-zA-Z0-9 :/._-]{0,24}".prop_map(Value::from),
        ]
    }

    proptest! {
        #[test]
        fn prop_payload_round_trips(
            claims in prop::collection::btree_map("[a-z_]{1,12}", claim_value(), 0..8),
            header in "[A-Za-z0-9_-]{1,16}",
            signature in "[A-Za-z0-9_-]{1,16}",
        ) {
            let map: Map<String, Value> = claims.into_iter().collect();
            let original = Claims::new(map);
            let raw = format!("{}.{}.{}", header, original.to_segment(), signature);

            let decoded = TokenRecord::decode(&raw).unwrap();
            prop_assert_eq!(decoded.claims(), &original);
            prop_assert_eq!(decoded.claims().to_segment(), original.to_segment());
        }
    }
}
