//! Signed bearer tokens
//!
//! Access and refresh tokens are HS256 JWTs. The codec is generic over the
//! claim payload; `typ`, `iat` and `exp` are added on signing and stripped
//! again on verification, so callers only ever deal with their own claim
//! types. A token only verifies as the claim type it was signed as.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Claims carried by the short-lived access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User ID
    pub id: i64,
    pub name: String,
    pub email: String,
    pub is_email_valid: bool,
    pub session_id: i64,
}

/// Claims carried by the long-lived refresh token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub session_id: i64,
}

/// Claim payloads that can be carried by a token.
///
/// `KIND` is written to the `typ` claim and must match on verification.
pub trait TokenKind {
    const KIND: &'static str;
}

impl TokenKind for AccessClaims {
    const KIND: &'static str = "access";
}

impl TokenKind for RefreshClaims {
    const KIND: &'static str = "refresh";
}

/// Token verification failure.
///
/// Bad signature, malformed payload and expiry are deliberately not
/// distinguished.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Invalid or expired token")]
    Invalid,
    #[error("Failed to sign token: {0}")]
    Signing(String),
}

/// Claims recovered from a verified token together with its timestamps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified<T> {
    pub claims: T,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct OutgoingEnvelope<'a, T> {
    #[serde(flatten)]
    claims: &'a T,
    typ: &'static str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct IncomingEnvelope<T> {
    #[serde(flatten)]
    claims: T,
    typ: String,
    iat: i64,
    exp: i64,
}

/// HS256 signer and verifier holding keys derived from one secret.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Sign `claims`, expiring `ttl_secs` seconds from now.
    pub fn sign<T: Serialize + TokenKind>(
        &self,
        claims: &T,
        ttl_secs: i64,
    ) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let exp = now
            .checked_add(ttl_secs)
            .ok_or_else(|| TokenError::Signing(format!("TTL out of range: {}", ttl_secs)))?;
        let envelope = OutgoingEnvelope {
            claims,
            typ: T::KIND,
            iat: now,
            exp,
        };

        encode(&Header::new(Algorithm::HS256), &envelope, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify signature, expiry and kind, and decode the claims.
    pub fn verify<T: DeserializeOwned + TokenKind>(
        &self,
        token: &str,
    ) -> Result<Verified<T>, TokenError> {
        let data = decode::<IncomingEnvelope<T>>(token, &self.decoding, &self.validation)
            .map_err(|_| TokenError::Invalid)?;

        let envelope = data.claims;
        if envelope.typ != T::KIND {
            return Err(TokenError::Invalid);
        }

        Ok(Verified {
            claims: envelope.claims,
            issued_at: timestamp(envelope.iat)?,
            expires_at: timestamp(envelope.exp)?,
        })
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, TokenError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or(TokenError::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn access_claims() -> AccessClaims {
        AccessClaims {
            id: 7,
            name: "alice".to_string(),
            email: "alice@example.com".to_string(),
            is_email_valid: false,
            session_id: 42,
        }
    }

    #[test]
    fn test_sign_and_verify_access_claims() {
        let codec = TokenCodec::new("test-secret");
        let token = codec.sign(&access_claims(), 900).unwrap();

        let verified: Verified<AccessClaims> = codec.verify(&token).unwrap();

        assert_eq!(verified.claims, access_claims());
        assert_eq!(
            (verified.expires_at - verified.issued_at).num_seconds(),
            900
        );
    }

    #[test]
    fn test_expired_token_is_invalid() {
        let codec = TokenCodec::new("test-secret");
        let token = codec.sign(&RefreshClaims { session_id: 1 }, -5).unwrap();

        assert_eq!(
            codec.verify::<RefreshClaims>(&token).unwrap_err(),
            TokenError::Invalid
        );
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let token = TokenCodec::new("secret-a")
            .sign(&RefreshClaims { session_id: 1 }, 60)
            .unwrap();

        let result = TokenCodec::new("secret-b").verify::<RefreshClaims>(&token);
        assert_eq!(result.unwrap_err(), TokenError::Invalid);
    }

    #[test]
    fn test_tampered_token_is_invalid() {
        let codec = TokenCodec::new("test-secret");
        let token = codec.sign(&access_claims(), 60).unwrap();

        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = codec.sign(&RefreshClaims { session_id: 99 }, 60).unwrap();
        let forged_payload = forged.split('.').nth(1).unwrap().to_string();
        parts[1] = &forged_payload;
        let spliced = parts.join(".");

        assert!(codec.verify::<AccessClaims>(&spliced).is_err());
    }

    #[test]
    fn test_refresh_token_does_not_decode_as_access() {
        let codec = TokenCodec::new("test-secret");
        let token = codec.sign(&RefreshClaims { session_id: 3 }, 60).unwrap();

        assert!(codec.verify::<AccessClaims>(&token).is_err());
    }

    #[test]
    fn test_access_token_does_not_decode_as_refresh() {
        let codec = TokenCodec::new("test-secret");
        let token = codec.sign(&access_claims(), 60).unwrap();

        assert_eq!(
            codec.verify::<RefreshClaims>(&token).unwrap_err(),
            TokenError::Invalid
        );
    }

    #[test]
    fn test_overflowing_ttl_fails_to_sign() {
        let codec = TokenCodec::new("test-secret");
        let result = codec.sign(&RefreshClaims { session_id: 1 }, i64::MAX);

        assert!(matches!(result, Err(TokenError::Signing(_))));
    }

    #[test]
    fn test_garbage_is_invalid() {
        let codec = TokenCodec::new("test-secret");
        for input in ["", "abc", "a.b.c", "....."] {
            assert_eq!(
                codec.verify::<RefreshClaims>(input).unwrap_err(),
                TokenError::Invalid
            );
        }
    }

    proptest! {
        #[test]
        fn prop_round_trip_preserves_claims(
            id in 1i64..i64::from(u32::MAX),
            session_id in 1i64..i64::from(u32::MAX),
            name in "[a-zA-Z ]{3,40}",
            verified in any::<bool>(),
            ttl in 1i64..1_000_000,
        ) {
            let codec = TokenCodec::new("prop-secret");
            let claims = AccessClaims {
                id,
                name,
                email: format!("user{}@example.com", id),
                is_email_valid: verified,
                session_id,
            };

            let token = codec.sign(&claims, ttl).unwrap();
            let decoded: Verified<AccessClaims> = codec.verify(&token).unwrap();

            prop_assert_eq!(decoded.claims, claims);
            prop_assert_eq!((decoded.expires_at - decoded.issued_at).num_seconds(), ttl);
        }
    }
}
