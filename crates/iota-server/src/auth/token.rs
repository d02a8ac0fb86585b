//! HMAC-signed bearer tokens with a subject claim.
//!
//! Users and devices use different signing secrets; device tokens
//! never expire, user tokens carry a 30-day expiry.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    exp: Option<u64>,
}

/// Mints and verifies HS256 tokens against one secret.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    expiry: Option<chrono::Duration>,
}

impl TokenSigner {
    pub fn new(secret: &[u8], expiry: Option<chrono::Duration>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if expiry.is_none() {
            validation.validate_exp = false;
            validation.required_spec_claims.clear();
        }
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            expiry,
        }
    }

    /// Sign `{sub: subject}`.
    pub fn mint(&self, subject: &str) -> Result<String, ApiError> {
        let claims = Claims {
            sub: subject.to_string(),
            exp: self
                .expiry
                .map(|d| (chrono::Utc::now() + d).timestamp() as u64),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ApiError::Internal(anyhow::Error::new(e).context("token signing failed")))
    }

    /// Check the signature (and expiry, if minted with one) and return
    /// the subject.
    pub fn verify(&self, token: &str) -> Result<String, ApiError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims.sub)
            .map_err(|e| ApiError::Unauthorized(e.to_string()))
    }

    /// Verify the bearer token on a request.
    pub fn verify_request(&self, headers: &HeaderMap) -> Result<String, ApiError> {
        let token = bearer_token(headers)
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;
        self.verify(token)
    }
}

/// Extract the token from `Authorization: bearer <token>`. The scheme
/// comparison is case-insensitive.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then_some(token.trim())
}
