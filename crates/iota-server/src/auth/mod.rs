//! Authentication: user credentials and bearer tokens.

pub mod token;
pub mod userdb;

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::error::ApiError;
use token::TokenSigner;
use userdb::{BasicUser, UserDatabase};

/// Lifetime of user tokens. Device tokens never expire.
const USER_TOKEN_EXPIRY_DAYS: i64 = 30;

/// Authenticates users over HTTP and signs their session tokens.
pub struct Authenticator {
    db: Arc<UserDatabase>,
    signer: TokenSigner,
}

impl Authenticator {
    /// Build the authenticator; the signing secret comes from the user
    /// database under the `jwt` key.
    pub async fn new(db: Arc<UserDatabase>) -> Result<Self, ApiError> {
        let secret = db.get_secret("jwt").await?;
        Ok(Self {
            db,
            signer: TokenSigner::new(
                &secret,
                Some(chrono::Duration::days(USER_TOKEN_EXPIRY_DAYS)),
            ),
        })
    }

    /// Authenticate with name and password; returns the user and a
    /// fresh session token.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(BasicUser, String), ApiError> {
        let user = self.db.authenticate(username, password).await?;
        tracing::debug!(user = %user.name, "authenticated user");
        let token = self.signer.mint(&user.name)?;
        Ok((user, token))
    }

    /// Verify a raw user token, returning the subject.
    pub fn verify_token(&self, token: &str) -> Result<String, ApiError> {
        self.signer.verify(token)
    }

    /// Verify the bearer token on a request.
    pub fn verify_request(&self, headers: &HeaderMap) -> Result<BasicUser, ApiError> {
        let name = self.signer.verify_request(headers)?;
        Ok(BasicUser {
            name,
            ..Default::default()
        })
    }
}
