//! Credential backends for the predicates.

use std::sync::Arc;

use async_trait::async_trait;

use iota_server::Config;
use iota_server::auth::Authenticator;
use iota_server::auth::token::TokenSigner;
use iota_server::auth::userdb::UserDatabase;
use iota_server::db::Store;
use iota_server::db::devices::DeviceStore;

/// What the predicates need to know about identities.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// The shared super-user password.
    fn super_user_password(&self) -> &str;

    /// Check a name/password pair against the user database.
    async fn authenticate(&self, username: &str, password: &str) -> bool;

    /// Whether `token` is a valid user token.
    fn verify_user_token(&self, token: &str) -> bool;

    /// Whether `token` is a valid device token.
    fn verify_device_token(&self, token: &str) -> bool;
}

/// Production credential source over the platform's user database and
/// signing secrets.
pub struct AgentCredentials {
    users: Arc<UserDatabase>,
    authz: Authenticator,
    device_signer: TokenSigner,
    super_password: String,
}

impl AgentCredentials {
    /// Wire up from configuration: user database, user-token verifier,
    /// device-token verifier, and the stored super-user password.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let users = Arc::new(UserDatabase::open(config).await?);
        let super_password = users.get_password("mqtt", 32).await?;
        let authz = Authenticator::new(Arc::clone(&users)).await?;

        let store = Store::open(config.get("devicedb.url").as_deref()).await?;
        let device_secret = DeviceStore::new(store).get_secret("device").await?;
        let device_signer = TokenSigner::new(&device_secret, None);

        Ok(Self {
            users,
            authz,
            device_signer,
            super_password,
        })
    }
}

#[async_trait]
impl CredentialSource for AgentCredentials {
    fn super_user_password(&self) -> &str {
        &self.super_password
    }

    async fn authenticate(&self, username: &str, password: &str) -> bool {
        self.users.authenticate(username, password).await.is_ok()
    }

    fn verify_user_token(&self, token: &str) -> bool {
        self.authz.verify_token(token).is_ok()
    }

    fn verify_device_token(&self, token: &str) -> bool {
        self.device_signer.verify(token).is_ok()
    }
}
