//! User database facade.
//!
//! Backends register by URL scheme and are selected from the `userdb`
//! config section at process init. Passwords are bcrypt hashes; a
//! value that already looks like a bcrypt hash is stored as-is so
//! databases can be seeded with pre-hashed credentials.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::ApiError;

/// Core user fields every backend stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasicUser {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default)]
    pub inactive: bool,
}

type SecretGen<'a> = &'a (dyn Fn() -> Vec<u8> + Send + Sync);

/// Storage operations a user database backend provides.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: BasicUser) -> Result<(), ApiError>;
    async fn find(&self, name: &str) -> Result<BasicUser, ApiError>;
    async fn remove(&self, name: &str) -> Result<(), ApiError>;
    async fn update_password(&self, name: &str, password: &str) -> Result<(), ApiError>;

    /// Return the secret under `key`, generating it with `generate` on
    /// first request. Concurrent callers observe the same value.
    async fn get_secret(&self, key: &str, generate: SecretGen<'_>) -> Result<Vec<u8>, ApiError>;
}

/// Configured backend, selected by `userdb.type` or the URL scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserDbBackend {
    File(PathBuf),
    Postgres(String),
}

impl UserDbBackend {
    /// Resolve the backend from config. `userdb.type` wins; otherwise
    /// the `userdb.url` scheme decides.
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        let dbtype = config.get("userdb.type");
        let dburl = config.get_or("userdb.url", "");

        let scheme = match dbtype.as_deref() {
            Some(t) if !t.is_empty() => t.to_string(),
            _ if !dburl.is_empty() => url::Url::parse(&dburl)
                .map(|u| u.scheme().to_string())
                .map_err(|e| ApiError::BadRequest(format!("invalid userdb url: {e}")))?,
            _ => {
                return Err(ApiError::BadRequest(
                    "user database is not configured".into(),
                ));
            }
        };

        match scheme.as_str() {
            "file" => {
                let path = dburl
                    .strip_prefix("file://")
                    .unwrap_or(&dburl)
                    .to_string();
                Ok(UserDbBackend::File(PathBuf::from(path)))
            }
            "postgres" | "postgresql" => Ok(UserDbBackend::Postgres(dburl)),
            other => Err(ApiError::BadRequest(format!(
                "unsupported user database scheme: {other}"
            ))),
        }
    }
}

/// The central point of user management.
pub struct UserDatabase {
    store: Box<dyn UserStore>,
}

impl UserDatabase {
    /// Open the backend configured in the `userdb` section.
    pub async fn open(config: &Config) -> Result<Self, ApiError> {
        let store: Box<dyn UserStore> = match UserDbBackend::from_config(config)? {
            UserDbBackend::File(path) => Box::new(FileStore::open(path)?),
            UserDbBackend::Postgres(url) => Box::new(PostgresStore::open(&url).await?),
        };
        Ok(Self { store })
    }

    /// In-process database for tests and embedded setups.
    pub fn in_memory() -> Self {
        Self {
            store: Box::new(MemoryStore::default()),
        }
    }

    pub async fn create(&self, name: &str, password: &str) -> Result<(), ApiError> {
        if name.is_empty() || password.is_empty() {
            return Err(ApiError::BadRequest(
                "missing required parameters".into(),
            ));
        }
        let user = BasicUser {
            name: name.to_string(),
            password: hash_password(password)?,
            inactive: false,
        };
        self.store.create(user).await
    }

    pub async fn find(&self, name: &str) -> Result<BasicUser, ApiError> {
        self.store.find(name).await
    }

    pub async fn remove(&self, name: &str) -> Result<(), ApiError> {
        self.store.remove(name).await
    }

    /// Check a name/password pair. Inactive users are refused even
    /// with the right password.
    pub async fn authenticate(&self, name: &str, password: &str) -> Result<BasicUser, ApiError> {
        let user = self.store.find(name).await?;
        if user.inactive {
            return Err(ApiError::InactiveUser(name.to_string()));
        }
        let ok = bcrypt::verify(password, &user.password)
            .map_err(|e| ApiError::Unauthorized(e.to_string()))?;
        if !ok {
            return Err(ApiError::Unauthorized("wrong login/password".into()));
        }
        Ok(user)
    }

    pub async fn change_password(
        &self,
        name: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), ApiError> {
        self.authenticate(name, old_password).await?;
        self.store
            .update_password(name, &hash_password(new_password)?)
            .await
    }

    /// 64-byte signing secret under `key`, generated once.
    pub async fn get_secret(&self, key: &str) -> Result<Vec<u8>, ApiError> {
        self.store
            .get_secret(key, &|| {
                use rand::RngCore;
                let mut secret = vec![0u8; 64];
                rand::thread_rng().fill_bytes(&mut secret);
                secret
            })
            .await
    }

    /// Printable shared password under `key` (used for the super-user
    /// credential the broker plugin checks), generated once.
    pub async fn get_password(&self, key: &str, len: usize) -> Result<String, ApiError> {
        let bytes = self
            .store
            .get_secret(key, &move || {
                rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(len)
                    .collect()
            })
            .await?;
        String::from_utf8(bytes)
            .map_err(|e| ApiError::Internal(anyhow::Error::new(e).context("stored password")))
    }
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    // Accept a pre-hashed credential as-is.
    if password.starts_with("$2") && password.parse::<bcrypt::HashParts>().is_ok() {
        return Ok(password.to_string());
    }
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| ApiError::Internal(anyhow::Error::new(e).context("password hashing")))
}

// ── File backend ──────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileState {
    users: HashMap<String, BasicUser>,
    /// Secrets stored hex-encoded so the file stays line-oriented.
    secrets: HashMap<String, String>,
}

/// JSON-file backed user database for small installations.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileStore {
    pub fn open(path: PathBuf) -> Result<Self, ApiError> {
        let state = match std::fs::read(&path) {
            Ok(contents) => serde_json::from_slice(&contents)
                .map_err(|e| ApiError::Internal(anyhow::Error::new(e).context("user database")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileState::default(),
            Err(e) => {
                return Err(ApiError::Internal(
                    anyhow::Error::new(e).context("user database"),
                ));
            }
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn persist(&self, state: &FileState) -> Result<(), ApiError> {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let contents = serde_json::to_vec_pretty(state)
            .map_err(|e| ApiError::Internal(anyhow::Error::new(e).context("user database")))?;
        std::fs::write(&self.path, contents)
            .map_err(|e| ApiError::Internal(anyhow::Error::new(e).context("user database")))
    }
}

#[async_trait]
impl UserStore for FileStore {
    async fn create(&self, user: BasicUser) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        if state.users.contains_key(&user.name) {
            return Err(ApiError::DuplicateUser(user.name));
        }
        state.users.insert(user.name.clone(), user);
        self.persist(&state)
    }

    async fn find(&self, name: &str) -> Result<BasicUser, ApiError> {
        let state = self.state.lock().await;
        state
            .users
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::UserNotFound(name.to_string()))
    }

    async fn remove(&self, name: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        state
            .users
            .remove(name)
            .ok_or_else(|| ApiError::UserNotFound(name.to_string()))?;
        self.persist(&state)
    }

    async fn update_password(&self, name: &str, password: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(name)
            .ok_or_else(|| ApiError::UserNotFound(name.to_string()))?;
        user.password = password.to_string();
        self.persist(&state)
    }

    async fn get_secret(&self, key: &str, generate: SecretGen<'_>) -> Result<Vec<u8>, ApiError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.secrets.get(key) {
            return hex::decode(existing)
                .map_err(|e| ApiError::Internal(anyhow::Error::new(e).context("stored secret")));
        }
        let fresh = generate();
        state.secrets.insert(key.to_string(), hex::encode(&fresh));
        self.persist(&state)?;
        Ok(fresh)
    }
}

// ── Postgres backend ──────────────────────────────────────────

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn open(url: &str) -> Result<Self, ApiError> {
        let pool = PgPoolOptions::new().max_connections(4).connect(url).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                 name     TEXT PRIMARY KEY,
                 password TEXT NOT NULL,
                 inactive BOOLEAN NOT NULL DEFAULT FALSE
             )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS secret (
                 key    TEXT PRIMARY KEY,
                 secret BYTEA NOT NULL
             )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn create(&self, user: BasicUser) -> Result<(), ApiError> {
        let result = sqlx::query("INSERT INTO users (name, password, inactive) VALUES ($1, $2, $3)")
            .bind(&user.name)
            .bind(&user.password)
            .bind(user.inactive)
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if crate::db::is_unique_violation(&e) => Err(ApiError::DuplicateUser(user.name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn find(&self, name: &str) -> Result<BasicUser, ApiError> {
        use sqlx::Row;
        let row = sqlx::query("SELECT name, password, inactive FROM users WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::UserNotFound(name.to_string()))?;
        Ok(BasicUser {
            name: row.get("name"),
            password: row.get("password"),
            inactive: row.get("inactive"),
        })
    }

    async fn remove(&self, name: &str) -> Result<(), ApiError> {
        let result = sqlx::query("DELETE FROM users WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::UserNotFound(name.to_string()));
        }
        Ok(())
    }

    async fn update_password(&self, name: &str, password: &str) -> Result<(), ApiError> {
        let result = sqlx::query("UPDATE users SET password = $2 WHERE name = $1")
            .bind(name)
            .bind(password)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::UserNotFound(name.to_string()));
        }
        Ok(())
    }

    async fn get_secret(&self, key: &str, generate: SecretGen<'_>) -> Result<Vec<u8>, ApiError> {
        if let Some(secret) =
            sqlx::query_scalar::<_, Vec<u8>>("SELECT secret FROM secret WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?
        {
            return Ok(secret);
        }

        let fresh = generate();
        sqlx::query("INSERT INTO secret (key, secret) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING")
            .bind(key)
            .bind(&fresh)
            .execute(&self.pool)
            .await?;

        let secret = sqlx::query_scalar::<_, Vec<u8>>("SELECT secret FROM secret WHERE key = $1")
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        Ok(secret)
    }
}

// ── Memory backend (tests, embedded) ──────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<FileState>,
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create(&self, user: BasicUser) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        if state.users.contains_key(&user.name) {
            return Err(ApiError::DuplicateUser(user.name));
        }
        state.users.insert(user.name.clone(), user);
        Ok(())
    }

    async fn find(&self, name: &str) -> Result<BasicUser, ApiError> {
        let state = self.state.lock().await;
        state
            .users
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::UserNotFound(name.to_string()))
    }

    async fn remove(&self, name: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        state
            .users
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ApiError::UserNotFound(name.to_string()))
    }

    async fn update_password(&self, name: &str, password: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(name)
            .ok_or_else(|| ApiError::UserNotFound(name.to_string()))?;
        user.password = password.to_string();
        Ok(())
    }

    async fn get_secret(&self, key: &str, generate: SecretGen<'_>) -> Result<Vec<u8>, ApiError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.secrets.get(key) {
            return Ok(hex::decode(existing).expect("stored secret"));
        }
        let fresh = generate();
        state.secrets.insert(key.to_string(), hex::encode(&fresh));
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_authenticate_round_trip() {
        let db = UserDatabase::in_memory();
        db.create("alice", "s3cret").await.unwrap();

        let user = db.authenticate("alice", "s3cret").await.unwrap();
        assert_eq!(user.name, "alice");

        assert!(matches!(
            db.authenticate("alice", "wrong").await.unwrap_err(),
            ApiError::Unauthorized(_)
        ));
        assert!(matches!(
            db.authenticate("bob", "s3cret").await.unwrap_err(),
            ApiError::UserNotFound(_)
        ));
    }

    #[tokio::test]
    async fn duplicate_user_conflicts() {
        let db = UserDatabase::in_memory();
        db.create("alice", "one").await.unwrap();
        assert!(matches!(
            db.create("alice", "two").await.unwrap_err(),
            ApiError::DuplicateUser(_)
        ));
    }

    #[tokio::test]
    async fn inactive_user_is_forbidden() {
        let db = UserDatabase::in_memory();
        db.store
            .create(BasicUser {
                name: "carol".into(),
                password: hash_password("pw").unwrap(),
                inactive: true,
            })
            .await
            .unwrap();

        assert!(matches!(
            db.authenticate("carol", "pw").await.unwrap_err(),
            ApiError::InactiveUser(_)
        ));
    }

    #[tokio::test]
    async fn change_password_requires_old_one() {
        let db = UserDatabase::in_memory();
        db.create("alice", "old").await.unwrap();

        assert!(db.change_password("alice", "bogus", "new").await.is_err());
        db.change_password("alice", "old", "new").await.unwrap();
        db.authenticate("alice", "new").await.unwrap();
    }

    #[tokio::test]
    async fn secrets_are_generated_once() {
        let db = UserDatabase::in_memory();
        let first = db.get_secret("jwt").await.unwrap();
        let second = db.get_secret("jwt").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);

        let pw = db.get_password("mqtt", 32).await.unwrap();
        assert_eq!(pw.len(), 32);
        assert_eq!(db.get_password("mqtt", 32).await.unwrap(), pw);
    }

    #[test]
    fn pre_hashed_password_is_kept() {
        let hashed = bcrypt::hash("pw", 4).unwrap();
        assert_eq!(hash_password(&hashed).unwrap(), hashed);

        // A fresh hash of plaintext differs from the input.
        assert_ne!(hash_password("pw").unwrap(), "pw");
    }

    #[test]
    fn backend_selection_by_scheme() {
        let mut config = Config::empty();
        config.set("userdb.url", "file:///var/lib/iota/users.json");
        assert_eq!(
            UserDbBackend::from_config(&config).unwrap(),
            UserDbBackend::File(PathBuf::from("/var/lib/iota/users.json"))
        );

        config.set("userdb.url", "postgres://localhost/iota");
        assert_eq!(
            UserDbBackend::from_config(&config).unwrap(),
            UserDbBackend::Postgres("postgres://localhost/iota".into())
        );

        config.set("userdb.type", "ldap");
        assert!(UserDbBackend::from_config(&config).is_err());
    }

    #[test]
    fn backend_requires_configuration() {
        assert!(UserDbBackend::from_config(&Config::empty()).is_err());
    }
}
