//! Signing secrets in the device database.
//!
//! A secret is generated once on first request and never changes.
//! Concurrent first requests race on the insert; losers re-read the
//! winner's value.

use rand::RngCore;

use crate::db::Store;
use crate::error::ApiError;

/// Length of generated signing secrets.
const SECRET_LEN: usize = 64;

pub async fn get_secret(store: &Store, key: &str) -> Result<Vec<u8>, ApiError> {
    match store {
        Store::Postgres(pool) => {
            if let Some(secret) =
                sqlx::query_scalar::<_, Vec<u8>>("SELECT secret FROM secret WHERE key = $1")
                    .bind(key)
                    .fetch_optional(pool)
                    .await?
            {
                return Ok(secret);
            }

            let fresh = generate();
            sqlx::query("INSERT INTO secret (key, secret) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING")
                .bind(key)
                .bind(&fresh)
                .execute(pool)
                .await?;

            // First writer wins; re-read in case we lost the race.
            let secret =
                sqlx::query_scalar::<_, Vec<u8>>("SELECT secret FROM secret WHERE key = $1")
                    .bind(key)
                    .fetch_one(pool)
                    .await?;
            Ok(secret)
        }
        Store::Memory(mem) => {
            let mut inner = mem.inner.write().await;
            let secret = inner
                .secrets
                .entry(key.to_string())
                .or_insert_with(generate);
            Ok(secret.clone())
        }
    }
}

fn generate() -> Vec<u8> {
    let mut secret = vec![0u8; SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}
