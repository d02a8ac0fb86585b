//! Document store backends.
//!
//! The device database is Postgres (JSONB attribute documents) when
//! `devicedb.url` is configured, and an in-process map otherwise. The
//! in-memory backend carries the same contracts and is what the test
//! suite runs against.

pub mod alarms;
pub mod devices;
pub mod secrets;

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::RwLock;

use iota_protocol::Record;
use iota_protocol::alarm::Alarm;

use crate::error::ApiError;

/// The device database: Postgres or in-memory.
#[derive(Clone)]
pub enum Store {
    Postgres(PgPool),
    Memory(MemoryStore),
}

impl Store {
    /// Open the configured backend and ensure its schema exists.
    pub async fn open(devicedb_url: Option<&str>) -> Result<Self, ApiError> {
        match devicedb_url {
            Some(url) if !url.is_empty() => {
                let pool = PgPoolOptions::new()
                    .max_connections(8)
                    .connect(url)
                    .await?;
                migrate(&pool).await?;
                Ok(Store::Postgres(pool))
            }
            _ => {
                tracing::info!("device database url not configured, using in-memory store");
                Ok(Store::Memory(MemoryStore::default()))
            }
        }
    }

    pub fn in_memory() -> Self {
        Store::Memory(MemoryStore::default())
    }
}

/// In-memory backend shared across clones.
#[derive(Clone, Default)]
pub struct MemoryStore {
    pub(crate) inner: Arc<RwLock<MemoryInner>>,
}

#[derive(Default)]
pub(crate) struct MemoryInner {
    pub(crate) devices: HashMap<String, StoredDevice>,
    pub(crate) alarms: HashMap<(String, String), Alarm>,
    pub(crate) secrets: HashMap<String, Vec<u8>>,
}

pub(crate) struct StoredDevice {
    pub(crate) token: String,
    pub(crate) attrs: Record,
}

async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS devices (
             id    TEXT PRIMARY KEY,
             token TEXT NOT NULL,
             attrs JSONB NOT NULL DEFAULT '{}'::jsonb
         )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS alarms (
             id          TEXT PRIMARY KEY,
             name        TEXT NOT NULL,
             originator  TEXT NOT NULL,
             severity    TEXT NOT NULL,
             status      TEXT NOT NULL,
             description TEXT NOT NULL DEFAULT '',
             details     JSONB NOT NULL DEFAULT '{}'::jsonb,
             update_time TIMESTAMPTZ,
             clear_time  TIMESTAMPTZ,
             UNIQUE (name, originator)
         )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS secret (
             key    TEXT PRIMARY KEY,
             secret BYTEA NOT NULL
         )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}
