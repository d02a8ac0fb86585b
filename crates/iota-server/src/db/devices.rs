//! Device registry store.
//!
//! Devices are schema-free documents keyed by id. The store owns the
//! reserved-key discipline: `_id`/`_token` never leave it, `id`/`token`
//! are projected onto every read, and inbound field sets are stripped
//! of all four spellings before they touch a document.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::Row;
use tokio::sync::RwLock;

use iota_protocol::Record;
use iota_protocol::device::{ID_ATTR, ID_KEY, TOKEN_ATTR, TOKEN_KEY};

use crate::db::{Store, StoredDevice, is_unique_violation};
use crate::error::ApiError;

/// Device store with a write-through token cache.
#[derive(Clone)]
pub struct DeviceStore {
    store: Store,
    token_cache: Arc<RwLock<HashMap<String, String>>>,
}

impl DeviceStore {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            token_cache: Arc::default(),
        }
    }

    pub async fn create(&self, id: &str, token: &str, attrs: Record) -> Result<(), ApiError> {
        let attrs = sanitize(attrs);
        match &self.store {
            Store::Postgres(pool) => {
                let result = sqlx::query("INSERT INTO devices (id, token, attrs) VALUES ($1, $2, $3)")
                    .bind(id)
                    .bind(token)
                    .bind(serde_json::Value::Object(attrs))
                    .execute(pool)
                    .await;
                match result {
                    Ok(_) => Ok(()),
                    Err(e) if is_unique_violation(&e) => {
                        Err(ApiError::DuplicateDevice(id.to_string()))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Store::Memory(mem) => {
                let mut inner = mem.inner.write().await;
                if inner.devices.contains_key(id) {
                    return Err(ApiError::DuplicateDevice(id.to_string()));
                }
                inner.devices.insert(
                    id.to_string(),
                    StoredDevice {
                        token: token.to_string(),
                        attrs,
                    },
                );
                Ok(())
            }
        }
    }

    /// Read one device, projected to `keys ∪ {id, token}` (full record
    /// when `keys` is empty).
    pub async fn find(&self, id: &str, keys: &[String]) -> Result<Record, ApiError> {
        match &self.store {
            Store::Postgres(pool) => {
                let row = sqlx::query("SELECT token, attrs FROM devices WHERE id = $1")
                    .bind(id)
                    .fetch_optional(pool)
                    .await?
                    .ok_or_else(|| ApiError::DeviceNotFound(id.to_string()))?;
                let token: String = row.get("token");
                let attrs: serde_json::Value = row.get("attrs");
                let attrs = attrs.as_object().cloned().unwrap_or_default();
                Ok(project(id, &token, &attrs, keys))
            }
            Store::Memory(mem) => {
                let inner = mem.inner.read().await;
                let device = inner
                    .devices
                    .get(id)
                    .ok_or_else(|| ApiError::DeviceNotFound(id.to_string()))?;
                Ok(project(id, &device.token, &device.attrs, keys))
            }
        }
    }

    pub async fn find_all(&self, keys: &[String]) -> Result<Vec<Record>, ApiError> {
        match &self.store {
            Store::Postgres(pool) => {
                let rows = sqlx::query("SELECT id, token, attrs FROM devices")
                    .fetch_all(pool)
                    .await?;
                Ok(rows
                    .into_iter()
                    .map(|row| {
                        let id: String = row.get("id");
                        let token: String = row.get("token");
                        let attrs: serde_json::Value = row.get("attrs");
                        let attrs = attrs.as_object().cloned().unwrap_or_default();
                        project(&id, &token, &attrs, keys)
                    })
                    .collect())
            }
            Store::Memory(mem) => {
                let inner = mem.inner.read().await;
                Ok(inner
                    .devices
                    .iter()
                    .map(|(id, device)| project(id, &device.token, &device.attrs, keys))
                    .collect())
            }
        }
    }

    /// Current bearer token for the device, served from the cache when
    /// warm.
    pub async fn get_token(&self, id: &str) -> Result<String, ApiError> {
        if let Some(token) = self.token_cache.read().await.get(id) {
            return Ok(token.clone());
        }

        let token = match &self.store {
            Store::Postgres(pool) => {
                sqlx::query_scalar::<_, String>("SELECT token FROM devices WHERE id = $1")
                    .bind(id)
                    .fetch_optional(pool)
                    .await?
                    .ok_or_else(|| ApiError::DeviceNotFound(id.to_string()))?
            }
            Store::Memory(mem) => {
                let inner = mem.inner.read().await;
                inner
                    .devices
                    .get(id)
                    .map(|d| d.token.clone())
                    .ok_or_else(|| ApiError::DeviceNotFound(id.to_string()))?
            }
        };

        self.token_cache
            .write()
            .await
            .insert(id.to_string(), token.clone());
        Ok(token)
    }

    /// Merge `fields` into the device document. A `null` value deletes
    /// the key. Returns whether anything was written.
    pub async fn update(&self, id: &str, fields: Record) -> Result<bool, ApiError> {
        let fields = sanitize(fields);
        if fields.is_empty() {
            return Ok(false);
        }

        match &self.store {
            Store::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                let attrs: serde_json::Value =
                    sqlx::query_scalar("SELECT attrs FROM devices WHERE id = $1 FOR UPDATE")
                        .bind(id)
                        .fetch_optional(&mut *tx)
                        .await?
                        .ok_or_else(|| ApiError::DeviceNotFound(id.to_string()))?;
                let mut attrs = attrs.as_object().cloned().unwrap_or_default();
                apply_fields(&mut attrs, &fields);
                sqlx::query("UPDATE devices SET attrs = $2 WHERE id = $1")
                    .bind(id)
                    .bind(serde_json::Value::Object(attrs))
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok(true)
            }
            Store::Memory(mem) => {
                let mut inner = mem.inner.write().await;
                let device = inner
                    .devices
                    .get_mut(id)
                    .ok_or_else(|| ApiError::DeviceNotFound(id.to_string()))?;
                apply_fields(&mut device.attrs, &fields);
                Ok(true)
            }
        }
    }

    /// Like `update`, but creates the device when absent and always
    /// replaces the token. Prior attributes survive, which is what
    /// makes reclaiming a device with a lost token work.
    pub async fn upsert(&self, id: &str, token: &str, fields: Record) -> Result<(), ApiError> {
        let fields = sanitize(fields);
        match &self.store {
            Store::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                let existing: Option<serde_json::Value> =
                    sqlx::query_scalar("SELECT attrs FROM devices WHERE id = $1 FOR UPDATE")
                        .bind(id)
                        .fetch_optional(&mut *tx)
                        .await?;
                match existing {
                    Some(attrs) => {
                        let mut attrs = attrs.as_object().cloned().unwrap_or_default();
                        apply_fields(&mut attrs, &fields);
                        sqlx::query("UPDATE devices SET token = $2, attrs = $3 WHERE id = $1")
                            .bind(id)
                            .bind(token)
                            .bind(serde_json::Value::Object(attrs))
                            .execute(&mut *tx)
                            .await?;
                    }
                    None => {
                        let mut attrs = Record::new();
                        apply_fields(&mut attrs, &fields);
                        sqlx::query("INSERT INTO devices (id, token, attrs) VALUES ($1, $2, $3)")
                            .bind(id)
                            .bind(token)
                            .bind(serde_json::Value::Object(attrs))
                            .execute(&mut *tx)
                            .await?;
                    }
                }
                tx.commit().await?;
            }
            Store::Memory(mem) => {
                let mut inner = mem.inner.write().await;
                let device = inner.devices.entry(id.to_string()).or_insert(StoredDevice {
                    token: String::new(),
                    attrs: Record::new(),
                });
                device.token = token.to_string();
                apply_fields(&mut device.attrs, &fields);
            }
        }

        self.token_cache
            .write()
            .await
            .insert(id.to_string(), token.to_string());
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<(), ApiError> {
        self.token_cache.write().await.remove(id);

        match &self.store {
            Store::Postgres(pool) => {
                let result = sqlx::query("DELETE FROM devices WHERE id = $1")
                    .bind(id)
                    .execute(pool)
                    .await?;
                if result.rows_affected() == 0 {
                    return Err(ApiError::DeviceNotFound(id.to_string()));
                }
                Ok(())
            }
            Store::Memory(mem) => {
                let mut inner = mem.inner.write().await;
                inner
                    .devices
                    .remove(id)
                    .map(|_| ())
                    .ok_or_else(|| ApiError::DeviceNotFound(id.to_string()))
            }
        }
    }

    /// Secret bytes under `key` in the device database.
    pub async fn get_secret(&self, key: &str) -> Result<Vec<u8>, ApiError> {
        crate::db::secrets::get_secret(&self.store, key).await
    }
}

/// Strip the reserved key spellings from an inbound field set.
fn sanitize(mut fields: Record) -> Record {
    fields.remove(ID_ATTR);
    fields.remove(ID_KEY);
    fields.remove(TOKEN_ATTR);
    fields.remove(TOKEN_KEY);
    fields
}

/// Merge `fields` into `attrs`; a `null` value deletes the key.
fn apply_fields(attrs: &mut Record, fields: &Record) {
    for (key, value) in fields {
        if value.is_null() {
            attrs.remove(key);
        } else {
            attrs.insert(key.clone(), value.clone());
        }
    }
}

/// Project a stored document for a read: requested attributes plus the
/// `id` and `token` pseudo-attributes.
fn project(id: &str, token: &str, attrs: &Record, keys: &[String]) -> Record {
    let mut result = Record::new();
    if keys.is_empty() {
        result.extend(attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
    } else {
        for key in keys {
            if let Some(value) = attrs.get(key) {
                result.insert(key.clone(), value.clone());
            }
        }
    }
    result.insert(ID_ATTR.into(), serde_json::Value::String(id.to_string()));
    result.insert(
        TOKEN_ATTR.into(),
        serde_json::Value::String(token.to_string()),
    );
    result
}
