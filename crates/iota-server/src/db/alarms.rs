//! Alarm store. Upserts key on `(name, originator)`; reads by either
//! the opaque hex id or the logical key.

use chrono::{DateTime, Utc};
use sqlx::Row;

use iota_protocol::alarm::{Alarm, Severity, Status};

use crate::db::Store;
use crate::error::ApiError;

#[derive(Clone)]
pub struct AlarmStore {
    store: Store,
}

impl AlarmStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Raise (or re-raise) an alarm: status becomes active, the update
    /// time is set, any previous clear time is dropped. Assigns
    /// `alarm.id` from the stored row.
    pub async fn upsert(&self, alarm: &mut Alarm) -> Result<(), ApiError> {
        alarm.status = Status::Active;
        alarm.update_time = Some(Utc::now());
        alarm.clear_time = None;

        match &self.store {
            Store::Postgres(pool) => {
                let id: String = sqlx::query_scalar(
                    "INSERT INTO alarms (id, name, originator, severity, status, description, details, update_time, clear_time)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NULL)
                     ON CONFLICT (name, originator) DO UPDATE SET
                         severity = EXCLUDED.severity,
                         status = EXCLUDED.status,
                         description = EXCLUDED.description,
                         details = EXCLUDED.details,
                         update_time = EXCLUDED.update_time,
                         clear_time = NULL
                     RETURNING id",
                )
                .bind(new_alarm_id())
                .bind(&alarm.name)
                .bind(&alarm.originator)
                .bind(severity_str(alarm.severity))
                .bind(status_str(alarm.status))
                .bind(&alarm.description)
                .bind(serde_json::Value::Object(alarm.details.clone()))
                .bind(alarm.update_time)
                .fetch_one(pool)
                .await?;
                alarm.id = id;
                Ok(())
            }
            Store::Memory(mem) => {
                let mut inner = mem.inner.write().await;
                let key = (alarm.name.clone(), alarm.originator.clone());
                let entry = inner.alarms.entry(key).or_insert_with(|| {
                    let mut fresh = alarm.clone();
                    fresh.id = new_alarm_id();
                    fresh
                });
                alarm.id = entry.id.clone();
                *entry = alarm.clone();
                Ok(())
            }
        }
    }

    pub async fn clear(&self, id: &str) -> Result<(), ApiError> {
        let now = Utc::now();
        match &self.store {
            Store::Postgres(pool) => {
                let result = sqlx::query(
                    "UPDATE alarms SET status = $2, clear_time = $3 WHERE id = $1",
                )
                .bind(id)
                .bind(status_str(Status::Cleared))
                .bind(now)
                .execute(pool)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(ApiError::AlarmNotFound(id.to_string()));
                }
                Ok(())
            }
            Store::Memory(mem) => {
                let mut inner = mem.inner.write().await;
                let alarm = inner
                    .alarms
                    .values_mut()
                    .find(|a| a.id == id)
                    .ok_or_else(|| ApiError::AlarmNotFound(id.to_string()))?;
                alarm.status = Status::Cleared;
                alarm.clear_time = Some(now);
                Ok(())
            }
        }
    }

    pub async fn clear_name(&self, name: &str, originator: &str) -> Result<(), ApiError> {
        let now = Utc::now();
        match &self.store {
            Store::Postgres(pool) => {
                let result = sqlx::query(
                    "UPDATE alarms SET status = $3, clear_time = $4 WHERE name = $1 AND originator = $2",
                )
                .bind(name)
                .bind(originator)
                .bind(status_str(Status::Cleared))
                .bind(now)
                .execute(pool)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(ApiError::AlarmNotFound(name.to_string()));
                }
                Ok(())
            }
            Store::Memory(mem) => {
                let mut inner = mem.inner.write().await;
                let alarm = inner
                    .alarms
                    .get_mut(&(name.to_string(), originator.to_string()))
                    .ok_or_else(|| ApiError::AlarmNotFound(name.to_string()))?;
                alarm.status = Status::Cleared;
                alarm.clear_time = Some(now);
                Ok(())
            }
        }
    }

    pub async fn find(&self, id: &str) -> Result<Alarm, ApiError> {
        match &self.store {
            Store::Postgres(pool) => {
                let row = sqlx::query("SELECT * FROM alarms WHERE id = $1")
                    .bind(id)
                    .fetch_optional(pool)
                    .await?
                    .ok_or_else(|| ApiError::AlarmNotFound(id.to_string()))?;
                Ok(row_to_alarm(&row))
            }
            Store::Memory(mem) => {
                let inner = mem.inner.read().await;
                inner
                    .alarms
                    .values()
                    .find(|a| a.id == id)
                    .cloned()
                    .ok_or_else(|| ApiError::AlarmNotFound(id.to_string()))
            }
        }
    }

    pub async fn find_name(&self, name: &str, originator: &str) -> Result<Alarm, ApiError> {
        match &self.store {
            Store::Postgres(pool) => {
                let row = sqlx::query("SELECT * FROM alarms WHERE name = $1 AND originator = $2")
                    .bind(name)
                    .bind(originator)
                    .fetch_optional(pool)
                    .await?
                    .ok_or_else(|| ApiError::AlarmNotFound(name.to_string()))?;
                Ok(row_to_alarm(&row))
            }
            Store::Memory(mem) => {
                let inner = mem.inner.read().await;
                inner
                    .alarms
                    .get(&(name.to_string(), originator.to_string()))
                    .cloned()
                    .ok_or_else(|| ApiError::AlarmNotFound(name.to_string()))
            }
        }
    }

    pub async fn find_all(&self) -> Result<Vec<Alarm>, ApiError> {
        match &self.store {
            Store::Postgres(pool) => {
                let rows = sqlx::query("SELECT * FROM alarms").fetch_all(pool).await?;
                Ok(rows.iter().map(row_to_alarm).collect())
            }
            Store::Memory(mem) => {
                let inner = mem.inner.read().await;
                Ok(inner.alarms.values().cloned().collect())
            }
        }
    }

    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        match &self.store {
            Store::Postgres(pool) => {
                let result = sqlx::query("DELETE FROM alarms WHERE id = $1")
                    .bind(id)
                    .execute(pool)
                    .await?;
                if result.rows_affected() == 0 {
                    return Err(ApiError::AlarmNotFound(id.to_string()));
                }
                Ok(())
            }
            Store::Memory(mem) => {
                let mut inner = mem.inner.write().await;
                let key = inner
                    .alarms
                    .iter()
                    .find(|(_, a)| a.id == id)
                    .map(|(k, _)| k.clone())
                    .ok_or_else(|| ApiError::AlarmNotFound(id.to_string()))?;
                inner.alarms.remove(&key);
                Ok(())
            }
        }
    }

    pub async fn delete_name(&self, name: &str, originator: &str) -> Result<(), ApiError> {
        match &self.store {
            Store::Postgres(pool) => {
                let result = sqlx::query("DELETE FROM alarms WHERE name = $1 AND originator = $2")
                    .bind(name)
                    .bind(originator)
                    .execute(pool)
                    .await?;
                if result.rows_affected() == 0 {
                    return Err(ApiError::AlarmNotFound(name.to_string()));
                }
                Ok(())
            }
            Store::Memory(mem) => {
                let mut inner = mem.inner.write().await;
                inner
                    .alarms
                    .remove(&(name.to_string(), originator.to_string()))
                    .map(|_| ())
                    .ok_or_else(|| ApiError::AlarmNotFound(name.to_string()))
            }
        }
    }
}

fn new_alarm_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn severity_str(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "critical",
        Severity::Major => "major",
        Severity::Minor => "minor",
        Severity::Warning => "warning",
    }
}

fn status_str(status: Status) -> &'static str {
    match status {
        Status::Active => "active",
        Status::Cleared => "cleared",
    }
}

fn parse_severity(s: &str) -> Severity {
    match s {
        "critical" => Severity::Critical,
        "minor" => Severity::Minor,
        "warning" => Severity::Warning,
        _ => Severity::Major,
    }
}

fn parse_status(s: &str) -> Status {
    match s {
        "cleared" => Status::Cleared,
        _ => Status::Active,
    }
}

fn row_to_alarm(row: &sqlx::postgres::PgRow) -> Alarm {
    let severity: String = row.get("severity");
    let status: String = row.get("status");
    let details: serde_json::Value = row.get("details");
    Alarm {
        id: row.get("id"),
        name: row.get("name"),
        originator: row.get("originator"),
        severity: parse_severity(&severity),
        status: parse_status(&status),
        description: row.get("description"),
        details: details.as_object().cloned().unwrap_or_default(),
        update_time: row.get::<Option<DateTime<Utc>>, _>("update_time"),
        clear_time: row.get::<Option<DateTime<Utc>>, _>("clear_time"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alarm(name: &str, originator: &str) -> Alarm {
        Alarm {
            id: String::new(),
            name: name.into(),
            originator: originator.into(),
            severity: Severity::Major,
            status: Status::Active,
            description: "test".into(),
            details: serde_json::Map::new(),
            update_time: None,
            clear_time: None,
        }
    }

    fn store() -> AlarmStore {
        AlarmStore::new(Store::in_memory())
    }

    #[tokio::test]
    async fn upsert_assigns_stable_id() {
        let store = store();
        let mut first = alarm("overheat", "pi-42");
        store.upsert(&mut first).await.unwrap();
        assert!(!first.id.is_empty());

        let mut again = alarm("overheat", "pi-42");
        store.upsert(&mut again).await.unwrap();
        assert_eq!(again.id, first.id);

        assert_eq!(store.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upsert_reactivates_cleared_alarm() {
        let store = store();
        let mut a = alarm("overheat", "pi-42");
        store.upsert(&mut a).await.unwrap();
        store.clear(&a.id).await.unwrap();

        let cleared = store.find(&a.id).await.unwrap();
        assert_eq!(cleared.status, Status::Cleared);
        assert!(cleared.clear_time.is_some());

        let mut again = alarm("overheat", "pi-42");
        store.upsert(&mut again).await.unwrap();
        let active = store.find(&a.id).await.unwrap();
        assert_eq!(active.status, Status::Active);
        assert!(active.clear_time.is_none());
        assert!(active.update_time.is_some());
    }

    #[tokio::test]
    async fn clear_by_name() {
        let store = store();
        let mut a = alarm("overheat", "pi-42");
        store.upsert(&mut a).await.unwrap();

        store.clear_name("overheat", "pi-42").await.unwrap();
        let found = store.find_name("overheat", "pi-42").await.unwrap();
        assert_eq!(found.status, Status::Cleared);
    }

    #[tokio::test]
    async fn missing_alarms_error() {
        let store = store();
        assert!(matches!(
            store.find("beef").await.unwrap_err(),
            ApiError::AlarmNotFound(_)
        ));
        assert!(matches!(
            store.clear_name("nope", "pi-1").await.unwrap_err(),
            ApiError::AlarmNotFound(_)
        ));
        assert!(matches!(
            store.delete("beef").await.unwrap_err(),
            ApiError::AlarmNotFound(_)
        ));
    }

    #[tokio::test]
    async fn delete_by_id_and_name() {
        let store = store();
        let mut a = alarm("one", "pi-1");
        let mut b = alarm("two", "pi-2");
        store.upsert(&mut a).await.unwrap();
        store.upsert(&mut b).await.unwrap();

        store.delete(&a.id).await.unwrap();
        store.delete_name("two", "pi-2").await.unwrap();
        assert!(store.find_all().await.unwrap().is_empty());
    }
}
