//! Alarm manager — store wrapper that fans updates out to the hub.

use tokio::sync::broadcast;

use iota_protocol::alarm::Alarm;

use crate::db::alarms::AlarmStore;
use crate::error::ApiError;

pub struct AlarmManager {
    store: AlarmStore,
    update_tx: broadcast::Sender<Alarm>,
}

impl AlarmManager {
    pub fn new(store: AlarmStore) -> Self {
        let (update_tx, _) = broadcast::channel(64);
        Self { store, update_tx }
    }

    /// Post-image notifications for raised alarms.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<Alarm> {
        self.update_tx.subscribe()
    }

    pub async fn upsert(&self, alarm: &mut Alarm) -> Result<(), ApiError> {
        self.store.upsert(alarm).await?;
        let _ = self.update_tx.send(alarm.clone());
        Ok(())
    }

    pub async fn clear(&self, id: &str) -> Result<(), ApiError> {
        self.store.clear(id).await
    }

    pub async fn clear_name(&self, name: &str, originator: &str) -> Result<(), ApiError> {
        self.store.clear_name(name, originator).await
    }

    pub async fn find(&self, id: &str) -> Result<Alarm, ApiError> {
        self.store.find(id).await
    }

    pub async fn find_name(&self, name: &str, originator: &str) -> Result<Alarm, ApiError> {
        self.store.find_name(name, originator).await
    }

    pub async fn find_all(&self) -> Result<Vec<Alarm>, ApiError> {
        self.store.find_all().await
    }

    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.store.delete(id).await
    }

    pub async fn delete_name(&self, name: &str, originator: &str) -> Result<(), ApiError> {
        self.store.delete_name(name, originator).await
    }
}
