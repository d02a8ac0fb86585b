//! Shared application state for the Axum server.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use iota_mqtt::Channel;

use crate::alarm::AlarmManager;
use crate::auth::Authenticator;
use crate::auth::userdb::UserDatabase;
use crate::config::Config;
use crate::db::Store;
use crate::db::alarms::AlarmStore;
use crate::db::devices::DeviceStore;
use crate::device::{DeviceManager, DeviceManagerOptions};
use crate::hub::{Hub, Update};
use crate::tsdb::{InfluxConfig, InfluxWriter, Tsdb};

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserDatabase>,
    pub authz: Arc<Authenticator>,
    pub devices: Arc<DeviceManager>,
    pub alarms: Arc<AlarmManager>,
    pub tsdb: Option<Arc<dyn Tsdb>>,
    pub device_hub: Hub,
    pub alarm_hub: Hub,
}

impl AppState {
    /// Wire up all services from the configuration.
    pub async fn new(
        config: &Config,
        channel: Option<Arc<dyn Channel>>,
    ) -> anyhow::Result<Self> {
        let users = Arc::new(UserDatabase::open(config).await?);
        let store = Store::open(config.get("devicedb.url").as_deref()).await?;
        let tsdb = InfluxConfig::from_config(config)
            .map(|influx| Arc::new(InfluxWriter::new(influx)) as Arc<dyn Tsdb>);
        let options = DeviceManagerOptions {
            rpc_timeout: Duration::from_secs(
                config.get_i64("device.rpcTimeout").unwrap_or(5).max(0) as u64,
            ),
            auto_approve: config.get_bool("device.autoapprove"),
        };
        Self::assemble(users, store, channel, options, tsdb).await
    }

    /// Fully in-process state for tests and embedded use.
    pub async fn in_memory(channel: Option<Arc<dyn Channel>>) -> Self {
        Self::in_memory_with(channel, DeviceManagerOptions::default()).await
    }

    /// In-process state with explicit device-manager options.
    pub async fn in_memory_with(
        channel: Option<Arc<dyn Channel>>,
        options: DeviceManagerOptions,
    ) -> Self {
        Self::assemble(
            Arc::new(UserDatabase::in_memory()),
            Store::in_memory(),
            channel,
            options,
            None,
        )
        .await
        .expect("in-memory state")
    }

    async fn assemble(
        users: Arc<UserDatabase>,
        store: Store,
        channel: Option<Arc<dyn Channel>>,
        options: DeviceManagerOptions,
        tsdb: Option<Arc<dyn Tsdb>>,
    ) -> anyhow::Result<Self> {
        let authz = Arc::new(Authenticator::new(Arc::clone(&users)).await?);

        let device_store = DeviceStore::new(store.clone());
        let device_secret = device_store.get_secret("device").await?;
        let devices = Arc::new(DeviceManager::new(
            device_store,
            &device_secret,
            channel,
            options,
        ));
        let alarms = Arc::new(AlarmManager::new(AlarmStore::new(store)));

        let device_hub = Hub::new();
        let alarm_hub = Hub::new();
        forward_device_updates(&devices, device_hub.clone());
        forward_alarm_updates(&alarms, alarm_hub.clone());

        Ok(Self {
            users,
            authz,
            devices,
            alarms,
            tsdb,
            device_hub,
            alarm_hub,
        })
    }
}

fn forward_device_updates(devices: &DeviceManager, hub: Hub) {
    let mut updates = devices.subscribe_updates();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(record) => {
                    let id = record
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    hub.publish(Update {
                        id,
                        payload: serde_json::Value::Object(record),
                    });
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "device update forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn forward_alarm_updates(alarms: &AlarmManager, hub: Hub) {
    let mut updates = alarms.subscribe_updates();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(alarm) => match serde_json::to_value(&alarm) {
                    Ok(payload) => hub.publish(Update {
                        id: alarm.id.clone(),
                        payload,
                    }),
                    Err(e) => tracing::error!(error = %e, "failed to serialize alarm update"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "alarm update forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
