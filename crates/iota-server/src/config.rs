//! Server configuration: a flat, two-level key/value store.
//!
//! Keys are root-level (`host`, `domain`) or `section.option` pairs
//! (`mqtt.url`, `device.autoapprove`, `api.url`). Backed by a TOML
//! file so `iota config KEY [VALUE]` can round-trip it.

use std::path::{Path, PathBuf};

use iota_mqtt::MqttConfig;

/// Default config file location; override with `IOTA_CONFIG`.
const DEFAULT_PATH: &str = "/etc/iota/iota.toml";

#[derive(Debug, Clone)]
pub struct Config {
    path: Option<PathBuf>,
    table: toml::Table,
}

impl Config {
    /// Load the config file, or start empty when it does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("IOTA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_PATH));
        Self::from_file(path)
    }

    pub fn from_file(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let table = match std::fs::read_to_string(&path) {
            Ok(contents) => contents.parse::<toml::Table>()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => toml::Table::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path),
            table,
        })
    }

    /// An empty, unsaved config. Used by tests and embedded setups.
    pub fn empty() -> Self {
        Self {
            path: None,
            table: toml::Table::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn split_key<'a>(&self, key: &'a str) -> Option<(&'a str, &'a str)> {
        key.split_once('.')
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let value = match self.split_key(key) {
            Some((section, option)) => self.table.get(section)?.as_table()?.get(option)?,
            None => self.table.get(key)?,
        };
        Some(render(value))
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key)?.parse().ok()
    }

    pub fn set(&mut self, key: &str, value: &str) {
        let value = toml::Value::String(value.to_string());
        match self.split_key(key) {
            Some((section, option)) => {
                let entry = self
                    .table
                    .entry(section.to_string())
                    .or_insert_with(|| toml::Value::Table(toml::Table::new()));
                if let Some(table) = entry.as_table_mut() {
                    table.insert(option.to_string(), value);
                }
            }
            None => {
                self.table.insert(key.to_string(), value);
            }
        }
    }

    /// Remove a key. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.split_key(key) {
            Some((section, option)) => self
                .table
                .get_mut(section)
                .and_then(|s| s.as_table_mut())
                .and_then(|t| t.remove(option))
                .is_some(),
            None => self.table.remove(key).is_some(),
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            anyhow::bail!("configuration has no backing file");
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(&self.table)?)?;
        Ok(())
    }

    /// Gateway settings from the `mqtt` section.
    pub fn mqtt(&self) -> MqttConfig {
        let defaults = MqttConfig::default();
        MqttConfig {
            url: self.get_or("mqtt.url", &defaults.url),
            user: self.get("mqtt.user"),
            password: self.get("mqtt.password"),
            client_id: self.get_or("mqtt.clientid", ""),
            qos: self
                .get_i64("mqtt.qos")
                .and_then(|q| u8::try_from(q).ok())
                .unwrap_or(defaults.qos),
            clean: self.get_bool("mqtt.clean"),
        }
    }
}

fn render(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
