//! Gateway connection settings.

use serde::Deserialize;

use crate::error::{MqttError, MqttResult};

/// MQTT broker connection settings, from the `mqtt` config section.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker URL, e.g. `tcp://127.0.0.1:1883`.
    #[serde(default = "default_url")]
    pub url: String,
    /// Username for the broker connection.
    #[serde(default)]
    pub user: Option<String>,
    /// Password for the broker connection.
    #[serde(default)]
    pub password: Option<String>,
    /// Client identifier. The server generates and persists one when
    /// the config leaves it empty.
    #[serde(default)]
    pub client_id: String,
    /// Quality of service for every publish and subscribe (0-2).
    #[serde(default = "default_qos")]
    pub qos: u8,
    /// Whether to request a clean session on connect.
    #[serde(default)]
    pub clean: bool,
}

fn default_url() -> String {
    "tcp://127.0.0.1:1883".to_string()
}

fn default_qos() -> u8 {
    1
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            user: None,
            password: None,
            client_id: String::new(),
            qos: default_qos(),
            clean: false,
        }
    }
}

impl MqttConfig {
    /// Split the broker URL into `(host, port)`.
    pub fn broker_addr(&self) -> MqttResult<(String, u16)> {
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| MqttError::Config(format!("{}: {e}", self.url)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| MqttError::Config(format!("{}: missing host", self.url)))?
            .to_string();
        Ok((host, parsed.port().unwrap_or(1883)))
    }

    /// The configured QoS, clamped to a valid level.
    pub fn qos_level(&self) -> rumqttc::QoS {
        match self.qos {
            0 => rumqttc::QoS::AtMostOnce,
            2 => rumqttc::QoS::ExactlyOnce,
            1 => rumqttc::QoS::AtLeastOnce,
            other => {
                tracing::warn!(qos = other, "invalid quality of service level, using 1");
                rumqttc::QoS::AtLeastOnce
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = MqttConfig::default();
        assert_eq!(config.url, "tcp://127.0.0.1:1883");
        assert_eq!(config.qos, 1);
        assert!(!config.clean);
        assert!(config.user.is_none());
    }

    #[test]
    fn broker_addr_parses_host_and_port() {
        let config = MqttConfig {
            url: "tcp://broker.example.com:8883".into(),
            ..Default::default()
        };
        assert_eq!(
            config.broker_addr().unwrap(),
            ("broker.example.com".to_string(), 8883)
        );
    }

    #[test]
    fn broker_addr_defaults_port() {
        let config = MqttConfig {
            url: "tcp://127.0.0.1".into(),
            ..Default::default()
        };
        assert_eq!(config.broker_addr().unwrap().1, 1883);
    }

    #[test]
    fn broker_addr_rejects_garbage() {
        let config = MqttConfig {
            url: "not a url".into(),
            ..Default::default()
        };
        assert!(config.broker_addr().is_err());
    }

    #[test]
    fn out_of_range_qos_falls_back() {
        let config = MqttConfig {
            qos: 7,
            ..Default::default()
        };
        assert_eq!(config.qos_level(), rumqttc::QoS::AtLeastOnce);
    }
}
