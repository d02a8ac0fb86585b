//! Time-series writer.
//!
//! The core issues a single call: hand a line-protocol record to the
//! sink, fire-and-forget. The Influx implementation batches nothing
//! and posts each record from a background task; write failures are
//! logged, never surfaced to the device.

use tokio::sync::mpsc;

use crate::config::Config;

/// A time-series sink.
pub trait Tsdb: Send + Sync {
    /// Queue one line-protocol record for asynchronous write.
    fn write_record(&self, record: String);
}

#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub server: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

impl InfluxConfig {
    /// Read the `influxdb` section; `None` when server or token are
    /// missing, which disables the sink.
    pub fn from_config(config: &Config) -> Option<Self> {
        let server = config.get("influxdb.server")?;
        let token = config.get("influxdb.token")?;
        Some(Self {
            server,
            token,
            org: config.get_or("influxdb.org", "iota"),
            bucket: config.get_or("influxdb.bucket", "iota"),
        })
    }
}

/// InfluxDB v2 sink over its HTTP write API.
pub struct InfluxWriter {
    queue_tx: mpsc::UnboundedSender<String>,
}

impl InfluxWriter {
    pub fn new(config: InfluxConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(config, queue_rx));
        Self { queue_tx }
    }
}

impl Tsdb for InfluxWriter {
    fn write_record(&self, record: String) {
        let _ = self.queue_tx.send(record);
    }
}

async fn write_loop(config: InfluxConfig, mut queue_rx: mpsc::UnboundedReceiver<String>) {
    let client = reqwest::Client::new();
    let url = format!(
        "{}/api/v2/write?org={}&bucket={}",
        config.server.trim_end_matches('/'),
        config.org,
        config.bucket
    );

    while let Some(record) = queue_rx.recv().await {
        let result = client
            .post(&url)
            .header("Authorization", format!("Token {}", config.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(record)
            .send()
            .await;
        match result {
            Ok(response) if !response.status().is_success() => {
                tracing::error!(status = %response.status(), "time-series write rejected");
            }
            Err(e) => {
                tracing::error!(error = %e, "time-series write failed");
            }
            Ok(_) => {}
        }
    }
}

/// Splice a `device` tag into the measurement section of a
/// line-protocol record.
pub fn tag_device(record: &str, device_id: &str) -> String {
    let mut sections = record.splitn(2, ' ');
    let measurement = sections.next().unwrap_or_default();
    match sections.next() {
        Some(rest) => format!("{measurement},device={device_id} {rest}"),
        None => format!("{measurement},device={device_id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_is_spliced_into_the_first_section() {
        assert_eq!(
            tag_device("cpu,host=a usage=0.5 1609459200", "pi-42"),
            "cpu,host=a,device=pi-42 usage=0.5 1609459200"
        );
        assert_eq!(
            tag_device("cpu usage=0.5", "pi-42"),
            "cpu,device=pi-42 usage=0.5"
        );
    }

    #[test]
    fn influx_config_requires_server_and_token() {
        let mut config = Config::empty();
        assert!(InfluxConfig::from_config(&config).is_none());

        config.set("influxdb.server", "http://influx:8086");
        assert!(InfluxConfig::from_config(&config).is_none());

        config.set("influxdb.token", "tok");
        let influx = InfluxConfig::from_config(&config).unwrap();
        assert_eq!(influx.org, "iota");
        assert_eq!(influx.bucket, "iota");
    }
}
