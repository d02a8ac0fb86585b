//! Alarm types shared between the server and API clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How urgent an alarm is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
    Warning,
}

/// Whether an alarm is currently raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Active,
    Cleared,
}

impl Default for Status {
    fn default() -> Self {
        Status::Active
    }
}

/// An alarm raised by a device or an operator.
///
/// `(name, originator)` is the logical key; `id` is an opaque hex
/// string assigned by the store on first upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub originator: String,
    pub severity: Severity,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub clear_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_camel_case_times() {
        let alarm = Alarm {
            id: "a1b2".into(),
            name: "overheat".into(),
            originator: "pi-42".into(),
            severity: Severity::Major,
            status: Status::Active,
            description: "CPU above 85C".into(),
            details: serde_json::Map::new(),
            update_time: Some(Utc::now()),
            clear_time: None,
        };
        let json = serde_json::to_value(&alarm).unwrap();
        assert_eq!(json["severity"], "major");
        assert_eq!(json["status"], "active");
        assert!(json.get("updateTime").is_some());
        assert!(json.get("clearTime").is_some());
    }

    #[test]
    fn deserializes_minimal_body() {
        let alarm: Alarm =
            serde_json::from_str(r#"{"name":"overheat","severity":"critical"}"#).unwrap();
        assert_eq!(alarm.name, "overheat");
        assert_eq!(alarm.severity, Severity::Critical);
        assert_eq!(alarm.status, Status::Active);
        assert!(alarm.id.is_empty());
        assert!(alarm.update_time.is_none());
    }
}
