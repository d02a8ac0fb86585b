//! Device records and related wire types.
//!
//! A device is a schema-free JSON document. The store reserves `_id`
//! and `_token` internally and projects them back as `id` / `token`
//! on every read, so API clients never see the underscored forms.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A schema-free device document: attribute name to JSON value.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Internal primary-key field.
pub const ID_KEY: &str = "_id";
/// Internal bearer-token field.
pub const TOKEN_KEY: &str = "_token";
/// Projected device-id field.
pub const ID_ATTR: &str = "id";
/// Projected token field.
pub const TOKEN_ATTR: &str = "token";
/// Pending-claim identifier attribute.
pub const CLAIM_ID_ATTR: &str = "claim-id";
/// Pending-claim creation-time attribute.
pub const CLAIM_TIME_ATTR: &str = "claim-time";

static DEVICE_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[A-Za-z0-9_.@-]+$").expect("device id pattern"));

/// Whether `id` is acceptable as a device identifier.
///
/// Enforced on device create and on claim, so a malformed id never
/// reaches the store or the claim registry.
pub fn valid_device_id(id: &str) -> bool {
    DEVICE_ID_PATTERN.is_match(id)
}

/// An access token signed by the server to identify a client entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
    pub token: String,
}

impl Token {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

/// Response of `GET /version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "APIVersion")]
    pub api_version: String,
    #[serde(rename = "GitCommit")]
    pub git_commit: String,
    #[serde(rename = "BuildTime")]
    pub build_time: String,
    #[serde(rename = "Os")]
    pub os: String,
    #[serde(rename = "Arch")]
    pub arch: String,
}
