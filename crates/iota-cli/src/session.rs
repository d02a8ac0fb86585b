//! Client session: server URL and cached login token.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const DEFAULT_URL: &str = "http://localhost:8080";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
}

impl Session {
    /// Load the cached session; `IOTA_URL` overrides the stored URL.
    pub fn load() -> anyhow::Result<Self> {
        let mut session = match std::fs::read_to_string(Self::path()?) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Session::default(),
            Err(e) => return Err(e.into()),
        };
        if let Ok(url) = std::env::var("IOTA_URL") {
            session.url = url;
        }
        if session.url.is_empty() {
            session.url = DEFAULT_URL.to_string();
        }
        Ok(session)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    fn path() -> anyhow::Result<PathBuf> {
        let dir = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("no config directory"))?;
        Ok(dir.join("iotacli").join("session.toml"))
    }
}
