use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestraConfig {
    /// Nominal timeout for mandatory element lookups (ms)
    pub lookup_timeout_ms: u64,

    /// Nominal timeout for optional lookups and conditions (ms)
    pub optional_lookup_timeout_ms: u64,

    /// Delay between hierarchy reads while polling (ms)
    pub poll_interval_ms: u64,

    /// Per-attempt lookup window of the not-visible wait (ms)
    pub not_visible_poll_ms: u64,

    /// Per-attempt lookup window of scrollUntilVisible (ms)
    pub scroll_attempt_timeout_ms: u64,

    pub scroll_swipe_duration_ms: u64,

    /// Local port of the network mock proxy
    pub proxy_port: u16,

    /// Proxy address as seen from the device
    pub proxy_host: String,

    /// mitmdump executable; PATH lookup when unset
    pub mitmdump_path: Option<PathBuf>,

    pub screenshots_dir: PathBuf,

    /// Where init-flow app state snapshots are written
    pub state_dir: PathBuf,
}

impl Default for OrchestraConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: 17000,
            optional_lookup_timeout_ms: 7000,
            poll_interval_ms: 100,
            not_visible_poll_ms: 500,
            scroll_attempt_timeout_ms: 500,
            scroll_swipe_duration_ms: 600,
            proxy_port: 8085,
            proxy_host: "127.0.0.1".to_string(),
            mitmdump_path: None,
            screenshots_dir: PathBuf::from("./output/screenshots"),
            state_dir: std::env::temp_dir(),
        }
    }
}

impl OrchestraConfig {
    /// Read a YAML config file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }
}
