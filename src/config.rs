//! Engine configuration.
//! Layers, lowest precedence first: built-in defaults, an optional JSON file named by
//! `GLYPH_CONFIG`, then individual `GLYPH_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, AppResult};

pub const ENV_CONFIG_FILE: &str = "GLYPH_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the columnar query service gateway.
    pub service_url: String,
    pub request_timeout_ms: u64,
    /// Cadence of the caller-side polling helper.
    pub poll_interval_ms: u64,
    /// Give up polling after this long; `None` polls forever.
    pub poll_timeout_ms: Option<u64>,
    pub default_page_size: usize,
    /// Glyphs with more rows than this are encoded as a sentinel + lookup id.
    pub max_direct_row_ids: usize,
    pub lookup_max_rows: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service_url: "http://127.0.0.1:8480".to_string(),
            request_timeout_ms: 30_000,
            poll_interval_ms: 1_000,
            poll_timeout_ms: Some(300_000),
            default_page_size: 50,
            max_direct_row_ids: 1_000,
            lookup_max_rows: 10_000,
        }
    }
}

/// Partial configuration; unspecified values inherit from the layer below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfigOverrides {
    pub service_url: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub poll_timeout_ms: Option<u64>,
    pub default_page_size: Option<usize>,
    pub max_direct_row_ids: Option<usize>,
    pub lookup_max_rows: Option<usize>,
}

impl EngineConfigOverrides {
    /// Read `GLYPH_*` variables through `lookup` (normally `std::env::var`).
    /// Unparseable numbers are ignored rather than failing startup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let num = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        Self {
            service_url: lookup("GLYPH_SERVICE_URL").filter(|s| !s.trim().is_empty()),
            request_timeout_ms: num("GLYPH_REQUEST_TIMEOUT_MS"),
            poll_interval_ms: num("GLYPH_POLL_INTERVAL_MS"),
            poll_timeout_ms: num("GLYPH_POLL_TIMEOUT_MS"),
            default_page_size: num("GLYPH_DEFAULT_PAGE_SIZE").map(|v| v as usize),
            max_direct_row_ids: num("GLYPH_MAX_DIRECT_ROW_IDS").map(|v| v as usize),
            lookup_max_rows: num("GLYPH_LOOKUP_MAX_ROWS").map(|v| v as usize),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }
}

impl EngineConfig {
    /// Overlay `ov` on top of `base`.
    pub fn from_layers(base: &EngineConfig, ov: &EngineConfigOverrides) -> Self {
        Self {
            service_url: ov.service_url.clone().unwrap_or_else(|| base.service_url.clone()),
            request_timeout_ms: ov.request_timeout_ms.unwrap_or(base.request_timeout_ms),
            poll_interval_ms: ov.poll_interval_ms.unwrap_or(base.poll_interval_ms),
            poll_timeout_ms: ov.poll_timeout_ms.or(base.poll_timeout_ms),
            default_page_size: ov.default_page_size.unwrap_or(base.default_page_size),
            max_direct_row_ids: ov.max_direct_row_ids.unwrap_or(base.max_direct_row_ids),
            lookup_max_rows: ov.lookup_max_rows.unwrap_or(base.lookup_max_rows),
        }
    }

    pub fn from_file(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AppError::io("config_read_failed", format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| AppError::invalid_argument("config_parse_failed", format!("{}: {}", path.display(), e)))
    }

    /// Defaults, then `GLYPH_CONFIG` file if set, then environment overrides.
    pub fn load() -> AppResult<Self> {
        let base = match std::env::var(ENV_CONFIG_FILE) {
            Ok(p) if !p.trim().is_empty() => Self::from_file(Path::new(p.trim()))?,
            _ => Self::default(),
        };
        let cfg = Self::from_layers(&base, &EngineConfigOverrides::from_env());
        debug!(target: "glyph::config", "effective config: {:?}", cfg);
        Ok(cfg)
    }

    pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms) }
    pub fn poll_timeout(&self) -> Option<Duration> { self.poll_timeout_ms.map(Duration::from_millis) }
    pub fn request_timeout(&self) -> Duration { Duration::from_millis(self.request_timeout_ms) }
}
