//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section has defaults, so a partial (or absent) file still yields a
//! runnable configuration. Secrets are referenced by env-var name and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::types::{DrawTime, EngineError, DEFAULT_LOTTERY_TYPE};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub database: DatabaseConfig,
    pub fetch: FetchConfig,
    pub html: HtmlSourceConfig,
    pub api: ApiSourceConfig,
    pub stats: StatsConfig,
    pub notifier: NotifierConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub lottery_type: String,
    /// Offset of the lottery's local time from UTC, in hours.
    pub utc_offset_hours: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lottery_type: DEFAULT_LOTTERY_TYPE.to_string(),
            utc_offset_hours: -4,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://diaria.db".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_redirects: u8,
    pub user_agent: String,
    pub accept_language: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_redirects: 3,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
                .to_string(),
            accept_language: "es-ES,es;q=0.9,en;q=0.8".to_string(),
        }
    }
}

/// Where the results page lives and which elements carry the data.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HtmlSourceConfig {
    pub enabled: bool,
    pub url: String,
    /// CSS selector for the element introducing each date section.
    pub date_selector: String,
    /// CSS selector for main-number tokens.
    pub main_selector: String,
    /// CSS selector for companion-number tokens.
    pub companion_selector: String,
}

impl Default for HtmlSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "https://resultados.example.com/diaria".to_string(),
            date_selector: "h3.fecha".to_string(),
            main_selector: "span.numero".to_string(),
            companion_selector: "span.signo".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiteGameConfig {
    pub draw_time: DrawTime,
    pub site_game_id: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiSourceConfig {
    pub enabled: bool,
    pub base_url: String,
    /// One upstream game per draw slot.
    pub slots: Vec<SiteGameConfig>,
    /// Fetch the per-slot documents concurrently.
    pub concurrent: bool,
}

impl Default for ApiSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.example.com/v1".to_string(),
            slots: vec![
                SiteGameConfig { draw_time: DrawTime::Morning, site_game_id: "diaria-11am".to_string() },
                SiteGameConfig { draw_time: DrawTime::Afternoon, site_game_id: "diaria-3pm".to_string() },
                SiteGameConfig { draw_time: DrawTime::Evening, site_game_id: "diaria-9pm".to_string() },
            ],
            concurrent: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StatsConfig {
    /// Lookback windows in days.
    pub periods: Vec<u32>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            periods: vec![30, 60, 90, 180],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotifierConfig {
    pub enabled: bool,
    pub url: String,
    /// Name of the env var holding the shared internal API key.
    pub api_key_env: String,
    pub api_key_header: String,
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://localhost:3000/api/internal/draw-result".to_string(),
            api_key_env: "DIARIA_NOTIFY_KEY".to_string(),
            api_key_header: "x-internal-api-key".to_string(),
            timeout_secs: 10,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    /// A file that exists but does not parse is still an error.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            warn!(path, "Config file not found, using built-in defaults");
            Ok(Self::default())
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.stats.periods.iter().any(|p| *p == 0) {
            return Err(EngineError::Config("stats.periods must be positive".to_string()));
        }
        if !(-12..=14).contains(&self.engine.utc_offset_hours) {
            return Err(EngineError::Config(format!(
                "engine.utc_offset_hours out of range: {}",
                self.engine.utc_offset_hours
            )));
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The notifier's shared secret, if configured and non-empty.
    pub fn notifier_secret(&self) -> Option<SecretString> {
        Self::resolve_env(&self.notifier.api_key_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::new)
    }

    /// The lottery's local timezone as a fixed offset.
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.engine.utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix())
    }

    /// Today's date in the lottery's local time.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.local_offset()).date_naive()
    }
}
