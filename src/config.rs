use crate::error::PartdeskError;
use clap::Parser;
use serde::Deserialize;
use std::{fs, path::Path, time::Duration};

#[derive(Debug, Clone, Parser)]
pub struct StartArgs {
    #[arg(short, long, default_value = "config.json")]
    pub config_path: String,

    #[arg(short, long, default_value = "127.0.0.1")]
    pub address: String,

    #[arg(short, long, default_value = "3030")]
    pub port: u16,

    #[arg(short, long, default_value = "INFO")]
    pub log_level: tracing::Level,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Amount of parts fetched by the live view on initial load and on every
    /// subsequent page.
    #[serde(default = "default_page_size")]
    pub page_size: i64,

    /// Base URL of the serverless functions issuing checkout and portal sessions.
    pub functions_url: String,

    /// UI languages the front end ships translations for.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    #[serde(default = "default_language")]
    pub default_language: String,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub feed: FeedConfig,

    /// Seconds a live session outlives its last use.
    #[serde(default = "default_live_idle_secs")]
    pub live_idle_secs: u64,
}

impl Config {
    pub fn read(path: impl AsRef<Path>) -> Result<Self, PartdeskError> {
        let config = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&config)?;

        if !config.languages.contains(&config.default_language) {
            return Err(PartdeskError::Config(format!(
                "default language '{}' is not in the supported languages",
                config.default_language
            )));
        }

        Ok(config)
    }

    /// Read `DATABASE_URL` from the environment.
    pub fn database_url() -> Result<String, PartdeskError> {
        std::env::var("DATABASE_URL")
            .map_err(|_| PartdeskError::Config("DATABASE_URL not set".to_string()))
    }

    pub fn live_idle(&self) -> Duration {
        Duration::from_secs(self.live_idle_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub max_bytes: u64,
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024,
            allowed_extensions: ["pdf", "step", "stp", "dxf", "dwg", "png", "jpg", "jpeg"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Reconnect bounds for the change feed listener.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub reconnect_min_ms: u64,
    pub reconnect_max_ms: u64,
}

impl FeedConfig {
    pub fn reconnect_min(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            reconnect_min_ms: 500,
            reconnect_max_ms: 30_000,
        }
    }
}

fn default_page_size() -> i64 {
    50
}

fn default_live_idle_secs() -> u64 {
    300
}

fn default_languages() -> Vec<String> {
    vec![default_language()]
}

fn default_language() -> String {
    "en".to_string()
}
