use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::paging::PagingOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Items between two anchors of the item list.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Anchors fetched per cursor walk.
    #[serde(default = "default_anchor_batch")]
    pub anchor_batch: usize,

    /// A feed is refetched once its last update is this old.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_minutes: u32,

    #[serde(default = "default_sync_tick")]
    pub sync_tick_minutes: u32,

    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("feedflow");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("feeds.db").to_string_lossy().to_string()
}

fn default_page_size() -> usize {
    20
}

fn default_anchor_batch() -> usize {
    10
}

fn default_sync_interval() -> u32 {
    120
}

fn default_sync_tick() -> u32 {
    10
}

fn default_fetch_concurrency() -> usize {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            page_size: default_page_size(),
            anchor_batch: default_anchor_batch(),
            sync_interval_minutes: default_sync_interval(),
            sync_tick_minutes: default_sync_tick(),
            fetch_concurrency: default_fetch_concurrency(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Reads `config_path`, writing the defaults there first if it is missing.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save_to(config_path)?;
            config
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("feedflow")
            .join("config.toml")
    }

    fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(AppError::Config("page_size must be at least 1".into()));
        }
        if self.anchor_batch == 0 {
            return Err(AppError::Config("anchor_batch must be at least 1".into()));
        }
        Ok(())
    }

    pub fn paging_options(&self) -> PagingOptions {
        PagingOptions {
            page_size: self.page_size,
            anchor_batch: self.anchor_batch,
        }
    }

    pub fn sync_interval_ms(&self) -> i64 {
        i64::from(self.sync_interval_minutes) * 60 * 1000
    }
}
