//! Load and validate runtime configuration.

use anyhow::Context;
use directories::ProjectDirs;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

use crate::cache::{CacheStore, SNAPSHOT_FILE};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheCfg {
    pub dir: Option<PathBuf>, // defaults to the platform cache dir
    pub snapshot_file: String,
    pub default_table: String,
}

impl Default for CacheCfg {
    fn default() -> Self {
        Self {
            dir: None,
            snapshot_file: SNAPSHOT_FILE.to_string(),
            default_table: "orders.csv".to_string(),
        }
    }
}

impl CacheCfg {
    pub fn resolved_dir(&self) -> PathBuf {
        if let Some(dir) = &self.dir {
            return dir.clone();
        }
        ProjectDirs::from("", "", "options-history")
            .map(|p| p.cache_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".cache"))
    }

    pub fn store(&self) -> CacheStore {
        CacheStore::new(self.resolved_dir()).with_snapshot_file(self.snapshot_file.clone())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RobinhoodCfg {
    pub base_url: String,
    pub client_id: String,
    pub device_token: Option<String>, // stable per install avoids device challenges
    pub timeout_sec: u64,
    pub mfa_prompt: bool,
}

impl Default for RobinhoodCfg {
    fn default() -> Self {
        Self {
            base_url: "https://api.robinhood.com".to_string(),
            client_id: "c82SH0WZOsabOXGP2sxqcj34FxkvfnWRZBKlBjFS".to_string(),
            device_token: None,
            timeout_sec: 30,
            mfa_prompt: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheCfg,
    pub robinhood: RobinhoodCfg,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Self =
            serde_yaml::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Like `load`, but a missing file means defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.robinhood.timeout_sec == 0 {
            anyhow::bail!("robinhood.timeout_sec must be greater than zero");
        }
        if self.cache.snapshot_file.trim().is_empty() {
            anyhow::bail!("cache.snapshot_file must not be empty");
        }
        Ok(())
    }
}
