//! src/config.rs
//! ============================================================================
//! # Config: Runtime Configuration Loader and Saver
//!
//! All tunables of the application runtime: the default route and router
//! target, lifecycle retry parameters, include depth, template cache size,
//! notification sink, asset locations and logging. Settings are stored as TOML
//! at the cross-platform config path from [`directories`](https://docs.rs/directories),
//! or loaded from an explicit file.
//!
//! Every section is `#[serde(default)]` so partial files are valid.
//!
//! ## Example
//! ```rust,ignore
//! let config = Config::load().await?;
//! config.save().await?;
//! ```

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use tokio::fs as TokioFs;

use crate::error::{AppError, AppResult};

/// Router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Route assigned when the navigation address is empty
    pub default_route: String,

    /// Id of the element whose content is swapped on navigation
    pub target_id: String,

    /// Delay before the new view's handler runs, letting the subtree settle
    #[serde(with = "humantime_serde")]
    pub stabilize_delay: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_route: "views/officine/officine.html".to_string(),
            target_id: "router".to_string(),
            stabilize_delay: Duration::from_millis(50),
        }
    }
}

/// View lifecycle readiness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Presence checks before a module is reported as never ready
    pub max_attempts: u32,

    /// Backoff unit; attempt `n` waits `n * base_delay`
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

/// Fragment inclusion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IncludeConfig {
    /// Attribute naming the URL to splice in
    pub attribute: String,

    /// Nested passes allowed before resolution is abandoned
    pub max_depth: u32,
}

impl Default for IncludeConfig {
    fn default() -> Self {
        Self {
            attribute: "data-include".to_string(),
            max_depth: 5,
        }
    }
}

/// Template cache settings. Entries never expire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateCacheConfig {
    /// Maximum number of cached fragments
    pub max_capacity: u64,

    /// Enable cache statistics
    pub enable_stats: bool,
}

impl Default for TemplateCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 1024,
            enable_stats: true,
        }
    }
}

/// Notification sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Id of the element that receives status messages
    pub sink_id: String,

    /// How long a reporter waits for the sink element to exist
    #[serde(with = "humantime_serde")]
    pub ready_timeout: Duration,

    /// Re-check interval while waiting for the sink element
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Notifications kept in memory
    pub history_size: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            sink_id: "codexGlobal".to_string(),
            ready_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(50),
            history_size: 64,
        }
    }
}

/// Where markup fragments come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Local asset tree served by the static fetcher
    pub root_dir: PathBuf,

    /// Remote origin; when set the HTTP fetcher is used
    pub base_url: Option<String>,

    /// Shell document loaded at boot
    pub index: String,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            base_url: None,
            index: "index.html".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    pub log_dir: PathBuf,

    pub file_prefix: String,

    /// Mirror log lines to stderr
    pub stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            file_prefix: "officine".to_string(),
            stderr: true,
        }
    }
}

/// Main configuration struct for the runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub router: RouterConfig,

    pub lifecycle: LifecycleConfig,

    pub includes: IncludeConfig,

    pub templates: TemplateCacheConfig,

    pub notifications: NotificationConfig,

    pub assets: AssetConfig,

    pub logging: LoggingConfig,
}

impl Config {
    /// Loads config from the TOML file in the app config dir, or returns defaults.
    ///
    /// The config is expected at `$XDG_CONFIG_HOME/Officine/config.toml`
    /// (Linux), or equivalent on Windows/macOS. A default file is written
    /// when none exists.
    pub async fn load() -> AppResult<Self> {
        let path: PathBuf = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path).await
        } else {
            info!(
                "No config file found at {}, using default configuration. Creating it now.",
                path.display()
            );

            let default_config = Self::default();
            default_config.save_to(&path).await?;

            Ok(default_config)
        }
    }

    /// Loads config from an explicit TOML file.
    pub async fn load_from(path: &Path) -> AppResult<Self> {
        info!("Loading config from {}", path.display());
        let text: String =
            TokioFs::read_to_string(path)
                .await
                .map_err(|source| AppError::ConfigIo {
                    path: path.to_path_buf(),
                    source,
                })?;

        Self::from_toml_str(&text)
    }

    /// Parses config from TOML text.
    pub fn from_toml_str(text: &str) -> AppResult<Self> {
        let cfg: Self = toml::from_str(text)?;
        Ok(cfg)
    }

    /// Saves config to the TOML file in the app config dir.
    pub async fn save(&self) -> AppResult<()> {
        let path: PathBuf = Self::config_path()?;
        self.save_to(&path).await
    }

    /// Saves config to an explicit path, creating parent directories.
    pub async fn save_to(&self, path: &Path) -> AppResult<()> {
        info!("Saving config to {}", path.display());

        if let Some(parent) = path.parent() {
            TokioFs::create_dir_all(parent).await?;
        }

        let toml_str: String = toml::to_string_pretty(self)?;
        TokioFs::write(path, toml_str).await?;

        Ok(())
    }

    /// Returns the canonical config file path using `directories::ProjectDirs`.
    pub fn config_path() -> AppResult<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Returns the config directory (without filename).
    pub fn config_dir() -> AppResult<PathBuf> {
        let proj_dirs = ProjectDirs::from("fr", "officine", "Officine")
            .ok_or_else(|| AppError::Other("Could not determine config directory.".into()))?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_runtime_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.router.default_route, "views/officine/officine.html");
        assert_eq!(cfg.router.target_id, "router");
        assert_eq!(cfg.lifecycle.max_attempts, 3);
        assert_eq!(cfg.lifecycle.base_delay, Duration::from_millis(100));
        assert_eq!(cfg.includes.max_depth, 5);
        assert_eq!(cfg.notifications.sink_id, "codexGlobal");
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let cfg = Config::from_toml_str(
            r#"
            [router]
            default_route = "views/planning/planning.html"

            [lifecycle]
            base_delay = "250ms"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.router.default_route, "views/planning/planning.html");
        assert_eq!(cfg.router.target_id, "router");
        assert_eq!(cfg.lifecycle.base_delay, Duration::from_millis(250));
        assert_eq!(cfg.lifecycle.max_attempts, 3);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = Config::from_toml_str("[router\ndefault_route = 1");
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.includes.max_depth = 2;
        cfg.save_to(&path).await.unwrap();

        let loaded = Config::load_from(&path).await.unwrap();
        assert_eq!(loaded.includes.max_depth, 2);
    }
}
