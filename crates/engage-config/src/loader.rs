use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use engage_core::{EngageError, Result};

use crate::schema::EngageConfig;

/// Loads and optionally hot-reloads the Engage configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<EngageConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > ENGAGE_CONFIG env > ~/.engage/engage.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("ENGAGE_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".engage")
            .join("engage.toml")
    }

    /// Load the config from disk, falling back to defaults when the file is absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::parse_file(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            EngageConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        // Log warnings, fail on errors
        let warnings = config.validate().map_err(EngageError::Config)?;
        for w in &warnings {
            warn!("{}", w);
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Wrap an already-built config (tests, embedding).
    pub fn from_config(config: EngageConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            config_path: PathBuf::new(),
        }
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> EngageConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<EngageConfig>> {
        Arc::clone(&self.config)
    }

    /// Path being watched.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn parse_file(path: &Path) -> Result<EngageConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<EngageConfig>(&raw).map_err(|e| {
            EngageError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply env var overrides (ENGAGE_LOG_LEVEL, ENGAGE_DB_PATH, etc.)
    pub fn apply_env_overrides(mut config: EngageConfig) -> EngageConfig {
        if let Ok(v) = std::env::var("ENGAGE_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("ENGAGE_DB_PATH") {
            config.memory.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ENGAGE_CYCLE_INTERVAL") {
            if let Ok(secs) = v.parse::<u64>() {
                config.cycle.interval_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("ENGAGE_INBOX_DIR") {
            config.adapters.inbox_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ENGAGE_GENERATOR_URL") {
            config.adapters.generator_url = Some(v);
        }
        // Config file takes priority for the key, env is the fallback.
        if config.adapters.generator_api_key.is_none() {
            if let Ok(v) = std::env::var("ENGAGE_GENERATOR_API_KEY") {
                config.adapters.generator_api_key = Some(v);
            }
        }
        config
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> Result<()> {
        if !self.config_path.exists() {
            return Err(EngageError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::parse_file(&self.config_path)?);
        new_config.validate().map_err(EngageError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    /// Start a background file watcher that swaps in the new config when the file changes.
    /// The returned watcher must be kept alive for watching to continue.
    pub fn watch(&self) -> Result<notify::RecommendedWatcher> {
        let config = Arc::clone(&self.config);
        let config_path = self.config_path.clone();

        info!(?config_path, "starting config file watcher");

        let path_for_event = config_path.clone();
        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<NotifyEvent, notify::Error>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "file watcher error");
                        return;
                    }
                };
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                if !event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == path_for_event.file_name())
                {
                    return;
                }

                info!("config file changed, reloading");
                match Self::parse_file(&path_for_event) {
                    Ok(new_config) => {
                        let new_config = Self::apply_env_overrides(new_config);
                        if let Err(e) = new_config.validate() {
                            warn!(error = %e, "config file has errors, keeping current config");
                            return;
                        }
                        *config.write() = new_config;
                        info!("configuration hot-reloaded successfully");
                    }
                    Err(e) => {
                        warn!(error = %e, "config file has errors, keeping current config");
                    }
                }
            },
        )
        .map_err(|e| EngageError::Config(format!("failed to create file watcher: {}", e)))?;

        // Watch the parent directory (some editors create temp files + rename)
        let watch_path = self.config_path.parent().unwrap_or(Path::new("."));
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| EngageError::Config(format!("failed to watch config directory: {}", e)))?;

        Ok(watcher)
    }
}
