use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

// Define error types for config loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to acquire lock: {0}")]
    LockError(String),
}

// Result type alias for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Name of the configuration file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

// Config structs for config.toml
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Paths {
    pub source_directory: String,
    pub output_directory: String,
    pub processed_directory: String,
    pub failed_directory: String,
    pub library_path: String,
    pub log_directory: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Conversion {
    /// Requested quality, 0 to 100.
    pub quality: u8,
    pub image_target_extension: String,
    pub video_target_codec: String,
    pub video_output_suffix: String,
    pub video_output_extension: String,
    pub software_preset: String,
    pub audio_codec: String,
    pub video_tag: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Pools {
    pub workers: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Import {
    pub max_attempts: u32,
    pub base_retry_delay_ms: u64,
    /// Recovery runs after this many failed primary attempts.
    pub recovery_after_attempt: u32,
    pub max_restarts: u32,
    /// Periodic restart every N successful imports, 0 disables it.
    pub imports_per_restart: u64,
    pub stable_success_watermark: u64,
    pub quit_settle_secs: u64,
    pub launch_settle_secs: u64,
    pub application_name: String,
    pub fallback_enabled: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Timeouts {
    pub metadata_secs: u64,
    pub probe_secs: u64,
    pub transcode_secs: u64,
    pub import_secs: u64,
    pub lifecycle_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Duplicates {
    pub enabled: bool,
    pub originals_subdirectory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_file: Option<String>,
    pub chunk_size: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Logging {
    pub log_level: String,
    pub log_format: String,
    pub log_to_terminal: bool,
    pub log_to_file: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub paths: Paths,
    pub conversion: Conversion,
    pub pools: Pools,
    pub import: Import,
    pub timeouts: Timeouts,
    pub duplicates: Duplicates,
    pub logging: Logging,
}

// Default implementation for AppConfig
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: Paths {
                source_directory: "./import".to_string(),
                output_directory: "./converted".to_string(),
                processed_directory: "./processed_originals".to_string(),
                failed_directory: "./failed_imports".to_string(),
                library_path: "~/Pictures/Photos Library.photoslibrary".to_string(),
                log_directory: "./logs".to_string(),
            },
            conversion: Conversion {
                quality: 90,
                image_target_extension: "heic".to_string(),
                video_target_codec: "hevc".to_string(),
                video_output_suffix: "_hevc".to_string(),
                video_output_extension: "mp4".to_string(),
                software_preset: "medium".to_string(),
                audio_codec: "aac".to_string(),
                video_tag: "hvc1".to_string(),
            },
            pools: Pools {
                workers: 4,
            },
            import: Import {
                max_attempts: 3,
                base_retry_delay_ms: 1000,
                recovery_after_attempt: 2,
                max_restarts: 100,
                imports_per_restart: 1500,
                stable_success_watermark: 3000,
                quit_settle_secs: 2,
                launch_settle_secs: 5,
                application_name: "Photos".to_string(),
                fallback_enabled: true,
            },
            timeouts: Timeouts {
                metadata_secs: 60,
                probe_secs: 600,
                transcode_secs: 3600,
                import_secs: 300,
                lifecycle_secs: 60,
            },
            duplicates: Duplicates {
                enabled: true,
                originals_subdirectory: "originals".to_string(),
                cache_file: None,
                chunk_size: 64 * 1024,
            },
            logging: Logging {
                log_level: "info".to_string(),
                log_format: "line".to_string(),
                log_to_terminal: true,
                log_to_file: true,
            },
        }
    }
}

impl AppConfig {
    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.conversion.quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "conversion.quality must be between 0 and 100, got {}",
                self.conversion.quality
            )));
        }
        if self.pools.workers == 0 {
            return Err(ConfigError::Invalid("pools.workers must be at least 1".to_string()));
        }
        if self.import.max_attempts == 0 {
            return Err(ConfigError::Invalid("import.max_attempts must be at least 1".to_string()));
        }
        if self.duplicates.chunk_size == 0 {
            return Err(ConfigError::Invalid("duplicates.chunk_size must be non-zero".to_string()));
        }
        match self.logging.log_format.as_str() {
            "json" | "line" => Ok(()),
            other => Err(ConfigError::Invalid(format!(
                "logging.log_format must be \"json\" or \"line\", got \"{}\"",
                other
            ))),
        }
    }

    /// Destination library location with a leading `~` expanded.
    pub fn library_path(&self) -> PathBuf {
        expand_home(&self.paths.library_path)
    }

    /// Folder holding the library's stored originals.
    pub fn library_originals(&self) -> PathBuf {
        self.library_path().join(&self.duplicates.originals_subdirectory)
    }
}

/// Expands a leading `~` against the current user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    match path.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}

// Config manager to handle the configuration file
pub struct ConfigManager {
    app_config: Arc<RwLock<AppConfig>>,
    config_dir: PathBuf,
}

impl ConfigManager {
    // Create a new ConfigManager instance
    pub fn new(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        // Create the directory if it doesn't exist
        if !config_dir.exists() {
            info!("Creating config directory: {}", config_dir.display());
            fs::create_dir_all(&config_dir)?;
        }

        let app_config = Self::load_app_config(&config_dir)?;

        let manager = Self {
            app_config: Arc::new(RwLock::new(app_config)),
            config_dir,
        };

        manager.create_default_config()?;

        Ok(manager)
    }

    // Load app config from config.toml
    fn load_app_config(config_dir: &Path) -> ConfigResult<AppConfig> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            warn!("Config file not found: {}", config_path.display());
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&config_path)?;
        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                error!("Failed to parse {}: {}", CONFIG_FILE_NAME, e);
                info!("Backing up old config and creating new one with default values");

                // Backup the old config file
                if let Err(backup_err) =
                    fs::rename(&config_path, config_path.with_extension("toml.backup"))
                {
                    warn!("Failed to backup old config: {}", backup_err);
                }

                let default_config = AppConfig::default();
                if let Ok(toml_string) = toml::to_string_pretty(&default_config) {
                    if let Err(write_err) = fs::write(&config_path, toml_string) {
                        error!("Failed to write new config file: {}", write_err);
                    } else {
                        info!("Created new {} with default values", CONFIG_FILE_NAME);
                    }
                }

                Ok(default_config)
            }
        }
    }

    // Get app config
    pub fn get_app_config(&self) -> ConfigResult<AppConfig> {
        self.app_config
            .read()
            .map_err(|e| ConfigError::LockError(e.to_string()))
            .map(|config| config.clone())
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    // Write config.toml with defaults if it doesn't exist
    fn create_default_config(&self) -> ConfigResult<()> {
        let config_path = self.config_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            let default_config = AppConfig::default();
            let toml_string = toml::to_string_pretty(&default_config)
                .map_err(|e| ConfigError::TomlSer(e.to_string()))?;
            fs::write(&config_path, toml_string)?;

            let mut app_config = self.app_config
                .write()
                .map_err(|e| ConfigError::LockError(e.to_string()))?;
            *app_config = default_config;
        }

        Ok(())
    }
}
