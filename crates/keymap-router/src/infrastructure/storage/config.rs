//! TOML-based configuration persistence.
//!
//! Reads and writes the configuration at the platform-appropriate path:
//! - Windows:  `%APPDATA%\KeymapRouter\config.toml`
//! - Linux:    `~/.config/keymap-router/config.toml`
//! - macOS:    `~/Library/Application Support/KeymapRouter/config.toml`
//!
//! ```toml
//! default_keymap = "DEF"
//! poll_interval_ms = 250
//! start_with_system = true
//! pause_while_companion_running = true
//!
//! [[rules]]
//! process_name = "code.exe"
//! keymap = "DEV"
//! layer = "fn"
//! ```
//!
//! # Recovery
//!
//! [`TomlConfigRepository::load_or_create`] never fails because of the
//! file's content. A file that does not parse, or parses but does not
//! validate, is copied aside as `config.<stage>.<unix-secs>.invalid.toml`
//! and replaced with defaults. A valid file that is not in normalized form
//! (e.g. `keymap = "dev"`) is rewritten in place.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use keymap_router_core::domain::rules::{normalize, AppConfig, RawConfig, ValidationError};
use thiserror::Error;
use tracing::{debug, info, warn};

const CONFIG_FILE_NAME: &str = "config.toml";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The configuration parsed but failed validation.
    #[error("invalid configuration: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Source of the persisted configuration.
pub trait ConfigRepository: Send + Sync {
    /// Loads the configuration, creating or repairing the backing store as
    /// needed.
    ///
    /// # Errors
    ///
    /// Only [`ConfigError::NoPlatformConfigDir`]-style setup failures are
    /// returned; content problems are recovered from.
    fn load_or_create(&self) -> Result<AppConfig, ConfigError>;

    /// Validates and persists `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] without writing anything if `config`
    /// does not validate, or [`ConfigError::Io`] / [`ConfigError::Serialize`]
    /// if writing fails.
    fn save(&self, config: &AppConfig) -> Result<(), ConfigError>;
}

/// [`ConfigRepository`] backed by a single TOML file.
#[derive(Debug, Clone)]
pub struct TomlConfigRepository {
    path: PathBuf,
}

impl TomlConfigRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates a repository for the platform default config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoPlatformConfigDir`] when the base directory
    /// cannot be determined from the environment.
    pub fn at_default_location() -> Result<Self, ConfigError> {
        Ok(Self::new(config_file_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and validates the file without any recovery.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] (including not found),
    /// [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn load_strict(&self) -> Result<AppConfig, ConfigError> {
        let content = self.read()?;
        let raw: RawConfig = toml::from_str(&content)?;
        normalize(&raw).map_err(ConfigError::Invalid)
    }

    fn read(&self) -> Result<String, ConfigError> {
        std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, config: &AppConfig) -> Result<(), ConfigError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let content = render(config)?;
        std::fs::write(&self.path, content).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Writes defaults, logging instead of failing: the defaults are used in
    /// memory either way.
    fn write_defaults(&self) -> AppConfig {
        let defaults = AppConfig::default();
        if let Err(e) = self.write(&defaults) {
            warn!("could not write default config: {e}");
        }
        defaults
    }

    /// Copies the current file aside as `config.<stage>.<unix-secs>.invalid.toml`.
    fn back_up(&self, stage: &str) {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let backup = self
            .path
            .with_file_name(format!("config.{stage}.{secs}.invalid.toml"));

        match std::fs::copy(&self.path, &backup) {
            Ok(_) => warn!(backup = %backup.display(), "invalid config backed up"),
            Err(e) => warn!(backup = %backup.display(), "could not back up invalid config: {e}"),
        }
    }
}

impl ConfigRepository for TomlConfigRepository {
    fn load_or_create(&self) -> Result<AppConfig, ConfigError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no config found, writing defaults");
                return Ok(self.write_defaults());
            }
            Err(e) => {
                warn!(path = %self.path.display(), "could not read config, using defaults: {e}");
                return Ok(AppConfig::default());
            }
        };

        let raw: RawConfig = match toml::from_str(&content) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("config does not parse: {e}");
                self.back_up("parse");
                return Ok(self.write_defaults());
            }
        };

        let config = match normalize(&raw) {
            Ok(config) => config,
            Err(errors) => {
                warn!("config does not validate: {}", join_errors(&errors));
                self.back_up("validation");
                return Ok(self.write_defaults());
            }
        };

        match render(&config) {
            Ok(normalized) if normalized.trim() != content.trim() => {
                debug!(path = %self.path.display(), "rewriting config in normalized form");
                if let Err(e) = self.write(&config) {
                    warn!("could not rewrite normalized config: {e}");
                }
            }
            Ok(_) => {}
            Err(e) => warn!("could not render normalized config: {e}"),
        }

        Ok(config)
    }

    fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        let normalized = normalize(&RawConfig::from(config)).map_err(ConfigError::Invalid)?;
        self.write(&normalized)?;
        info!(path = %self.path.display(), "config saved");
        Ok(())
    }
}

fn render(config: &AppConfig) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(&RawConfig::from(config))?)
}

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("KeymapRouter"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("keymap-router"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("KeymapRouter")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use keymap_router_core::domain::rules::{Layer, ProcessRule};
    use tempfile::TempDir;

    fn repo_in(dir: &TempDir) -> TomlConfigRepository {
        TomlConfigRepository::new(dir.path().join(CONFIG_FILE_NAME))
    }

    fn backups(dir: &TempDir, stage: &str) -> Vec<PathBuf> {
        let prefix = format!("config.{stage}.");
        std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                let name = p.file_name().unwrap().to_string_lossy().into_owned();
                name.starts_with(&prefix) && name.ends_with(".invalid.toml")
            })
            .collect()
    }

    #[test]
    fn test_missing_file_writes_and_returns_defaults() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let repo = repo_in(&dir);

        // Act
        let config = repo.load_or_create().unwrap();

        // Assert
        assert_eq!(config, AppConfig::default());
        assert!(repo.path().exists());
        assert_eq!(repo.load_strict().unwrap(), AppConfig::default());
    }

    #[test]
    fn test_missing_parent_directory_is_created() {
        let dir = TempDir::new().unwrap();
        let repo = TomlConfigRepository::new(dir.path().join("nested").join(CONFIG_FILE_NAME));

        repo.load_or_create().unwrap();

        assert!(repo.path().exists());
    }

    #[test]
    fn test_unparseable_file_is_backed_up_and_replaced() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let repo = repo_in(&dir);
        std::fs::write(repo.path(), "[[[ not valid toml").unwrap();

        // Act
        let config = repo.load_or_create().unwrap();

        // Assert
        assert_eq!(config, AppConfig::default());
        let saved = backups(&dir, "parse");
        assert_eq!(saved.len(), 1);
        assert_eq!(std::fs::read_to_string(&saved[0]).unwrap(), "[[[ not valid toml");
        assert_eq!(repo.load_strict().unwrap(), AppConfig::default());
    }

    #[test]
    fn test_invalid_file_is_backed_up_and_replaced() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let repo = repo_in(&dir);
        std::fs::write(repo.path(), "poll_interval_ms = 5\n").unwrap();

        // Act
        let config = repo.load_or_create().unwrap();

        // Assert
        assert_eq!(config, AppConfig::default());
        assert_eq!(backups(&dir, "validation").len(), 1);
        assert!(backups(&dir, "parse").is_empty());
    }

    #[test]
    fn test_valid_file_is_rewritten_in_normalized_form() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let repo = repo_in(&dir);
        std::fs::write(
            repo.path(),
            r#"
default_keymap = " def "

[[rules]]
process_name = "/usr/bin/code"
keymap = "dev"
layer = "FN"
"#,
        )
        .unwrap();

        // Act
        let config = repo.load_or_create().unwrap();

        // Assert
        assert_eq!(config.default_keymap, "DEF");
        assert_eq!(
            config.rules,
            vec![ProcessRule {
                process_name: "code.exe".to_string(),
                keymap: "DEV".to_string(),
                layer: Layer::Fn,
            }]
        );
        let on_disk = std::fs::read_to_string(repo.path()).unwrap();
        assert!(on_disk.contains("keymap = \"DEV\""));
        assert!(on_disk.contains("process_name = \"code.exe\""));
        assert!(backups(&dir, "validation").is_empty());
    }

    #[test]
    fn test_normalized_file_is_left_untouched() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let repo = repo_in(&dir);
        repo.load_or_create().unwrap();
        let before = std::fs::read_to_string(repo.path()).unwrap();

        // Act
        repo.load_or_create().unwrap();

        // Assert
        assert_eq!(std::fs::read_to_string(repo.path()).unwrap(), before);
    }

    #[test]
    fn test_save_persists_normalized_config() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let repo = repo_in(&dir);
        let config = AppConfig {
            poll_interval_ms: 500,
            rules: vec![ProcessRule {
                process_name: "Slack".to_string(),
                keymap: "chat".to_string(),
                layer: Layer::Mod,
            }],
            ..AppConfig::default()
        };

        // Act
        repo.save(&config).unwrap();

        // Assert
        let loaded = repo.load_strict().unwrap();
        assert_eq!(loaded.poll_interval_ms, 500);
        assert_eq!(loaded.rules[0].process_name, "Slack.exe");
        assert_eq!(loaded.rules[0].keymap, "CHAT");
    }

    #[test]
    fn test_save_refuses_invalid_config() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let repo = repo_in(&dir);
        let config = AppConfig {
            default_keymap: String::new(),
            ..AppConfig::default()
        };

        // Act
        let result = repo.save(&config);

        // Assert
        assert!(matches!(result, Err(ConfigError::Invalid(ref errors)) if !errors.is_empty()));
        assert!(!repo.path().exists());
    }

    #[test]
    fn test_load_strict_reports_missing_file_as_io_error() {
        let dir = TempDir::new().unwrap();
        let repo = repo_in(&dir);

        assert!(matches!(repo.load_strict(), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_invalid_error_message_joins_all_errors() {
        let err = ConfigError::Invalid(vec![
            ValidationError::DefaultKeymapMissing,
            ValidationError::ProcessNameMissing { index: 0 },
        ]);

        let message = err.to_string();

        assert!(message.contains("defaultKeymap is required"));
        assert!(message.contains(" | "));
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with(CONFIG_FILE_NAME), "got {path:?}");
        }
        // NoPlatformConfigDir is acceptable in a stripped CI environment.
    }
}
