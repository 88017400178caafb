//! Configuration management.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable overriding the database location.
pub const DB_PATH_ENV: &str = "KVTREE_DB_PATH";

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Path to the database file.
    pub db_path: PathBuf,
    /// How long to wait for another process's lock, in milliseconds.
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    pub journal_mode: String,
    /// `SQLite` synchronous mode.
    pub synchronous: String,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Default filter directive when neither `KVTREE_LOG` nor `RUST_LOG` is set.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, multi-line.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format string. Unknown values fall back to [`LogFormat::Pretty`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Database path.
    pub db_path: Option<String>,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: Option<u64>,
    /// Journal mode.
    pub journal_mode: Option<String>,
    /// Synchronous mode.
    pub synchronous: Option<String>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLogging {
    /// Filter directive.
    pub level: Option<String>,
    /// `"pretty"` or `"json"`.
    pub format: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: Self::default_db_path(),
            busy_timeout_ms: 5000,
            journal_mode: "WAL".to_string(),
            synchronous: "NORMAL".to_string(),
            logging: LoggingSettings::default(),
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default database location: `<data_local_dir>/kvtree/kvtree.db`, or
    /// `./kvtree.db` when no home directory can be determined.
    #[must_use]
    pub fn default_db_path() -> PathBuf {
        directories::BaseDirs::new().map_or_else(
            || PathBuf::from("kvtree.db"),
            |dirs| dirs.data_local_dir().join("kvtree").join("kvtree.db"),
        )
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::InvalidInput(format!("cannot read config {}: {e}", path.display()))
        })?;

        let file: ConfigFile = toml::from_str(&contents).map_err(|e| {
            crate::Error::InvalidInput(format!("cannot parse config {}: {e}", path.display()))
        })?;

        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Looks for `kvtree/config.toml` in the platform config directory and
    /// returns defaults if it is missing or unreadable.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let platform_config = base_dirs.config_dir().join("kvtree").join("config.toml");
        if platform_config.exists() {
            match Self::load_from_file(&platform_config) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(
                    path = %platform_config.display(),
                    error = %e,
                    "Ignoring unreadable config file"
                ),
            }
        }

        Self::default()
    }

    /// Applies environment overrides (`KVTREE_DB_PATH`).
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.apply_env(|key| std::env::var(key).ok())
    }

    fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(path) = lookup(DB_PATH_ENV).filter(|p| !p.is_empty()) {
            self.db_path = PathBuf::from(path);
        }
        self
    }

    /// Sets the database path.
    #[must_use]
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(db_path) = file.db_path {
            config.db_path = PathBuf::from(db_path);
        }
        if let Some(busy_timeout_ms) = file.busy_timeout_ms {
            config.busy_timeout_ms = busy_timeout_ms;
        }
        if let Some(journal_mode) = file.journal_mode {
            config.journal_mode = journal_mode;
        }
        if let Some(synchronous) = file.synchronous {
            config.synchronous = synchronous;
        }
        if let Some(logging) = file.logging {
            if let Some(level) = logging.level {
                config.logging.level = level;
            }
            if let Some(format) = logging.format {
                config.logging.format = LogFormat::parse(&format);
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.busy_timeout_ms, 5000);
        assert_eq!(config.journal_mode, "WAL");
        assert_eq!(config.synchronous, "NORMAL");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.db_path.ends_with("kvtree.db"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
db_path = "/var/lib/kvtree/settings.db"
busy_timeout_ms = 250
synchronous = "FULL"

[logging]
level = "debug"
format = "json"
"#
        )
        .unwrap();

        let config = StoreConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/var/lib/kvtree/settings.db"));
        assert_eq!(config.busy_timeout_ms, 250);
        assert_eq!(config.synchronous, "FULL");
        assert_eq!(config.journal_mode, "WAL");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_from_file_errors() {
        let missing = StoreConfig::load_from_file(Path::new("/nonexistent/kvtree.toml"));
        assert!(matches!(missing, Err(crate::Error::InvalidInput(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "busy_timeout_ms = \"soon\"").unwrap();
        let bad = StoreConfig::load_from_file(file.path());
        assert!(matches!(bad, Err(crate::Error::InvalidInput(_))));
    }

    #[test]
    fn test_env_override() {
        let config = StoreConfig::default().apply_env(|key| {
            (key == DB_PATH_ENV).then(|| "/tmp/override.db".to_string())
        });
        assert_eq!(config.db_path, PathBuf::from("/tmp/override.db"));

        let untouched = StoreConfig::default().with_db_path("a.db").apply_env(|_| Some(String::new()));
        assert_eq!(untouched.db_path, PathBuf::from("a.db"));
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("whatever"), LogFormat::Pretty);
    }
}
