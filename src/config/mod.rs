// SPDX-License-Identifier: MIT

//! Configuration management for formdrop
//! Supports INI files with environment variable overrides

pub mod ini_parser;

use crate::error::StorageError;
use crate::filter::ExtensionFilter;
use crate::multipart::MultipartConfig;
use crate::storage::{DiskStorage, MemoryStorage};
use crate::upload::{Limits, UploadHandler, UploadSchema};
use crate::utils::format_bytes;
use ini_parser::{IniConfig, parse_file_size, split_list};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_MAX_HEADERS_SIZE: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file specified but not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config at line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
    #[error("Invalid extension pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("Storage setup failed: {0}")]
    Storage(#[from] StorageError),
}

impl ConfigError {
    pub(crate) fn parse<S: Into<String>>(line: usize, message: S) -> Self {
        ConfigError::Parse {
            line,
            message: message.into(),
        }
    }

    fn invalid(key: &str, value: &str) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Where accepted files are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    #[default]
    Memory,
    Disk,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "disk" => Ok(StorageBackend::Disk),
            _ => Err(ConfigError::invalid("storage backend", value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub limits: Limits,
    pub backend: StorageBackend,
    /// Disk destination; the OS temp directory when unset
    pub destination: Option<PathBuf>,
    /// Glob patterns accepted by the extension filter; empty disables it
    pub allowed_extensions: Vec<String>,
    pub max_headers_size: usize,
    /// File the settings were read from, if any
    pub source: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            backend: StorageBackend::default(),
            destination: None,
            allowed_extensions: Vec::new(),
            max_headers_size: DEFAULT_MAX_HEADERS_SIZE,
            source: None,
        }
    }
}

/// Reads one layered value: ENV > INI > unset.
struct Layers<'a, E> {
    ini: &'a IniConfig,
    env: &'a E,
}

impl<E: Fn(&str) -> Option<String>> Layers<'_, E> {
    fn raw(&self, env_key: Option<&str>, section: &str, key: &str) -> Option<(String, String)> {
        if let Some(env_key) = env_key {
            if let Some(value) = (self.env)(env_key) {
                return Some((env_key.to_string(), value));
            }
        }
        self.ini
            .get_string(section, key)
            .map(|value| (format!("{section}.{key}"), value))
    }

    fn count(&self, env_key: Option<&str>, section: &str, key: &str) -> Result<Option<usize>, ConfigError> {
        self.raw(env_key, section, key)
            .map(|(name, value)| {
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::invalid(&name, &value))
            })
            .transpose()
    }

    fn size(&self, env_key: Option<&str>, section: &str, key: &str) -> Result<Option<u64>, ConfigError> {
        self.raw(env_key, section, key)
            .map(|(name, value)| parse_file_size(&value).ok_or_else(|| ConfigError::invalid(&name, &value)))
            .transpose()
    }
}

impl Config {
    /// Load configuration with precedence: ENV > INI file > Defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(explicit, |key| std::env::var(key).ok())
    }

    /// Same as [`Config::load`] with a custom environment lookup.
    pub fn load_with_env<E>(explicit: Option<&Path>, env: E) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let config_file = Self::find_config_file(explicit, &env)?;
        let ini = if let Some(path) = &config_file {
            log::info!("Loading configuration from: {}", path.display());
            IniConfig::load_file(path)?
        } else {
            log::debug!("No configuration file found, using defaults and environment");
            IniConfig::new()
        };

        let layers = Layers {
            ini: &ini,
            env: &env,
        };

        let limits = Limits {
            field_name_size: layers.count(None, "limits", "field_name_size")?,
            field_value_size: layers.size(Some("FORMDROP_FIELD_SIZE"), "limits", "field_value_size")?,
            field_count: layers.count(Some("FORMDROP_FIELD_COUNT"), "limits", "field_count")?,
            file_size: layers.size(Some("FORMDROP_FILE_SIZE"), "limits", "file_size")?,
            file_count: layers.count(Some("FORMDROP_FILE_COUNT"), "limits", "file_count")?,
            part_count: layers.count(Some("FORMDROP_PART_COUNT"), "limits", "part_count")?,
            header_pairs: layers.count(None, "limits", "header_pairs")?,
        };

        let backend = match layers.raw(Some("FORMDROP_STORAGE"), "storage", "backend") {
            Some((_, value)) => value.parse()?,
            None => StorageBackend::default(),
        };

        let destination = layers
            .raw(Some("FORMDROP_DESTINATION"), "storage", "destination")
            .map(|(_, value)| PathBuf::from(value.trim()))
            .filter(|path| !path.as_os_str().is_empty());

        let allowed_extensions = match env("FORMDROP_ALLOWED_EXTENSIONS") {
            Some(value) => split_list(&value),
            None => ini.get_list("filter", "allowed_extensions"),
        };

        let max_headers_size = match layers.size(None, "multipart", "max_headers_size")? {
            Some(size) => usize::try_from(size)
                .map_err(|_| ConfigError::invalid("multipart.max_headers_size", &size.to_string()))?,
            None => DEFAULT_MAX_HEADERS_SIZE,
        };

        Ok(Self {
            limits,
            backend,
            destination,
            allowed_extensions,
            max_headers_size,
            source: config_file,
        })
    }

    /// Find configuration file in order of preference
    fn find_config_file<E>(explicit: Option<&Path>, env: &E) -> Result<Option<PathBuf>, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        // 1. Explicitly requested file must exist
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        // 2. Current directory
        for candidate in ["formdrop.ini", "formdrop.conf"] {
            let path = PathBuf::from(candidate);
            if path.exists() {
                return Ok(Some(path));
            }
        }

        // 3. User config directory (~/.config/formdrop/config.ini)
        if let Some(home_dir) = env("HOME") {
            let user_config = Path::new(&home_dir)
                .join(".config")
                .join("formdrop")
                .join("config.ini");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // 4. System config (Unix-like systems)
        #[cfg(unix)]
        {
            let system_config = PathBuf::from("/etc/formdrop/config.ini");
            if system_config.exists() {
                return Ok(Some(system_config));
            }
        }

        Ok(None)
    }

    /// Build an upload handler for `schema` from these settings.
    pub fn build_handler(&self, schema: UploadSchema) -> Result<UploadHandler, ConfigError> {
        let handler = match self.backend {
            StorageBackend::Memory => UploadHandler::new(MemoryStorage::new(), schema),
            StorageBackend::Disk => {
                let storage = match &self.destination {
                    Some(dir) => DiskStorage::in_dir(dir)?,
                    None => DiskStorage::temp()?,
                };
                UploadHandler::new(storage, schema)
            }
        };

        let mut handler = handler
            .with_limits(self.limits.clone())
            .with_multipart_config(MultipartConfig {
                max_headers_size: self.max_headers_size,
                ..MultipartConfig::default()
            });

        if !self.allowed_extensions.is_empty() {
            handler = handler.with_filter(ExtensionFilter::new(&self.allowed_extensions)?);
        }

        Ok(handler)
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        fn count(value: Option<usize>) -> String {
            value.map_or_else(|| "unlimited".to_string(), |v| v.to_string())
        }
        fn size(value: Option<u64>) -> String {
            value.map_or_else(|| "unlimited".to_string(), format_bytes)
        }

        log::info!("Configuration Summary:");
        if let Some(source) = &self.source {
            log::info!("  Source: {}", source.display());
        }
        log::info!("  Storage: {:?}", self.backend);
        if self.backend == StorageBackend::Disk {
            let destination = self.destination.clone().unwrap_or_else(std::env::temp_dir);
            log::info!("  Destination: {}", destination.display());
        }
        log::info!("  Max File Size: {}", size(self.limits.file_size));
        log::info!("  Max Files: {}", count(self.limits.file_count));
        log::info!("  Max Field Size: {}", size(self.limits.field_value_size));
        log::info!("  Max Fields: {}", count(self.limits.field_count));
        log::info!("  Max Parts: {}", count(self.limits.part_count));
        log::info!("  Max Header Block: {}", format_bytes(self.max_headers_size as u64));
        if self.allowed_extensions.is_empty() {
            log::info!("  Allowed Extensions: any");
        } else {
            log::info!("  Allowed Extensions: {:?}", self.allowed_extensions);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn no_env(_key: &str) -> Option<String> {
        None
    }

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("test.ini");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_config_load_with_ini_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(
            &temp_dir,
            r#"
[limits]
field_name_size = 100
field_value_size = 1MB
field_count = 20
file_size = 1.5GB
file_count = 5
part_count = 40
header_pairs = 10

[storage]
backend = disk
destination = /var/tmp/uploads

[filter]
allowed_extensions = *.pdf,*.doc

[multipart]
max_headers_size = 16KB
"#,
        );

        let config = Config::load_with_env(Some(&path), no_env).unwrap();
        assert_eq!(config.limits.field_name_size, Some(100));
        assert_eq!(config.limits.field_value_size, Some(1024 * 1024));
        assert_eq!(config.limits.field_count, Some(20));
        assert_eq!(
            config.limits.file_size,
            Some((1.5 * 1024.0 * 1024.0 * 1024.0) as u64)
        );
        assert_eq!(config.limits.file_count, Some(5));
        assert_eq!(config.limits.part_count, Some(40));
        assert_eq!(config.limits.header_pairs, Some(10));
        assert_eq!(config.backend, StorageBackend::Disk);
        assert_eq!(config.destination, Some(PathBuf::from("/var/tmp/uploads")));
        assert_eq!(config.allowed_extensions, vec!["*.pdf", "*.doc"]);
        assert_eq!(config.max_headers_size, 16 * 1024);
        assert_eq!(config.source, Some(path));
    }

    #[test]
    fn test_env_overrides_ini() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(
            &temp_dir,
            r#"
[limits]
file_size = 10MB
file_count = 5

[storage]
backend = disk
"#,
        );

        let env: HashMap<&str, &str> = [
            ("FORMDROP_FILE_SIZE", "2KB"),
            ("FORMDROP_STORAGE", "memory"),
            ("FORMDROP_ALLOWED_EXTENSIONS", "*.txt, *.zip"),
        ]
        .into_iter()
        .collect();

        let config =
            Config::load_with_env(Some(&path), |key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.limits.file_size, Some(2048));
        assert_eq!(config.limits.file_count, Some(5));
        assert_eq!(config.backend, StorageBackend::Memory);
        assert_eq!(config.allowed_extensions, vec!["*.txt", "*.zip"]);
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(&temp_dir, "[limits]\nfile_count = many\n");
        let err = Config::load_with_env(Some(&path), no_env).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "limits.file_count"));

        let path = write_config(&temp_dir, "[storage]\nbackend = s3\n");
        assert!(Config::load_with_env(Some(&path), no_env).is_err());

        let err = Config::load_with_env(Some(&path), |key| {
            (key == "FORMDROP_FILE_SIZE").then(|| "huge".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("FORMDROP_FILE_SIZE"));
    }

    #[test]
    fn test_config_file_discovery_nonexistent() {
        let result = Config::load_with_env(Some(Path::new("/nonexistent/path.ini")), no_env);
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
        assert!(err.to_string().contains("Config file specified but not found"));
    }

    #[test]
    fn test_user_config_directory() {
        let home = TempDir::new().unwrap();
        let config_dir = home.path().join(".config").join("formdrop");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("config.ini"), "[limits]\npart_count = 3\n").unwrap();

        let home_path = home.path().to_string_lossy().to_string();
        let config = Config::load_with_env(None, |key| (key == "HOME").then(|| home_path.clone()));

        // A formdrop.ini in the working directory would take precedence
        if !Path::new("formdrop.ini").exists() && !Path::new("formdrop.conf").exists() {
            assert_eq!(config.unwrap().limits.part_count, Some(3));
        }
    }

    #[test]
    fn test_build_handler() {
        let temp_dir = TempDir::new().unwrap();
        let uploads = temp_dir.path().join("uploads");
        let config = Config {
            backend: StorageBackend::Disk,
            destination: Some(uploads.clone()),
            allowed_extensions: vec!["*.txt".to_string()],
            limits: Limits::unbounded().with_file_count(2),
            ..Config::default()
        };

        let handler = config.build_handler(UploadSchema::Any).unwrap();
        assert!(uploads.is_dir());
        assert_eq!(handler.limits().file_count, Some(2));
        assert_eq!(handler.schema(), &UploadSchema::Any);

        let bad = Config {
            allowed_extensions: vec!["[".to_string()],
            ..Config::default()
        };
        assert!(matches!(
            bad.build_handler(UploadSchema::Any),
            Err(ConfigError::Pattern(_))
        ));
    }

    #[test]
    fn test_config_log_summary() {
        let config = Config::default();
        // This should not panic
        config.log_summary();
    }
}
