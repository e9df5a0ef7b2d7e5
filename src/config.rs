//! Configuration for the logging pipeline.
//!
//! A config names a root level, a list of noisy targets to suppress, and a
//! set of handlers. It can be loaded from TOML, JSON or YAML; without a file
//! the built-in default is used (see [`generate_default_config`]).

use crate::error::{Error, Result};
use crate::record::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::filter::Directive;

/// Env var replacing the root level
pub const ENV_LEVEL: &str = "LOGCATCH_LEVEL";

/// Env var replacing every file handler's filename
pub const ENV_LOG_PATH: &str = "LOGCATCH_LOG_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleStream {
    #[default]
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// How often a file handler starts a new file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    Never,
    Minutely,
    Hourly,
    #[default]
    Daily,
}

/// One output of the logging pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HandlerConfig {
    Console {
        #[serde(default)]
        stream: ConsoleStream,
        #[serde(default = "default_console_level")]
        level: Severity,
        #[serde(default)]
        format: LogFormat,
        #[serde(default = "default_ansi")]
        ansi: bool,
    },
    File {
        filename: PathBuf,
        #[serde(default = "default_file_level")]
        level: Severity,
        #[serde(default)]
        format: LogFormat,
        #[serde(default)]
        rotation: Rotation,
    },
}

fn default_console_level() -> Severity {
    Severity::Info
}

fn default_file_level() -> Severity {
    Severity::Debug
}

fn default_ansi() -> bool {
    true
}

impl HandlerConfig {
    pub fn level(&self) -> Severity {
        match self {
            HandlerConfig::Console { level, .. } | HandlerConfig::File { level, .. } => *level,
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum severity for every handler
    pub level: Severity,
    /// Targets only logged at or above the suppression level
    pub suppress: Vec<String>,
    pub handlers: BTreeMap<String, HandlerConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        let mut handlers = BTreeMap::new();
        handlers.insert(
            "console".to_string(),
            HandlerConfig::Console {
                stream: ConsoleStream::Stdout,
                level: Severity::Info,
                format: LogFormat::Text,
                ansi: true,
            },
        );
        handlers.insert(
            "file".to_string(),
            HandlerConfig::File {
                filename: PathBuf::from("logs").join("log.txt"),
                level: Severity::Debug,
                format: LogFormat::Text,
                rotation: Rotation::Daily,
            },
        );

        Self {
            level: Severity::Debug,
            suppress: Vec::new(),
            handlers,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

impl LogConfig {
    /// Load from `path`, or from the user config file if it exists, or
    /// fall back to the default.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }

        match Self::config_path() {
            Some(path) if path.is_file() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load a config file, picking the parser from its extension.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }
        if !path.is_file() {
            return Err(Error::NotAFile(path.to_path_buf()));
        }
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| Error::UnsupportedFormat(path.to_path_buf()))?;

        let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config = match format {
            ConfigFormat::Toml => toml::from_str(&contents)?,
            ConfigFormat::Json => serde_json::from_str(&contents)?,
            ConfigFormat::Yaml => serde_yaml::from_str(&contents)?,
        };

        tracing::debug!(path = %path.display(), "loaded logging config");
        Ok(config)
    }

    /// Get the config file path (~/.config/logcatch/config.toml)
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("logcatch").join("config.toml"))
    }

    /// Apply environment variable overrides.
    ///
    /// Returns the log path override from the environment, if any.
    pub fn apply_env_overrides(&mut self) -> Result<Option<PathBuf>> {
        self.apply_overrides_from(|key| env::var(key).ok())
    }

    fn apply_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<PathBuf>> {
        if let Some(level) = lookup(ENV_LEVEL).filter(|v| !v.trim().is_empty()) {
            self.level = level.parse()?;
        }

        Ok(lookup(ENV_LOG_PATH)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from))
    }

    /// Point every file handler at `log_path` (when given) and create the
    /// parent directories of every file handler.
    pub fn ensure_paths(&mut self, log_path: Option<&Path>) -> Result<()> {
        for handler in self.handlers.values_mut() {
            let HandlerConfig::File { filename, .. } = handler else {
                continue;
            };
            if let Some(path) = log_path {
                *filename = path.to_path_buf();
            }
            if let Some(parent) = filename.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
        }
        Ok(())
    }

    /// Filter directives: the root level, then one `target=level` entry per
    /// suppressed target.
    pub fn filter_directives(&self, suppress_below: Severity) -> Result<Vec<Directive>> {
        let mut directives = vec![parse_directive(directive_level(self.level))?];
        for target in &self.suppress {
            let target = target.trim();
            if target.is_empty() {
                continue;
            }
            directives.push(parse_directive(&format!(
                "{}={}",
                target,
                directive_level(suppress_below)
            ))?);
        }
        Ok(directives)
    }
}

fn directive_level(severity: Severity) -> &'static str {
    match severity {
        Severity::Debug => "debug",
        Severity::Info => "info",
        Severity::Warning => "warn",
        Severity::Error | Severity::Critical => "error",
    }
}

fn parse_directive(text: &str) -> Result<Directive> {
    text.parse::<Directive>()
        .map_err(|e| Error::InvalidDirective {
            directive: text.to_string(),
            message: e.to_string(),
        })
}

/// Generate default config as TOML string
pub fn generate_default_config() -> String {
    r#"# logcatch configuration
# Place this file at ~/.config/logcatch/config.toml
# (JSON and YAML files with the same structure are accepted too)

# Minimum level for every handler: debug, info, warning, error, critical
level = "debug"

# Targets that only log at warning or above
suppress = []

[handlers.console]
kind = "console"
stream = "stdout"   # stdout or stderr
level = "info"
format = "text"     # text or json
ansi = true

[handlers.file]
kind = "file"
filename = "logs/log.txt"
level = "debug"
format = "text"
rotation = "daily"  # never, minutely, hourly or daily

# Environment variable overrides:
# LOGCATCH_LEVEL=info           - Replace the root level
# LOGCATCH_LOG_PATH=/tmp/a.log  - Write every file handler to this path
"#
    .to_string()
}

/// Print the default config to stdout
pub fn print_default_config() {
    print!("{}", generate_default_config());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_generated_default_matches_default() {
        let parsed: LogConfig = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(parsed, LogConfig::default());
    }

    #[test]
    fn test_load_toml() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "log.toml",
            r#"
level = "info"
suppress = ["hyper", "h2"]

[handlers.errors]
kind = "console"
stream = "stderr"
level = "error"
"#,
        );

        let config = LogConfig::load_from_file(&path).unwrap();
        assert_eq!(config.level, Severity::Info);
        assert_eq!(config.suppress, vec!["hyper", "h2"]);
        assert_eq!(
            config.handlers["errors"],
            HandlerConfig::Console {
                stream: ConsoleStream::Stderr,
                level: Severity::Error,
                format: LogFormat::Text,
                ansi: true,
            }
        );
    }

    #[test]
    fn test_load_json_and_yaml() {
        let dir = TempDir::new().unwrap();
        let json = write(
            &dir,
            "log.json",
            r#"{"level": "warning", "handlers": {"f": {"kind": "file", "filename": "a.log", "format": "json"}}}"#,
        );
        let yaml = write(
            &dir,
            "log.YML",
            "level: WARN\nhandlers:\n  f:\n    kind: file\n    filename: a.log\n    format: json\n",
        );

        let from_json = LogConfig::load_from_file(&json).unwrap();
        let from_yaml = LogConfig::load_from_file(&yaml).unwrap();
        assert_eq!(from_json, from_yaml);
        assert_eq!(from_json.level, Severity::Warning);
        assert_eq!(
            from_json.handlers["f"],
            HandlerConfig::File {
                filename: PathBuf::from("a.log"),
                level: Severity::Debug,
                format: LogFormat::Json,
                rotation: Rotation::Daily,
            }
        );
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            LogConfig::load_from_file(&missing),
            Err(Error::ConfigNotFound(_))
        ));
        assert!(matches!(
            LogConfig::load_from_file(dir.path()),
            Err(Error::NotAFile(_))
        ));

        let ini = write(&dir, "log.ini", "level=debug");
        assert!(matches!(
            LogConfig::load_from_file(&ini),
            Err(Error::UnsupportedFormat(_))
        ));

        let bad_level = write(&dir, "bad.toml", "level = \"loud\"");
        assert!(matches!(
            LogConfig::load_from_file(&bad_level),
            Err(Error::Toml(_))
        ));

        let bad_json = write(&dir, "bad.json", "{");
        assert!(matches!(
            LogConfig::load_from_file(&bad_json),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_load_explicit_path_must_exist() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(LogConfig::load(Some(missing.as_path())).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [(ENV_LEVEL, "error"), (ENV_LOG_PATH, "/tmp/x.log")]
            .into_iter()
            .collect();
        let mut config = LogConfig::default();

        let path = config
            .apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.level, Severity::Error);
        assert_eq!(path, Some(PathBuf::from("/tmp/x.log")));
    }

    #[test]
    fn test_env_overrides_invalid_level() {
        let mut config = LogConfig::default();
        let result = config.apply_overrides_from(|key| {
            (key == ENV_LEVEL).then(|| "chatty".to_string())
        });
        assert!(matches!(result, Err(Error::InvalidLevel(_))));
    }

    #[test]
    fn test_env_overrides_absent() {
        let mut config = LogConfig::default();
        assert_eq!(config.apply_overrides_from(|_| None).unwrap(), None);
        assert_eq!(config, LogConfig::default());
    }

    #[test]
    fn test_ensure_paths_with_override() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested").join("deeper").join("app.log");
        let mut config = LogConfig::default();

        config.ensure_paths(Some(target.as_path())).unwrap();

        assert!(target.parent().unwrap().is_dir());
        match &config.handlers["file"] {
            HandlerConfig::File { filename, .. } => assert_eq!(filename, &target),
            other => panic!("unexpected handler {:?}", other),
        }
        assert!(matches!(
            config.handlers["console"],
            HandlerConfig::Console { .. }
        ));
    }

    #[test]
    fn test_filter_directives() {
        let mut config = LogConfig::default();
        config.level = Severity::Info;
        config.suppress = vec!["hyper".to_string(), " ".to_string(), "sqlx::query".to_string()];

        let directives: Vec<String> = config
            .filter_directives(Severity::Warning)
            .unwrap()
            .iter()
            .map(|d| d.to_string().to_ascii_lowercase())
            .collect();
        assert_eq!(directives, vec!["info", "hyper=warn", "sqlx::query=warn"]);
    }

    #[test]
    fn test_config_path() {
        if let Some(path) = LogConfig::config_path() {
            assert!(path.ends_with("logcatch/config.toml"));
        }
    }
}
