use crate::error::Error;
use crate::scanner::{FreshnessRule, ScanOptions};
use config::{Config, ConfigBuilder, ConfigError, Environment, File as ConfigFile};
use config::builder::DefaultState;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "app";
pub const ENV_PREFIX: &str = "BLOB_MIRROR";

/// Fully resolved process settings.
///
/// Layered lowest to highest: built-in defaults, the settings file,
/// `BLOB_MIRROR_*` environment variables, command-line overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub connection_string: String,
    pub source: String,
    pub container: String,
    pub target_folder: Option<String>,
    pub threads: i64,
    pub in_memory: bool,
    /// Upload log appended to after every verified upload.
    pub upload_log: Option<PathBuf>,
    /// Upload log read at startup to seed the dedup ledger.
    pub skip_uploaded: Option<PathBuf>,
    pub folder_ready_marker_file: Option<String>,
    pub hot_extensions: Vec<String>,
    pub quarantine_secs: u64,
    pub scan_interval_secs: u64,
    pub failure_backoff_secs: u64,
    pub ignore_patterns: Vec<String>,
}

/// Values given on the command line; `None` leaves lower layers in charge.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub threads: Option<i64>,
    pub source: Option<String>,
    pub container: Option<String>,
    pub target_folder: Option<String>,
    pub in_memory: bool,
    pub upload_log: Option<String>,
    pub skip_uploaded: Option<String>,
    pub folder_ready_marker_file: Option<String>,
}

impl Settings {
    /// Load settings from `config_file` (or `app.*` in the working directory
    /// when absent, which may also be missing) and apply `overrides`.
    pub fn load(config_file: Option<&str>, overrides: &Overrides) -> Result<Settings, ConfigError> {
        let file_source = match config_file {
            Some(path) => ConfigFile::with_name(path).required(true),
            None => ConfigFile::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let builder = with_defaults(Config::builder())?
            .add_source(file_source)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("hot_extensions")
                    .with_list_parse_key("ignore_patterns"),
            );

        apply_overrides(builder, overrides)?
            .build()?
            .try_deserialize::<Settings>()
    }

    /// Reject settings the process cannot start with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.connection_string.trim().is_empty() {
            return Err(Error::InvalidSettings(
                "object store connection string is empty, check the settings file".to_string(),
            ));
        }
        if self.source.trim().is_empty() {
            return Err(Error::InvalidSettings("source path is empty".to_string()));
        }
        if self.container.trim().is_empty() {
            return Err(Error::InvalidSettings("target container is empty".to_string()));
        }
        if self.threads < 1 {
            return Err(Error::InvalidSettings(format!(
                "specified upload threads count {} is less than 1",
                self.threads
            )));
        }
        Ok(())
    }

    pub fn thread_count(&self) -> usize {
        self.threads.max(1) as usize
    }

    pub fn target_folder(&self) -> Option<&str> {
        self.target_folder
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            marker_file: self
                .folder_ready_marker_file
                .clone()
                .filter(|m| !m.trim().is_empty()),
            freshness: FreshnessRule::new(
                &self.hot_extensions,
                Duration::from_secs(self.quarantine_secs),
            ),
            ignore_patterns: self.ignore_patterns.clone(),
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_secs(self.failure_backoff_secs)
    }
}

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("connection_string", "")?
        .set_default("source", "")?
        .set_default("container", "")?
        .set_default("threads", 0)?
        .set_default("in_memory", false)?
        .set_default("hot_extensions", vec!["xml"])?
        .set_default("quarantine_secs", 60 * 60)?
        .set_default("scan_interval_secs", 60 * 60)?
        .set_default("failure_backoff_secs", 2 * 60 * 60)?
        .set_default("ignore_patterns", Vec::<String>::new())
}

fn apply_overrides(
    builder: ConfigBuilder<DefaultState>,
    overrides: &Overrides,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_override_option("threads", overrides.threads)?
        .set_override_option("source", overrides.source.clone())?
        .set_override_option("container", overrides.container.clone())?
        .set_override_option("target_folder", overrides.target_folder.clone())?
        .set_override_option("in_memory", overrides.in_memory.then_some(true))?
        .set_override_option("upload_log", overrides.upload_log.clone())?
        .set_override_option("skip_uploaded", overrides.skip_uploaded.clone())?
        .set_override_option(
            "folder_ready_marker_file",
            overrides.folder_ready_marker_file.clone(),
        )
}
