//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheLevel, DEFAULT_KEY_PREFIX};

mod cli;

pub use cli::{CacheOverrides, CliArgs, Command, ConfigArgs, ProbeArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "sqlcache";
const ENV_PREFIX: &str = "SQLCACHE";
const DEFAULT_TTL_MS: i64 = 60_000;
const DEFAULT_MEMORY_CAPACITY: u64 = 10_000;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub debug_mode: bool,
    pub level: CacheLevel,
    pub tables: Vec<String>,
    pub disable_tables: Vec<String>,
    pub key_prefix: String,
    pub memory_capacity: NonZeroUsize,
    pub negative_cache: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("cache.tables")
            .with_list_parse_key("cache.disable_tables"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Config(args)) => raw.apply_overrides(&args.overrides),
        Some(Command::Probe(args)) => raw.apply_overrides(&args.overrides),
        None => {}
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    ttl_ms: Option<i64>,
    debug_mode: Option<bool>,
    level: Option<String>,
    tables: Option<Vec<String>>,
    disable_tables: Option<Vec<String>>,
    key_prefix: Option<String>,
    memory_capacity: Option<u64>,
    negative_cache: Option<bool>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(ttl_ms) = overrides.ttl_ms {
            self.cache.ttl_ms = Some(i64::try_from(ttl_ms).unwrap_or(i64::MAX));
        }
        if let Some(level) = overrides.level.as_ref() {
            self.cache.level = Some(level.clone());
        }
        if let Some(prefix) = overrides.key_prefix.as_ref() {
            self.cache.key_prefix = Some(prefix.clone());
        }
        if let Some(capacity) = overrides.memory_capacity {
            self.cache.memory_capacity = Some(capacity);
        }
        if let Some(debug_mode) = overrides.debug_mode {
            self.cache.debug_mode = Some(debug_mode);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        Ok(Self {
            logging: build_logging_settings(raw.logging)?,
            cache: build_cache_settings(raw.cache)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_ms = cache.ttl_ms.unwrap_or(DEFAULT_TTL_MS);
    let ttl_ms = u64::try_from(ttl_ms)
        .map_err(|_| LoadError::invalid("cache.ttl_ms", "must not be negative"))?;

    let level = match cache.level {
        Some(level) => CacheLevel::from_str(&level)
            .map_err(|reason| LoadError::invalid("cache.level", reason))?,
        None => CacheLevel::default(),
    };

    let key_prefix = cache
        .key_prefix
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());
    if key_prefix.is_empty() {
        return Err(LoadError::invalid("cache.key_prefix", "must not be empty"));
    }
    if key_prefix.contains(':') {
        return Err(LoadError::invalid(
            "cache.key_prefix",
            "must not contain `:`",
        ));
    }

    let capacity = cache.memory_capacity.unwrap_or(DEFAULT_MEMORY_CAPACITY);
    let memory_capacity = usize::try_from(capacity)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| LoadError::invalid("cache.memory_capacity", "must be greater than zero"))?;

    Ok(CacheSettings {
        ttl: Duration::from_millis(ttl_ms),
        debug_mode: cache.debug_mode.unwrap_or(false),
        level,
        tables: table_names(cache.tables, "cache.tables")?,
        disable_tables: table_names(cache.disable_tables, "cache.disable_tables")?,
        key_prefix,
        memory_capacity,
        negative_cache: cache.negative_cache.unwrap_or(true),
    })
}

fn table_names(tables: Option<Vec<String>>, key: &'static str) -> Result<Vec<String>, LoadError> {
    tables
        .unwrap_or_default()
        .into_iter()
        .map(|table| {
            let trimmed = table.trim();
            if trimmed.is_empty() {
                Err(LoadError::invalid(key, "table names must not be empty"))
            } else {
                Ok(trimmed.to_string())
            }
        })
        .collect()
}
