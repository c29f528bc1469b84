//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::*;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "moodfeed";
const ENV_PREFIX: &str = "MOODFEED";
const DEFAULT_DATA_DIR: &str = ".moodfeed";
const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;
const DEFAULT_CACHE_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_CACHE_QUEUE_LIMIT: usize = 10_000;
const DEFAULT_CLIENT_CACHE_VERSION: &str = "1.0";
const DEFAULT_CLIENT_CACHE_NAMESPACE: &str = "cache_";
const DEFAULT_CLIENT_CACHE_TTL_MS: u64 = 10 * 60 * 1000;
const DEFAULT_MIN_VIEW_SECONDS: f64 = 2.0;
const DEFAULT_STATS_WINDOW_DAYS: u32 = 7;
const DEFAULT_SAVED_ITEMS_LIMIT: usize = 50;
const DEFAULT_TRENDING_LIMIT: usize = 50;
const DEFAULT_TRENDING_FALLBACK: usize = 20;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
    pub cache: CacheSettings,
    pub client_cache: ClientCacheSettings,
    pub affinity: AffinitySettings,
    pub feed: FeedSettings,
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
pub struct StorageSettings {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub max_entries: usize,
    pub consume_batch_limit: usize,
    pub queue_limit: usize,
}

#[derive(Debug, Clone)]
pub struct ClientCacheSettings {
    pub version: String,
    pub namespace: String,
    pub default_ttl_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AffinitySettings {
    pub min_view_seconds: f64,
    pub stats_window_days: u32,
    pub saved_items_limit: usize,
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub trending_limit: usize,
    pub trending_fallback: usize,
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
            },
            storage: StorageSettings {
                data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            },
            cache: CacheSettings {
                enabled: true,
                max_entries: DEFAULT_CACHE_MAX_ENTRIES,
                consume_batch_limit: DEFAULT_CACHE_CONSUME_BATCH_LIMIT,
                queue_limit: DEFAULT_CACHE_QUEUE_LIMIT,
            },
            client_cache: ClientCacheSettings {
                version: DEFAULT_CLIENT_CACHE_VERSION.to_string(),
                namespace: DEFAULT_CLIENT_CACHE_NAMESPACE.to_string(),
                default_ttl_ms: DEFAULT_CLIENT_CACHE_TTL_MS,
            },
            affinity: AffinitySettings {
                min_view_seconds: DEFAULT_MIN_VIEW_SECONDS,
                stats_window_days: DEFAULT_STATS_WINDOW_DAYS,
                saved_items_limit: DEFAULT_SAVED_ITEMS_LIMIT,
            },
            feed: FeedSettings {
                trending_limit: DEFAULT_TRENDING_LIMIT,
                trending_fallback: DEFAULT_TRENDING_FALLBACK,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    storage: RawStorageSettings,
    cache: RawCacheSettings,
    client_cache: RawClientCacheSettings,
    affinity: RawAffinitySettings,
    feed: RawFeedSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(dir) = overrides.data_dir.as_ref() {
            self.storage.data_dir = Some(dir.clone());
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(seconds) = overrides.min_view_seconds {
            self.affinity.min_view_seconds = Some(seconds);
        }
        if let Some(limit) = overrides.trending_limit {
            self.feed.trending_limit = Some(limit);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            storage,
            cache,
            client_cache,
            affinity,
            feed,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            storage: build_storage_settings(storage)?,
            cache: build_cache_settings(cache)?,
            client_cache: build_client_cache_settings(client_cache)?,
            affinity: build_affinity_settings(affinity)?,
            feed: build_feed_settings(feed)?,
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

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let data_dir = storage
        .data_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    if data_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "storage.data_dir",
            "path must not be empty",
        ));
    }
    Ok(StorageSettings { data_dir })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        max_entries: non_zero(
            cache.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
            "cache.max_entries",
        )?,
        consume_batch_limit: non_zero(
            cache
                .consume_batch_limit
                .unwrap_or(DEFAULT_CACHE_CONSUME_BATCH_LIMIT),
            "cache.consume_batch_limit",
        )?,
        queue_limit: non_zero(
            cache.queue_limit.unwrap_or(DEFAULT_CACHE_QUEUE_LIMIT),
            "cache.queue_limit",
        )?,
    })
}

fn build_client_cache_settings(
    client: RawClientCacheSettings,
) -> Result<ClientCacheSettings, LoadError> {
    let version = client
        .version
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_CLIENT_CACHE_VERSION.to_string());
    if version.is_empty() {
        return Err(LoadError::invalid(
            "client_cache.version",
            "must not be empty",
        ));
    }

    let namespace = client
        .namespace
        .unwrap_or_else(|| DEFAULT_CLIENT_CACHE_NAMESPACE.to_string());
    if namespace.is_empty() {
        return Err(LoadError::invalid(
            "client_cache.namespace",
            "must not be empty; clear() would remove unrelated entries",
        ));
    }

    let default_ttl_ms = client.default_ttl_ms.unwrap_or(DEFAULT_CLIENT_CACHE_TTL_MS);
    if default_ttl_ms == 0 {
        return Err(LoadError::invalid(
            "client_cache.default_ttl_ms",
            "must be greater than zero",
        ));
    }
    i64::try_from(default_ttl_ms).map_err(|_| {
        LoadError::invalid(
            "client_cache.default_ttl_ms",
            "value exceeds supported range",
        )
    })?;

    Ok(ClientCacheSettings {
        version,
        namespace,
        default_ttl_ms,
    })
}

fn build_affinity_settings(affinity: RawAffinitySettings) -> Result<AffinitySettings, LoadError> {
    let min_view_seconds = affinity
        .min_view_seconds
        .unwrap_or(DEFAULT_MIN_VIEW_SECONDS);
    if std::time::Duration::try_from_secs_f64(min_view_seconds).is_err() {
        return Err(LoadError::invalid(
            "affinity.min_view_seconds",
            "must be a non-negative number of seconds that fits a duration",
        ));
    }

    let stats_window_days = affinity
        .stats_window_days
        .unwrap_or(DEFAULT_STATS_WINDOW_DAYS);
    if stats_window_days == 0 {
        return Err(LoadError::invalid(
            "affinity.stats_window_days",
            "must be greater than zero",
        ));
    }

    Ok(AffinitySettings {
        min_view_seconds,
        stats_window_days,
        saved_items_limit: non_zero(
            affinity
                .saved_items_limit
                .unwrap_or(DEFAULT_SAVED_ITEMS_LIMIT),
            "affinity.saved_items_limit",
        )?,
    })
}

fn build_feed_settings(feed: RawFeedSettings) -> Result<FeedSettings, LoadError> {
    Ok(FeedSettings {
        trending_limit: non_zero(
            feed.trending_limit.unwrap_or(DEFAULT_TRENDING_LIMIT),
            "feed.trending_limit",
        )?,
        trending_fallback: non_zero(
            feed.trending_fallback.unwrap_or(DEFAULT_TRENDING_FALLBACK),
            "feed.trending_fallback",
        )?,
    })
}

fn non_zero(value: usize, key: &'static str) -> Result<usize, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    max_entries: Option<usize>,
    consume_batch_limit: Option<usize>,
    queue_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawClientCacheSettings {
    version: Option<String>,
    namespace: Option<String>,
    default_ttl_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAffinitySettings {
    min_view_seconds: Option<f64>,
    stats_window_days: Option<u32>,
    saved_items_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFeedSettings {
    trending_limit: Option<usize>,
    trending_fallback: Option<usize>,
}
