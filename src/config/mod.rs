//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "vitrine";
const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:4000/graphql";
const DEFAULT_TENANT: &str = "default";
const DEFAULT_LOCALE: &str = "en";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PREFETCH_BATCH_SIZE: u64 = 3;
const DEFAULT_PREFETCH_BATCH_DELAY_MS: u64 = 150;
const DEFAULT_SECTION_TTL_SECS: u64 = 300;
const DEFAULT_MENU_TTL_SECS: u64 = 600;
const DEFAULT_BATCH_WINDOW_MS: u64 = 5;
const DEFAULT_SCROLL_COOLDOWN_MS: u64 = 800;
const DEFAULT_SCROLL_MIN_WHEEL_DELTA: f64 = 4.0;
const DEFAULT_SCROLL_ANCHOR_FRACTION: f64 = 1.0 / 3.0;

/// Command-line arguments for the Vitrine binary.
#[derive(Debug, Parser)]
#[command(name = "vitrine", version, about = "Vitrine content cache tooling")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "VITRINE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Warm the page cache for every page of the tenant and report progress.
    Warm(WarmArgs),
    /// Load one page through the on-demand path and print it as JSON.
    Page(PageArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct WarmArgs {
    #[command(flatten)]
    pub overrides: BackendOverrides,

    /// Override the number of pages loaded per batch.
    #[arg(long = "prefetch-batch-size", value_name = "COUNT")]
    pub batch_size: Option<u64>,

    /// Override the pause between batches.
    #[arg(long = "prefetch-batch-delay-ms", value_name = "MILLIS")]
    pub batch_delay_ms: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct PageArgs {
    #[command(flatten)]
    pub overrides: BackendOverrides,

    /// Slug of the page to load.
    #[arg(value_name = "SLUG")]
    pub slug: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct BackendOverrides {
    /// Override the GraphQL endpoint URL.
    #[arg(long = "endpoint", value_name = "URL")]
    pub endpoint: Option<String>,

    /// Override the tenant whose pages are served.
    #[arg(long = "tenant", value_name = "TENANT")]
    pub tenant: Option<String>,

    /// Override the content locale.
    #[arg(long = "locale", value_name = "LOCALE")]
    pub locale: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: BackendSettings,
    pub logging: LoggingSettings,
    pub prefetch: PrefetchSettings,
    pub cache: CacheSettings,
    pub batcher: BatcherSettings,
    pub scroll: ScrollSettings,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub endpoint: Url,
    pub tenant: String,
    pub locale: String,
    pub api_token: Option<String>,
    pub request_timeout: Duration,
    pub supports_batching: bool,
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
pub struct PrefetchSettings {
    pub enabled: bool,
    pub batch_size: NonZeroUsize,
    pub batch_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub section_ttl: Duration,
    pub menu_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct BatcherSettings {
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct ScrollSettings {
    pub cooldown: Duration,
    pub min_wheel_delta: f64,
    pub anchor_fraction: f64,
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

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("VITRINE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Warm(args)) => raw.apply_warm_overrides(args),
        Some(Command::Page(args)) => raw.apply_backend_overrides(&args.overrides),
        None => raw.apply_warm_overrides(&WarmArgs::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    backend: RawBackendSettings,
    logging: RawLoggingSettings,
    prefetch: RawPrefetchSettings,
    cache: RawCacheSettings,
    batcher: RawBatcherSettings,
    scroll: RawScrollSettings,
}

impl RawSettings {
    fn apply_warm_overrides(&mut self, args: &WarmArgs) {
        self.apply_backend_overrides(&args.overrides);
        if let Some(size) = args.batch_size {
            self.prefetch.batch_size = Some(size);
        }
        if let Some(delay) = args.batch_delay_ms {
            self.prefetch.batch_delay_ms = Some(delay);
        }
    }

    fn apply_backend_overrides(&mut self, overrides: &BackendOverrides) {
        if let Some(endpoint) = overrides.endpoint.as_ref() {
            self.backend.endpoint = Some(endpoint.clone());
        }
        if let Some(tenant) = overrides.tenant.as_ref() {
            self.backend.tenant = Some(tenant.clone());
        }
        if let Some(locale) = overrides.locale.as_ref() {
            self.backend.locale = Some(locale.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            backend,
            logging,
            prefetch,
            cache,
            batcher,
            scroll,
        } = raw;

        Ok(Self {
            backend: build_backend_settings(backend)?,
            logging: build_logging_settings(logging)?,
            prefetch: build_prefetch_settings(prefetch)?,
            cache: build_cache_settings(cache)?,
            batcher: build_batcher_settings(batcher),
            scroll: build_scroll_settings(scroll)?,
        })
    }
}

fn build_backend_settings(backend: RawBackendSettings) -> Result<BackendSettings, LoadError> {
    let endpoint_raw = backend
        .endpoint
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
    let endpoint = Url::parse(endpoint_raw.trim())
        .map_err(|err| LoadError::invalid("backend.endpoint", format!("invalid url: {err}")))?;
    if !matches!(endpoint.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "backend.endpoint",
            "scheme must be http or https",
        ));
    }

    let tenant = non_empty(backend.tenant, DEFAULT_TENANT, "backend.tenant")?;
    let locale = non_empty(backend.locale, DEFAULT_LOCALE, "backend.locale")?;

    let api_token = backend.api_token.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let timeout_secs = backend
        .request_timeout_secs
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "backend.request_timeout_secs",
            "must be greater than zero",
        ));
    }

    Ok(BackendSettings {
        endpoint,
        tenant,
        locale,
        api_token,
        request_timeout: Duration::from_secs(timeout_secs),
        supports_batching: backend.supports_batching.unwrap_or(false),
    })
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

fn build_prefetch_settings(prefetch: RawPrefetchSettings) -> Result<PrefetchSettings, LoadError> {
    let batch_size = non_zero_usize(
        prefetch.batch_size.unwrap_or(DEFAULT_PREFETCH_BATCH_SIZE),
        "prefetch.batch_size",
    )?;
    let batch_delay = Duration::from_millis(
        prefetch
            .batch_delay_ms
            .unwrap_or(DEFAULT_PREFETCH_BATCH_DELAY_MS),
    );

    Ok(PrefetchSettings {
        enabled: prefetch.enabled.unwrap_or(true),
        batch_size,
        batch_delay,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let section_ttl_secs = cache.section_ttl_secs.unwrap_or(DEFAULT_SECTION_TTL_SECS);
    if section_ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.section_ttl_secs",
            "must be greater than zero",
        ));
    }
    let menu_ttl_secs = cache.menu_ttl_secs.unwrap_or(DEFAULT_MENU_TTL_SECS);
    if menu_ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.menu_ttl_secs",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        section_ttl: Duration::from_secs(section_ttl_secs),
        menu_ttl: Duration::from_secs(menu_ttl_secs),
    })
}

fn build_batcher_settings(batcher: RawBatcherSettings) -> BatcherSettings {
    BatcherSettings {
        window: Duration::from_millis(batcher.window_ms.unwrap_or(DEFAULT_BATCH_WINDOW_MS)),
    }
}

fn build_scroll_settings(scroll: RawScrollSettings) -> Result<ScrollSettings, LoadError> {
    let min_wheel_delta = scroll
        .min_wheel_delta
        .unwrap_or(DEFAULT_SCROLL_MIN_WHEEL_DELTA);
    if !min_wheel_delta.is_finite() || min_wheel_delta < 0.0 {
        return Err(LoadError::invalid(
            "scroll.min_wheel_delta",
            "must be a finite, non-negative number",
        ));
    }

    let anchor_fraction = scroll
        .anchor_fraction
        .unwrap_or(DEFAULT_SCROLL_ANCHOR_FRACTION);
    if !(0.0..=1.0).contains(&anchor_fraction) {
        return Err(LoadError::invalid(
            "scroll.anchor_fraction",
            "must be between 0 and 1",
        ));
    }

    Ok(ScrollSettings {
        cooldown: Duration::from_millis(
            scroll.cooldown_ms.unwrap_or(DEFAULT_SCROLL_COOLDOWN_MS),
        ),
        min_wheel_delta,
        anchor_fraction,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBackendSettings {
    endpoint: Option<String>,
    tenant: Option<String>,
    locale: Option<String>,
    api_token: Option<String>,
    request_timeout_secs: Option<u64>,
    supports_batching: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPrefetchSettings {
    enabled: Option<bool>,
    batch_size: Option<u64>,
    batch_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    section_ttl_secs: Option<u64>,
    menu_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBatcherSettings {
    window_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawScrollSettings {
    cooldown_ms: Option<u64>,
    min_wheel_delta: Option<f64>,
    anchor_fraction: Option<f64>,
}

fn non_empty(value: Option<String>, default: &str, key: &'static str) -> Result<String, LoadError> {
    let value = value.unwrap_or_else(|| default.to_string());
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LoadError::invalid(key, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_usize: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value_usize)
        .ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
