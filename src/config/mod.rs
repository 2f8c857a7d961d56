//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::DEFAULT_MAX_ENTRIES;
use crate::domain::ImageFormat;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "plantpad";
const DEFAULT_SERVER_BASE_URL: &str = "https://www.plantuml.com/plantuml";
const DEFAULT_EMBEDDED_PORT: u16 = 18123;
const DEFAULT_EMBEDDED_JAR: &str = "plantuml.jar";
const DEFAULT_EMBEDDED_JAVA: &str = "java";
const DEFAULT_DEBOUNCE_MS: u64 = 500;
const DEFAULT_RENDER_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_STARTUP_RETRIES: u32 = 5;
const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Command-line arguments for the plantpad binary.
#[derive(Debug, Parser)]
#[command(name = "plantpad", version, about = "PlantUML render pipeline")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "PLANTPAD_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Render one diagram file and print or save the image.
    Render(RenderArgs),
    /// Watch a diagram file and keep an output file updated as it changes.
    Preview(PreviewArgs),
    /// Probe the render server and report its status.
    Check(CheckArgs),
    /// Inspect or clear the offline render cache.
    Cache(CacheArgs),
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: CommonOverrides,

    /// Diagram source file to render.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Write the image here instead of stdout.
    #[arg(long = "output", short = 'o', value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub overrides: CommonOverrides,

    /// Diagram source file to watch.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Output image path; defaults to the source path with the image
    /// format's extension.
    #[arg(long = "output", short = 'o', value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub overrides: CommonOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct CacheArgs {
    #[command(flatten)]
    pub overrides: CommonOverrides,

    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CacheCommand {
    /// Print entry count and capacity.
    Stats,
    /// Drop all cached renders, including the persisted file.
    Clear,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CommonOverrides {
    /// Override the render server base URL.
    #[arg(long = "server-base-url", value_name = "URL")]
    pub server_base_url: Option<String>,

    /// Use the locally managed render server instead of the remote one.
    #[arg(
        long = "server-use-embedded",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub server_use_embedded: Option<bool>,

    /// Override the first port tried for the embedded server.
    #[arg(long = "server-embedded-port", value_name = "PORT")]
    pub server_embedded_port: Option<u16>,

    /// Override the PlantUML jar used by the embedded server.
    #[arg(long = "server-embedded-jar", value_name = "PATH")]
    pub server_embedded_jar: Option<PathBuf>,

    /// Override the debounce window applied to source edits.
    #[arg(long = "render-debounce-ms", value_name = "MS")]
    pub render_debounce_ms: Option<u64>,

    /// Override the render request timeout.
    #[arg(long = "render-timeout-ms", value_name = "MS")]
    pub render_timeout_ms: Option<u64>,

    /// Override the reachability probe timeout.
    #[arg(long = "render-probe-timeout-ms", value_name = "MS")]
    pub render_probe_timeout_ms: Option<u64>,

    /// Override the requested image format (svg|png).
    #[arg(long = "render-format", value_name = "FORMAT")]
    pub render_format: Option<String>,

    /// Override the number of startup reachability attempts.
    #[arg(long = "monitor-startup-retries", value_name = "COUNT")]
    pub monitor_startup_retries: Option<u32>,

    /// Override the delay between startup reachability attempts.
    #[arg(long = "monitor-retry-delay-ms", value_name = "MS")]
    pub monitor_retry_delay_ms: Option<u64>,

    /// Override the periodic reachability check interval.
    #[arg(long = "monitor-poll-interval-seconds", value_name = "SECONDS")]
    pub monitor_poll_interval_seconds: Option<u64>,

    /// Override the render cache capacity.
    #[arg(long = "cache-max-entries", value_name = "COUNT")]
    pub cache_max_entries: Option<usize>,

    /// Override the render cache persistence file.
    #[arg(long = "cache-path", value_name = "PATH")]
    pub cache_path: Option<PathBuf>,

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

impl CliArgs {
    pub fn overrides(&self) -> CommonOverrides {
        match self.command.as_ref() {
            Some(Command::Render(args)) => args.overrides.clone(),
            Some(Command::Preview(args)) => args.overrides.clone(),
            Some(Command::Check(args)) => args.overrides.clone(),
            Some(Command::Cache(args)) => args.overrides.clone(),
            None => CommonOverrides::default(),
        }
    }
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub render: RenderSettings,
    pub monitor: MonitorSettings,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub base_url: String,
    pub use_embedded: bool,
    pub embedded_port: u16,
    pub embedded_jar: PathBuf,
    pub embedded_java: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub debounce: Duration,
    pub request_timeout: Duration,
    pub probe_timeout: Duration,
    pub format: ImageFormat,
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub startup_retries: u32,
    pub retry_delay: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_entries: usize,
    pub path: Option<PathBuf>,
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

    builder = builder.add_source(Environment::with_prefix("PLANTPAD").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides());

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    render: RawRenderSettings,
    monitor: RawMonitorSettings,
    cache: RawCacheSettings,
    logging: RawLoggingSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &CommonOverrides) {
        if let Some(url) = overrides.server_base_url.as_ref() {
            self.server.base_url = Some(url.clone());
        }
        if let Some(use_embedded) = overrides.server_use_embedded {
            self.server.use_embedded = Some(use_embedded);
        }
        if let Some(port) = overrides.server_embedded_port {
            self.server.embedded_port = Some(port);
        }
        if let Some(jar) = overrides.server_embedded_jar.as_ref() {
            self.server.embedded_jar = Some(jar.clone());
        }
        if let Some(ms) = overrides.render_debounce_ms {
            self.render.debounce_ms = Some(ms);
        }
        if let Some(ms) = overrides.render_timeout_ms {
            self.render.timeout_ms = Some(ms);
        }
        if let Some(ms) = overrides.render_probe_timeout_ms {
            self.render.probe_timeout_ms = Some(ms);
        }
        if let Some(format) = overrides.render_format.as_ref() {
            self.render.format = Some(format.clone());
        }
        if let Some(retries) = overrides.monitor_startup_retries {
            self.monitor.startup_retries = Some(retries);
        }
        if let Some(ms) = overrides.monitor_retry_delay_ms {
            self.monitor.retry_delay_ms = Some(ms);
        }
        if let Some(secs) = overrides.monitor_poll_interval_seconds {
            self.monitor.poll_interval_seconds = Some(secs);
        }
        if let Some(max) = overrides.cache_max_entries {
            self.cache.max_entries = Some(max);
        }
        if let Some(path) = overrides.cache_path.as_ref() {
            self.cache.path = Some(path.clone());
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
            server,
            render,
            monitor,
            cache,
            logging,
        } = raw;

        let server = build_server_settings(server)?;
        let render = build_render_settings(render)?;
        let monitor = build_monitor_settings(monitor)?;
        let cache = build_cache_settings(cache)?;
        let logging = build_logging_settings(logging)?;

        Ok(Self {
            server,
            render,
            monitor,
            cache,
            logging,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let base_url = server
        .base_url
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_SERVER_BASE_URL.to_string());
    url::Url::parse(&base_url)
        .map_err(|err| LoadError::invalid("server.base_url", format!("not an absolute URL: {err}")))?;

    let embedded_port = server.embedded_port.unwrap_or(DEFAULT_EMBEDDED_PORT);
    if embedded_port == 0 {
        return Err(LoadError::invalid(
            "server.embedded_port",
            "port must be greater than zero",
        ));
    }

    let embedded_jar = server
        .embedded_jar
        .unwrap_or_else(|| PathBuf::from(DEFAULT_EMBEDDED_JAR));
    if embedded_jar.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "server.embedded_jar",
            "path must not be empty",
        ));
    }

    let embedded_java = server
        .embedded_java
        .unwrap_or_else(|| PathBuf::from(DEFAULT_EMBEDDED_JAVA));
    if embedded_java.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "server.embedded_java",
            "path must not be empty",
        ));
    }

    Ok(ServerSettings {
        base_url,
        use_embedded: server.use_embedded.unwrap_or(false),
        embedded_port,
        embedded_jar,
        embedded_java,
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let debounce = Duration::from_millis(render.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS));

    let timeout_ms = render.timeout_ms.unwrap_or(DEFAULT_RENDER_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "render.timeout_ms",
            "must be greater than zero",
        ));
    }

    let probe_timeout_ms = render.probe_timeout_ms.unwrap_or(DEFAULT_PROBE_TIMEOUT_MS);
    if probe_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "render.probe_timeout_ms",
            "must be greater than zero",
        ));
    }

    let format = match render.format {
        Some(value) => ImageFormat::from_str(&value)
            .map_err(|reason| LoadError::invalid("render.format", reason))?,
        None => ImageFormat::Svg,
    };

    Ok(RenderSettings {
        debounce,
        request_timeout: Duration::from_millis(timeout_ms),
        probe_timeout: Duration::from_millis(probe_timeout_ms),
        format,
    })
}

fn build_monitor_settings(monitor: RawMonitorSettings) -> Result<MonitorSettings, LoadError> {
    let startup_retries = monitor.startup_retries.unwrap_or(DEFAULT_STARTUP_RETRIES);
    if startup_retries == 0 {
        return Err(LoadError::invalid(
            "monitor.startup_retries",
            "must be greater than zero",
        ));
    }

    let poll_interval_seconds = monitor
        .poll_interval_seconds
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
    if poll_interval_seconds == 0 {
        return Err(LoadError::invalid(
            "monitor.poll_interval_seconds",
            "must be greater than zero",
        ));
    }

    Ok(MonitorSettings {
        startup_retries,
        retry_delay: Duration::from_millis(
            monitor.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS),
        ),
        poll_interval: Duration::from_secs(poll_interval_seconds),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let max_entries = cache.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES);
    if max_entries == 0 {
        return Err(LoadError::invalid(
            "cache.max_entries",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        max_entries,
        path: cache.path,
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

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    base_url: Option<String>,
    use_embedded: Option<bool>,
    embedded_port: Option<u16>,
    embedded_jar: Option<PathBuf>,
    embedded_java: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    debounce_ms: Option<u64>,
    timeout_ms: Option<u64>,
    probe_timeout_ms: Option<u64>,
    format: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMonitorSettings {
    startup_retries: Option<u32>,
    retry_delay_ms: Option<u64>,
    poll_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    max_entries: Option<usize>,
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}
