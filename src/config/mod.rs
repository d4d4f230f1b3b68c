//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU32, path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::{
    loader::DEFAULT_MAX_NESTING_DEPTH,
    parents::COLLECTION_KIND,
    render::{DEFAULT_CONTEXT_NAME, DEFAULT_TEMPLATE_PREFIX},
};
use crate::cache::CacheBackend;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "content-blocks";
const ENV_PREFIX: &str = "CONTENT_BLOCKS";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_CACHE_PREFIX: &str = "content_blocks";
const DEFAULT_CACHE_MEMORY_LIMIT: u64 = 1000;
const DEFAULT_TEMPLATE_DIR: &str = "templates";

/// Command-line arguments for the content-blocks management binary.
#[derive(Debug, Parser)]
#[command(
    name = "content-blocks",
    version,
    about = "Manage rendered content block caches and templates"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "CONTENT_BLOCKS_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Apply pending database migrations.
    Migrate(DatabaseOverride),
    /// Delete the cached HTML of every block of every registered parent.
    #[command(name = "clear-cache")]
    ClearCache(DatabaseOverride),
    /// Re-render and store every cacheable block, optionally only some.
    #[command(name = "set-cache")]
    SetCache(SetCacheArgs),
    /// Render and store blocks whose cache entry is missing.
    #[command(name = "warm-cache")]
    WarmCache(DatabaseOverride),
    /// Re-render one block and every block above it.
    #[command(name = "update-cache")]
    UpdateCache(BlockArgs),
    /// Render one block to stdout through the cache.
    Render(BlockArgs),
    /// Write every template definition to a JSON document.
    #[command(name = "export-templates")]
    ExportTemplates(FileArgs),
    /// Create or update template definitions from a JSON document.
    #[command(name = "import-templates")]
    ImportTemplates(FileArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
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

    /// Override the template root directory.
    #[arg(long = "template-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub template_dir: Option<PathBuf>,

    /// Bypass the cache entirely.
    #[arg(
        long = "cache-disabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_disabled: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct SetCacheArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Restrict the pass to these block ids; repeat for several.
    #[arg(long = "block", value_name = "ID")]
    pub blocks: Vec<i64>,
}

#[derive(Debug, Args, Clone)]
pub struct BlockArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Block to render.
    #[arg(long, value_name = "ID")]
    pub block: i64,

    /// Site whose cache entry is used; defaults to the site-less entry.
    #[arg(long, value_name = "ID")]
    pub site: Option<i64>,
}

#[derive(Debug, Args, Clone)]
pub struct FileArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Path of the template document.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

impl Command {
    fn database(&self) -> &DatabaseOverride {
        match self {
            Command::Migrate(database)
            | Command::ClearCache(database)
            | Command::WarmCache(database) => database,
            Command::SetCache(args) => &args.database,
            Command::UpdateCache(args) | Command::Render(args) => &args.database,
            Command::ExportTemplates(args) | Command::ImportTemplates(args) => &args.database,
        }
    }
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub render: RenderSettings,
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
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub disabled: bool,
    pub prefix: String,
    pub backend: CacheBackend,
    pub memory_limit: usize,
    pub dedupe_inflight: bool,
    pub max_nesting_depth: usize,
    pub parent_kinds: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub template_dir: PathBuf,
    pub template_prefix: String,
    pub context_name: String,
    pub autoescape: bool,
    pub pre_render: bool,
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
            .with_list_parse_key("cache.parent_kinds"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_global_overrides(&cli.overrides);
    raw.apply_database_override(cli.command.database());

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    render: RawRenderSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(dir) = overrides.template_dir.as_ref() {
            self.render.template_dir = Some(dir.clone());
        }
        if let Some(disabled) = overrides.cache_disabled {
            self.cache.disabled = Some(disabled);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            cache,
            render,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            render: build_render_settings(render)?,
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

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS.into()),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let prefix = cache
        .prefix
        .unwrap_or_else(|| DEFAULT_CACHE_PREFIX.to_string());
    if prefix.trim().is_empty() {
        return Err(LoadError::invalid("cache.prefix", "must not be empty"));
    }

    let backend = match cache.backend.as_deref().map(str::trim) {
        None => CacheBackend::Database,
        Some(value) if value.eq_ignore_ascii_case("database") => CacheBackend::Database,
        Some(value) if value.eq_ignore_ascii_case("memory") => CacheBackend::Memory,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("expected `memory` or `database`, got `{other}`"),
            ));
        }
    };

    let memory_limit = positive_usize(
        cache.memory_limit.unwrap_or(DEFAULT_CACHE_MEMORY_LIMIT),
        "cache.memory_limit",
    )?;
    let max_nesting_depth = positive_usize(
        cache
            .max_nesting_depth
            .unwrap_or(DEFAULT_MAX_NESTING_DEPTH as u64),
        "cache.max_nesting_depth",
    )?;

    let parent_kinds: Vec<String> = cache
        .parent_kinds
        .unwrap_or_else(|| vec![COLLECTION_KIND.to_string()])
        .into_iter()
        .map(|kind| kind.trim().to_string())
        .filter(|kind| !kind.is_empty())
        .collect();
    if parent_kinds.is_empty() {
        return Err(LoadError::invalid(
            "cache.parent_kinds",
            "at least one parent kind is required",
        ));
    }

    Ok(CacheSettings {
        disabled: cache.disabled.unwrap_or(false),
        prefix,
        backend,
        memory_limit,
        dedupe_inflight: cache.dedupe_inflight.unwrap_or(true),
        max_nesting_depth,
        parent_kinds,
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let template_dir = render
        .template_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE_DIR));
    if template_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.template_dir",
            "path must not be empty",
        ));
    }

    let context_name = render
        .context_name
        .unwrap_or_else(|| DEFAULT_CONTEXT_NAME.to_string());
    if context_name.trim().is_empty() {
        return Err(LoadError::invalid(
            "render.context_name",
            "must not be empty",
        ));
    }

    Ok(RenderSettings {
        template_dir,
        template_prefix: render
            .template_prefix
            .unwrap_or_else(|| DEFAULT_TEMPLATE_PREFIX.to_string()),
        context_name,
        autoescape: render.autoescape.unwrap_or(true),
        pre_render: render.pre_render.unwrap_or(true),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    disabled: Option<bool>,
    prefix: Option<String>,
    backend: Option<String>,
    memory_limit: Option<u64>,
    dedupe_inflight: Option<bool>,
    max_nesting_depth: Option<u64>,
    parent_kinds: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    template_dir: Option<PathBuf>,
    template_prefix: Option<String>,
    context_name: Option<String>,
    autoescape: Option<bool>,
    pre_render: Option<bool>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn positive_usize(value: u64, key: &'static str) -> Result<usize, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    usize::try_from(value)
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
