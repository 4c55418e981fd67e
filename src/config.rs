use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::{DEFAULT_ACTIVITY_MODE, PipelineSettings};
use crate::store::WriteFailurePolicy;

const DEFAULT_BASE_URL: &str = "https://www.bungie.net";
const DEFAULT_LANGUAGE: &str = "en";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RUN_DEADLINE_SECS: u64 = 300;

#[derive(Clone)]
pub struct RunConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub language: String,
    pub redis_url: String,
    pub activity_mode: i32,
    pub write_failure_policy: WriteFailurePolicy,
    pub request_timeout_secs: u64,
    pub run_deadline_secs: u64,
    pub sequential_fetch: bool,
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("language", &self.language)
            .field("redis_url", &self.redis_url)
            .field("activity_mode", &self.activity_mode)
            .field("write_failure_policy", &self.write_failure_policy)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("run_deadline_secs", &self.run_deadline_secs)
            .field("sequential_fetch", &self.sequential_fetch)
            .finish()
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            language: DEFAULT_LANGUAGE.to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            activity_mode: DEFAULT_ACTIVITY_MODE,
            write_failure_policy: WriteFailurePolicy::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            run_deadline_secs: DEFAULT_RUN_DEADLINE_SECS,
            sequential_fetch: false,
        }
    }
}

impl RunConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            base_url: cli_base_url,
            api_key: cli_api_key,
            language: cli_language,
            redis_url: cli_redis_url,
            activity_mode: cli_activity_mode,
            write_failure_policy: cli_write_failure_policy,
            request_timeout_secs: cli_request_timeout_secs,
            run_deadline_secs: cli_run_deadline_secs,
            sequential_fetch: cli_sequential_fetch,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            base_url: file_base_url,
            api_key: file_api_key,
            language: file_language,
            redis_url: file_redis_url,
            activity_mode: file_activity_mode,
            write_failure_policy: file_write_failure_policy,
            request_timeout_secs: file_request_timeout_secs,
            run_deadline_secs: file_run_deadline_secs,
            sequential_fetch: file_sequential_fetch,
        } = file_config;

        let defaults = Self::default();

        let base_url = cli_base_url
            .or(file_base_url)
            .map(|url| url.trim().to_string())
            .unwrap_or(defaults.base_url);

        let api_key = cli_api_key
            .or(file_api_key)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let language = cli_language
            .or(file_language)
            .map(|lang| lang.trim().to_string())
            .unwrap_or(defaults.language);

        Ok(Self {
            base_url,
            api_key,
            language,
            redis_url: cli_redis_url.or(file_redis_url).unwrap_or(defaults.redis_url),
            activity_mode: cli_activity_mode
                .or(file_activity_mode)
                .unwrap_or(defaults.activity_mode),
            write_failure_policy: cli_write_failure_policy
                .or(file_write_failure_policy)
                .unwrap_or(defaults.write_failure_policy),
            request_timeout_secs: cli_request_timeout_secs
                .or(file_request_timeout_secs)
                .unwrap_or(defaults.request_timeout_secs),
            run_deadline_secs: cli_run_deadline_secs
                .or(file_run_deadline_secs)
                .unwrap_or(defaults.run_deadline_secs),
            sequential_fetch: cli_sequential_fetch || file_sequential_fetch.unwrap_or(false),
        })
    }

    pub fn validate(&self) -> Result<()> {
        let base = Url::parse(&self.base_url)
            .with_context(|| format!("base url {:?} is not a valid URL", self.base_url))?;
        anyhow::ensure!(
            matches!(base.scheme(), "http" | "https"),
            "base url {:?} must use http or https",
            self.base_url
        );

        anyhow::ensure!(!self.language.is_empty(), "language must not be empty");

        let redis = Url::parse(&self.redis_url)
            .with_context(|| format!("redis url {:?} is not a valid URL", self.redis_url))?;
        anyhow::ensure!(
            matches!(redis.scheme(), "redis" | "rediss" | "unix" | "redis+unix"),
            "redis url {:?} has unsupported scheme {:?}",
            self.redis_url,
            redis.scheme()
        );

        anyhow::ensure!(
            self.request_timeout_secs > 0,
            "request timeout must be greater than zero"
        );
        anyhow::ensure!(
            self.run_deadline_secs > 0,
            "run deadline must be greater than zero"
        );
        anyhow::ensure!(
            self.request_timeout_secs <= self.run_deadline_secs,
            "request timeout ({}s) exceeds run deadline ({}s)",
            self.request_timeout_secs,
            self.run_deadline_secs
        );
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            activity_mode: self.activity_mode,
            sequential_fetch: self.sequential_fetch,
            deadline: Duration::from_secs(self.run_deadline_secs),
        }
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "destiny-manifest-cache",
    about = "Refresh the Destiny 2 definition cache from the Bungie manifest",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "DESTINY_CACHE_BASE_URL",
        value_name = "URL",
        help = "Base URL of the Bungie API"
    )]
    pub base_url: Option<String>,

    #[arg(
        long,
        env = "DESTINY_CACHE_API_KEY",
        value_name = "KEY",
        hide_env_values = true,
        help = "API key sent as the X-API-Key header"
    )]
    pub api_key: Option<String>,

    #[arg(
        long,
        env = "DESTINY_CACHE_LANGUAGE",
        value_name = "LANG",
        help = "Manifest language to load definitions for"
    )]
    pub language: Option<String>,

    #[arg(
        long,
        env = "DESTINY_CACHE_REDIS_URL",
        value_name = "URL",
        help = "Redis connection URL"
    )]
    pub redis_url: Option<String>,

    #[arg(
        long,
        env = "DESTINY_CACHE_ACTIVITY_MODE",
        value_name = "MODE",
        help = "Activity mode type to keep when filtering activities",
        value_parser = clap::value_parser!(i32)
    )]
    pub activity_mode: Option<i32>,

    #[arg(
        long,
        env = "DESTINY_CACHE_WRITE_FAILURE_POLICY",
        value_enum,
        value_name = "POLICY",
        help = "Stop at the first failed cache write or attempt every key"
    )]
    pub write_failure_policy: Option<WriteFailurePolicy>,

    #[arg(
        long,
        env = "DESTINY_CACHE_REQUEST_TIMEOUT_SECS",
        value_name = "SECS",
        help = "Timeout applied to each HTTP request",
        value_parser = clap::value_parser!(u64)
    )]
    pub request_timeout_secs: Option<u64>,

    #[arg(
        long,
        env = "DESTINY_CACHE_RUN_DEADLINE_SECS",
        value_name = "SECS",
        help = "Deadline for the whole run, including cache writes",
        value_parser = clap::value_parser!(u64)
    )]
    pub run_deadline_secs: Option<u64>,

    #[arg(
        long,
        env = "DESTINY_CACHE_SEQUENTIAL_FETCH",
        help = "Fetch definition tables one at a time instead of concurrently"
    )]
    pub sequential_fetch: bool,
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    base_url: Option<String>,
    api_key: Option<String>,
    language: Option<String>,
    redis_url: Option<String>,
    activity_mode: Option<i32>,
    write_failure_policy: Option<WriteFailurePolicy>,
    request_timeout_secs: Option<u64>,
    run_deadline_secs: Option<u64>,
    sequential_fetch: Option<bool>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
