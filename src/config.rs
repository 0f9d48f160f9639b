//! Typed configuration, loaded from YAML with per-field environment overrides.
//!
//! Grounded on this codebase's `clap(derive, env)` CLI convention: a thin
//! `Cli` struct layered over a `serde`-deserialized file, rather than the
//! source's free-form `map<string, string>` passed by value.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::policies::cache_affinity::CacheAffinityConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployModeConfig {
    SingleNode,
    PdSeparate,
    PdDisaggregation,
    PdDisaggregationSingleContainer,
}

impl DeployModeConfig {
    pub fn is_single_node(self) -> bool {
        matches!(self, DeployModeConfig::SingleNode)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub deploy_mode: DeployModeConfig,
    #[serde(default = "default_algorithm_type")]
    pub algorithm_type: String,
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    #[serde(default = "default_slots_thresh")]
    pub slots_thresh: f64,
    #[serde(default = "default_block_thresh")]
    pub block_thresh: f64,
}

fn default_algorithm_type() -> String {
    "round_robin".to_string()
}
fn default_cache_size() -> usize {
    100
}
fn default_slots_thresh() -> f64 {
    0.05
}
fn default_block_thresh() -> f64 {
    0.05
}

impl SchedulerConfig {
    pub fn prefix_cache_config(&self) -> CacheAffinityConfig {
        CacheAffinityConfig {
            cache_capacity: self.cache_size,
            slots_thresh: self.slots_thresh,
            block_thresh: self.block_thresh,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossNodeConfig {
    #[serde(default = "default_discovery_interval_secs")]
    pub discovery_interval_secs: u64,
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    #[serde(default = "default_recover_retries")]
    pub recover_retries: u32,
    #[serde(default = "default_recover_retry_delay_secs")]
    pub recover_retry_delay_secs: u64,
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
    #[serde(default = "default_max_servers")]
    pub max_servers: usize,
    #[serde(default)]
    pub tls_enabled: bool,
    /// Per-call timeout for every Kubernetes API request issued by the
    /// controller.
    #[serde(default = "default_kube_call_timeout_secs")]
    pub kube_call_timeout_secs: u64,
    /// Number of retries after an initial failed Kubernetes API call before
    /// the failure is surfaced to the caller.
    #[serde(default = "default_kube_call_retries")]
    pub kube_call_retries: u32,
}

fn default_discovery_interval_secs() -> u64 {
    1
}
fn default_monitor_interval_secs() -> u64 {
    3
}
fn default_recover_retries() -> u32 {
    10
}
fn default_recover_retry_delay_secs() -> u64 {
    3
}
fn default_max_instances() -> u32 {
    1
}
fn default_max_servers() -> usize {
    1
}
fn default_kube_call_timeout_secs() -> u64 {
    3
}
fn default_kube_call_retries() -> u32 {
    2
}

impl Default for CrossNodeConfig {
    fn default() -> Self {
        Self {
            discovery_interval_secs: default_discovery_interval_secs(),
            monitor_interval_secs: default_monitor_interval_secs(),
            recover_retries: default_recover_retries(),
            recover_retry_delay_secs: default_recover_retry_delay_secs(),
            max_instances: default_max_instances(),
            max_servers: default_max_servers(),
            tls_enabled: false,
            kube_call_timeout_secs: default_kube_call_timeout_secs(),
            kube_call_retries: default_kube_call_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub cross_node: CrossNodeConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_status_file")]
    pub status_file: PathBuf,
}

fn default_status_file() -> PathBuf {
    PathBuf::from("/var/run/digs-coordinator/status.json")
}

impl CoordinatorConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: CoordinatorConfig = serde_yaml::from_str(&raw)?;
        Ok(config)
    }
}

/// CLI entrypoint surface. Per-field overrides read from the environment
/// take precedence over the config file for the knobs operators tune most.
#[derive(Debug, Parser)]
#[command(name = "digs-coordinator", about = "Routing scheduler and cross-node instance lifecycle controller")]
pub struct Cli {
    #[arg(long, env = "DIGS_CONFIG")]
    pub config: PathBuf,

    #[arg(long, env = "DIGS_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    #[arg(long, env = "DIGS_HTTP_BIND_ADDR")]
    pub http_bind_addr: Option<String>,

    #[arg(long, env = "DIGS_STATUS_FILE")]
    pub status_file: Option<PathBuf>,
}

impl clap::ValueEnum for LogFormat {
    fn value_variants<'a>() -> &'a [Self] {
        &[LogFormat::Pretty, LogFormat::Json]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            LogFormat::Pretty => clap::builder::PossibleValue::new("pretty"),
            LogFormat::Json => clap::builder::PossibleValue::new("json"),
        })
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

impl Cli {
    /// Loads the config file and applies CLI/env overrides over it.
    pub fn resolve(self) -> anyhow::Result<CoordinatorConfig> {
        let mut config = CoordinatorConfig::load(&self.config)?;
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(bind_addr) = self.http_bind_addr {
            config.http.bind_addr = bind_addr;
        }
        if let Some(status_file) = self.status_file {
            config.status_file = status_file;
        }
        Ok(config)
    }
}
