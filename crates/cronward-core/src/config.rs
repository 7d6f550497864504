use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_NAME: &str = "cronward";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_MAX_PROCESSES: u32 = 1;

/// Top-level config (cronward.toml + CRONWARD_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronwardConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    /// Jobs registered at startup, in declaration order.
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Reported by `GET /` as `name`.
    #[serde(default = "default_name")]
    pub name: String,
    /// Root directory for run markers; one subdirectory per job.
    #[serde(default = "default_run_dir")]
    pub run_dir: String,
    /// Clock used to evaluate cron expressions.
    #[serde(default)]
    pub timezone: TimeZoneSetting,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            run_dir: default_run_dir(),
            timezone: TimeZoneSetting::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeZoneSetting {
    /// The host's local time, like classic cron.
    #[default]
    Local,
    Utc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// When false the status API is not started.
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// A shell-command job declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobConfig {
    pub name: String,
    pub command: String,
    /// Five-field cron expression or `@daily`-style macro. Absent = dormant.
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default = "default_max_processes")]
    pub max_processes: u32,
}

fn bool_true() -> bool {
    true
}
fn default_name() -> String {
    DEFAULT_NAME.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_max_processes() -> u32 {
    DEFAULT_MAX_PROCESSES
}
fn default_run_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronward/run", home)
}

impl CronwardConfig {
    /// Load config from a TOML file with CRONWARD_* env var overrides.
    ///
    /// Nested keys use a double underscore: `CRONWARD_HTTP__PORT=9090`
    /// overrides `http.port`. A missing file yields the defaults.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.cronward/cronward.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CronwardConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CRONWARD_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

pub fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronward/cronward.toml", home)
}
