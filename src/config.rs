//! Configuration loader and validator for task-herald.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable consulted when no `--config` flag is given.
pub const CONFIG_ENV: &str = "TASK_HERALD_CONFIG";
/// Looked up relative to the working directory.
pub const LOCAL_CONFIG: &str = "config.yaml";
pub const SYSTEM_CONFIG: &str = "/etc/task-herald/config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("No configuration file found (tried: {0})")]
    NotFound(String),
    #[error("Failed to read secret file {path}: {source}")]
    Secret {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// 0 disables the periodic `task sync`.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_notify_interval")]
    pub notify_interval_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Empty selects the built-in message template.
    #[serde(default)]
    pub notification_message: String,
    #[serde(default)]
    pub taskwarrior: Taskwarrior,
    pub ntfy: Ntfy,
    #[serde(default)]
    pub udas: Udas,
    #[serde(default)]
    pub http: Http,
}

/// How the `task` binary is invoked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Taskwarrior {
    #[serde(default = "default_task_command")]
    pub command: String,
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
}

impl Default for Taskwarrior {
    fn default() -> Self {
        Self {
            command: default_task_command(),
            timeout_secs: default_command_timeout(),
        }
    }
}

/// ntfy delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ntfy {
    pub url: String,
    pub topic: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub token_file: String,
    #[serde(default = "default_delivery_timeout")]
    pub timeout_secs: u64,
    /// Extra headers; values are templates rendered per task.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Names of the task attributes holding notification dates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Udas {
    #[serde(default = "default_notification_uda")]
    pub notification_date: String,
    #[serde(default)]
    pub overrides: Vec<String>,
}

impl Default for Udas {
    fn default() -> Self {
        Self {
            notification_date: default_notification_uda(),
            overrides: Vec::new(),
        }
    }
}

/// Optional local control API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Http {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default)]
    pub auth_token_file: String,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_listen(),
            auth_token: String::new(),
            auth_token_file: String::new(),
        }
    }
}

fn default_poll_interval() -> u64 {
    60
}
fn default_sync_interval() -> u64 {
    300
}
fn default_notify_interval() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".into()
}
fn default_task_command() -> String {
    "task".into()
}
fn default_command_timeout() -> u64 {
    30
}
fn default_delivery_timeout() -> u64 {
    10
}
fn default_notification_uda() -> String {
    "notification_date".into()
}
fn default_listen() -> String {
    "127.0.0.1:8080".into()
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// `None` when syncing is disabled.
    pub fn sync_interval(&self) -> Option<Duration> {
        (self.sync_interval_secs > 0).then(|| Duration::from_secs(self.sync_interval_secs))
    }

    pub fn notify_interval(&self) -> Duration {
        Duration::from_secs(self.notify_interval_secs)
    }

    /// `EnvFilter` directive for `log_level`; unknown levels fall back to info.
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.trim().to_ascii_lowercase().as_str() {
            "error" => "error",
            "warn" | "warning" => "warn",
            "debug" => "debug",
            "verbose" | "trace" => "trace",
            _ => "info",
        }
    }

    /// ntfy token, preferring the inline value over `token_file`.
    pub fn ntfy_token(&self) -> Result<Option<String>, ConfigError> {
        resolve_secret(&self.ntfy.token, &self.ntfy.token_file)
    }

    /// Bearer token for the control API, preferring the inline value.
    pub fn http_auth_token(&self) -> Result<Option<String>, ConfigError> {
        resolve_secret(&self.http.auth_token, &self.http.auth_token_file)
    }
}

fn resolve_secret(inline: &str, file: &str) -> Result<Option<String>, ConfigError> {
    if !inline.trim().is_empty() {
        return Ok(Some(inline.trim().to_string()));
    }
    if file.trim().is_empty() {
        return Ok(None);
    }
    let raw = fs::read_to_string(file).map_err(|source| ConfigError::Secret {
        path: file.to_string(),
        source,
    })?;
    let token = raw.trim();
    Ok((!token.is_empty()).then(|| token.to_string()))
}

/// Find the config file: explicit path, then `$TASK_HERALD_CONFIG`, then
/// `./config.yaml`, then `/etc/task-herald/config.yaml`.
pub fn locate(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let env = std::env::var(CONFIG_ENV).ok();
    locate_with(
        explicit,
        env.as_deref(),
        &[Path::new(LOCAL_CONFIG), Path::new(SYSTEM_CONFIG)],
    )
}

fn locate_with(
    explicit: Option<&Path>,
    env: Option<&str>,
    defaults: &[&Path],
) -> Result<PathBuf, ConfigError> {
    // An explicit choice is returned even if missing so the read error names it.
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = env.filter(|p| !p.trim().is_empty()) {
        return Ok(PathBuf::from(path));
    }
    defaults
        .iter()
        .find(|p| p.is_file())
        .map(|p| p.to_path_buf())
        .ok_or_else(|| {
            let tried: Vec<String> = defaults.iter().map(|p| p.display().to_string()).collect();
            ConfigError::NotFound(tried.join(", "))
        })
}

/// Load configuration from a YAML file and validate it.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.poll_interval_secs == 0 {
        return Err(ConfigError::Invalid("poll_interval_secs must be > 0"));
    }
    if cfg.notify_interval_secs == 0 {
        return Err(ConfigError::Invalid("notify_interval_secs must be > 0"));
    }
    if cfg.taskwarrior.command.trim().is_empty() {
        return Err(ConfigError::Invalid("taskwarrior.command must be non-empty"));
    }
    if cfg.taskwarrior.timeout_secs == 0 {
        return Err(ConfigError::Invalid("taskwarrior.timeout_secs must be > 0"));
    }
    if cfg.ntfy.url.trim().is_empty() {
        return Err(ConfigError::Invalid("ntfy.url must be non-empty"));
    }
    if cfg.ntfy.topic.trim().is_empty() {
        return Err(ConfigError::Invalid("ntfy.topic must be non-empty"));
    }
    if cfg.ntfy.timeout_secs == 0 {
        return Err(ConfigError::Invalid("ntfy.timeout_secs must be > 0"));
    }
    if cfg.udas.notification_date.trim().is_empty() {
        return Err(ConfigError::Invalid("udas.notification_date must be non-empty"));
    }
    if cfg.udas.overrides.iter().any(|name| name.trim().is_empty()) {
        return Err(ConfigError::Invalid("udas.overrides must not contain empty names"));
    }
    if cfg.http.enabled && cfg.http.listen.trim().is_empty() {
        return Err(ConfigError::Invalid("http.listen must be non-empty when http is enabled"));
    }
    Ok(())
}

/// Example configuration shipped with the docs.
pub fn example() -> &'static str {
    r#"poll_interval_secs: 60
sync_interval_secs: 300
notify_interval_secs: 5
log_level: info
notification_message: ""

taskwarrior:
  command: task
  timeout_secs: 30

ntfy:
  url: "https://ntfy.sh"
  topic: "my-tasks"
  token: ""
  timeout_secs: 10
  headers:
    X-Tags: "bell"
    X-Actions: 'view, Open, https://tasks.example.com/task/{{.UUID | urlquery}}'

udas:
  notification_date: notification_date
  overrides:
    - remind_early

http:
  enabled: false
  listen: "127.0.0.1:8080"
  auth_token: ""
"#
}
