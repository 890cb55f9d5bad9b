use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Get all overrides as a map of setting key -> env var name.
    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub flusher: FlusherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
    /// File the settings were read from; `None` when running on defaults.
    #[serde(skip)]
    pub loaded_from: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,
    /// Database file holding the `usage_queue` table (sqlite backend only).
    #[serde(default = "default_queue_path")]
    pub path: PathBuf,
    /// Server holding the queue list (redis backend only).
    #[serde(default = "default_queue_url")]
    pub url: String,
    /// Fixed, process-wide queue name shared with the producers.
    #[serde(default = "default_queue_key")]
    pub key: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            path: default_queue_path(),
            url: default_queue_url(),
            key: default_queue_key(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    Memory,
    #[default]
    Sqlite,
    Redis,
    Disabled,
}

impl std::fmt::Display for QueueBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Sqlite => write!(f, "sqlite"),
            Self::Redis => write!(f, "redis"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

impl FromStr for QueueBackend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            "redis" => Ok(Self::Redis),
            "disabled" | "none" | "off" => Ok(Self::Disabled),
            _ => Err(format!("Unknown queue backend: {s}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlusherConfig {
    /// Maximum number of items popped per run.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub dead_letter: DeadLetterPolicy,
}

impl Default for FlusherConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            interval_secs: default_interval_secs(),
            dead_letter: DeadLetterPolicy::default(),
        }
    }
}

impl FlusherConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// What happens to a batch whose bulk insert failed.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterPolicy {
    /// Log and discard.
    #[default]
    Drop,
    /// Push every entry back onto the queue tail.
    Requeue,
    /// Write every entry to the `usage_dead_letter` table.
    Table,
}

impl std::fmt::Display for DeadLetterPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Drop => write!(f, "drop"),
            Self::Requeue => write!(f, "requeue"),
            Self::Table => write!(f, "table"),
        }
    }
}

impl FromStr for DeadLetterPolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "drop" => Ok(Self::Drop),
            "requeue" => Ok(Self::Requeue),
            "table" | "dead_letter_table" => Ok(Self::Table),
            _ => Err(format!("Unknown dead-letter policy: {s}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_queue_path() -> PathBuf {
    PathBuf::from("usage-queue.db")
}
fn default_queue_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}
fn default_queue_key() -> String {
    "usage:logs:queue".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("gaud.db")
}
const fn default_batch_size() -> usize {
    500
}
const fn default_interval_secs() -> u64 {
    15
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `FLUSHER_` takes precedence over
    /// the file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let mut config: Config = toml::from_str(&content)?;
            config.loaded_from = Some(path.to_path_buf());
            config
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the flusher cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.flusher.batch_size == 0 {
            anyhow::bail!("flusher.batch_size must be at least 1");
        }
        if self.flusher.interval_secs == 0 {
            anyhow::bail!("flusher.interval_secs must be at least 1");
        }
        if self.queue.key.is_empty() {
            anyhow::bail!("queue.key must not be empty");
        }
        if self.queue.backend == QueueBackend::Redis && self.queue.url.is_empty() {
            anyhow::bail!("queue.url must be set for the redis backend");
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))
    }

    /// Render the effective configuration for `--print-config`: the TOML
    /// followed by a comment per setting taken from the environment.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut out = self.to_toml()?;
        let mut overridden: Vec<_> = self.env_overrides.all().iter().collect();
        if !overridden.is_empty() {
            overridden.sort();
            out.push_str("\n# Overridden by environment:\n");
            for (key, env_var) in overridden {
                out.push_str(&format!("#   {key} <- {env_var}\n"));
            }
        }
        Ok(out)
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }
        macro_rules! env_path {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = PathBuf::from(val);
                    ov.record($key, $env);
                }
            };
        }

        // -- Queue --
        env_parse!("queue.backend", "FLUSHER_QUEUE_BACKEND", self.queue.backend);
        env_path!("queue.path", "FLUSHER_QUEUE_PATH", self.queue.path);
        env_str!("queue.url", "FLUSHER_QUEUE_URL", self.queue.url);
        env_str!("queue.key", "FLUSHER_QUEUE_KEY", self.queue.key);

        // -- Database --
        env_path!("database.path", "FLUSHER_DATABASE_PATH", self.database.path);

        // -- Flusher --
        env_parse!("flusher.batch_size", "FLUSHER_BATCH_SIZE", self.flusher.batch_size);
        env_parse!(
            "flusher.interval_secs",
            "FLUSHER_INTERVAL_SECS",
            self.flusher.interval_secs
        );
        env_parse!(
            "flusher.dead_letter",
            "FLUSHER_DEAD_LETTER",
            self.flusher.dead_letter
        );

        // -- Logging --
        env_str!("logging.level", "FLUSHER_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "FLUSHER_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
