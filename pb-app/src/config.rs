//! primitive-bot configuration loader.

use pb_render::RenderConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub render: RenderSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Downloaded source images.
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    /// Rendered results waiting to be sent.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Append-only queue journal. Empty disables journaling.
    #[serde(default = "default_journal_path")]
    pub journal_path: Option<PathBuf>,
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("inputs")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_journal_path() -> Option<PathBuf> {
    Some(PathBuf::from("queue.journal"))
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            journal_path: default_journal_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LimitsConfig {
    /// Operations one user may have in the queue at once.
    #[serde(default = "default_operations_per_user")]
    pub operations_per_user: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_size")]
    pub max_size: u32,
}

fn default_operations_per_user() -> usize {
    5
}

fn default_max_iterations() -> u32 {
    2000
}

fn default_max_size() -> u32 {
    3840
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            operations_per_user: default_operations_per_user(),
            max_iterations: default_max_iterations(),
            max_size: default_max_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SessionsConfig {
    /// Idle time after which a session is terminated.
    #[serde(default = "default_session_timeout_seconds")]
    pub timeout_seconds: u64,
    /// How often the reaper looks for idle sessions.
    #[serde(default = "default_reap_interval_seconds")]
    pub reap_interval_seconds: u64,
}

fn default_session_timeout_seconds() -> u64 {
    30 * 60
}

fn default_reap_interval_seconds() -> u64 {
    5 * 60
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_session_timeout_seconds(),
            reap_interval_seconds: default_reap_interval_seconds(),
        }
    }
}

impl SessionsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "default_render_binary")]
    pub binary: PathBuf,
    /// Parallel workers inside one rendering. Defaults to available cores.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_render_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_render_binary() -> PathBuf {
    PathBuf::from("primitive")
}

fn default_render_timeout_seconds() -> u64 {
    900
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            binary: default_render_binary(),
            workers: None,
            timeout_seconds: default_render_timeout_seconds(),
        }
    }
}

impl BotConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::load_with_path(path).await?.0)
    }

    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let explicit = path.is_some();
        let path = path.unwrap_or_else(default_config_path);
        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::from_toml(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    config_path = %path.display(),
                    "no config file found; using defaults and environment"
                );
                Self::from_toml("")?
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok((cfg, path))
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !v.trim().is_empty() {
                self.telegram.bot_token = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var("PRIMITIVE_BOT_INPUT_DIR") {
            if !v.trim().is_empty() {
                self.storage.input_dir = PathBuf::from(v.trim());
            }
        }
        if let Ok(v) = std::env::var("PRIMITIVE_BOT_OUTPUT_DIR") {
            if !v.trim().is_empty() {
                self.storage.output_dir = PathBuf::from(v.trim());
            }
        }
        if let Ok(v) = std::env::var("PRIMITIVE_BOT_JOURNAL") {
            self.storage.journal_path = if v.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(v.trim()))
            };
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "telegram.bot_token is required (or set TELEGRAM_BOT_TOKEN)"
            ));
        }
        if self.limits.operations_per_user == 0 {
            return Err(anyhow::anyhow!("limits.operations_per_user must be > 0"));
        }
        if self.limits.max_iterations == 0 {
            return Err(anyhow::anyhow!("limits.max_iterations must be > 0"));
        }
        if self.limits.max_size < crate::menu::MIN_OUTPUT_SIZE {
            return Err(anyhow::anyhow!(
                "limits.max_size must be >= {}",
                crate::menu::MIN_OUTPUT_SIZE
            ));
        }
        let defaults = RenderConfig::default();
        if self.limits.max_iterations < defaults.iterations {
            return Err(anyhow::anyhow!(
                "limits.max_iterations must be >= {} (the default for new sessions)",
                defaults.iterations
            ));
        }
        if self.limits.max_size < defaults.output_size {
            return Err(anyhow::anyhow!(
                "limits.max_size must be >= {} (the default for new sessions)",
                defaults.output_size
            ));
        }
        if self.sessions.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("sessions.timeout_seconds must be > 0"));
        }
        if self.sessions.reap_interval_seconds == 0 {
            return Err(anyhow::anyhow!("sessions.reap_interval_seconds must be > 0"));
        }
        if self.render.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("render.timeout_seconds must be > 0"));
        }
        if self.render.workers == Some(0) {
            return Err(anyhow::anyhow!("render.workers must be > 0 when set"));
        }
        Ok(())
    }

    pub fn journal_path(&self) -> Option<&Path> {
        self.storage
            .journal_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".primitive-bot").join("config.toml")
}
