//! JSON configuration file.
//!
//! The file lives at `<config_dir>/parley/config.json` unless `PARLEY_CONFIG`
//! points elsewhere. Missing sections and fields take their defaults, so an
//! empty object is a valid configuration.

use crate::error::{ConfigError, ConfigResult};
use crate::util::{config_dir, data_dir};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable overriding the configuration path.
pub const CONFIG_ENV: &str = "PARLEY_CONFIG";

/// Environment variable supplying the Telegram token.
pub const TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Telegram transport.
    pub telegram: TelegramConfig,
    /// Engine tuning.
    pub engine: EngineConfig,
    /// Storage locations.
    pub storage: StorageConfig,
}

/// Telegram transport settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Whether to start the Telegram transport.
    pub enabled: bool,
    /// Bot token. Falls back to `TELEGRAM_BOT_TOKEN`.
    pub token: Option<String>,
}

impl TelegramConfig {
    /// The configured token, or the one from the environment.
    #[must_use]
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var(TOKEN_ENV).ok().filter(|t| !t.trim().is_empty()))
    }
}

/// Engine tuning, in file units (seconds, days).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds between periodic snapshots of every session.
    pub persist_interval_secs: u64,
    /// Default length of an accept window, in seconds.
    pub accept_window_secs: u64,
    /// Sessions active within this many days are greeted on startup.
    pub reactivate_within_days: u64,
    /// Message sent to recently active users on shutdown.
    pub farewell_message: Option<String>,
    /// Text sent by the `help` command.
    pub help_text: String,
    /// Alert shown when a button of an expired message is pressed.
    pub expired_interaction_note: String,
    /// Queue capacity of each session actor.
    pub session_queue_capacity: usize,
    /// Maximum navigation steps applied for one hook.
    pub navigation_limit: usize,
    /// Leave every dropped state on `drop`.
    pub strict_drop: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            persist_interval_secs: 60,
            accept_window_secs: 600,
            reactivate_within_days: 30,
            farewell_message: Some(
                "Bot is restarting for maintenance. See you in a few minutes.".to_string(),
            ),
            help_text: "Use /home to start over and /back to leave the current step.".to_string(),
            expired_interaction_note: "message expired, buttons disabled".to_string(),
            session_queue_capacity: 64,
            navigation_limit: 32,
            strict_drop: false,
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `users.json` and `sessions/`.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: data_dir(),
        }
    }
}

impl StorageConfig {
    /// Directory of persisted sessions.
    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    /// Path of the known-users file.
    #[must_use]
    pub fn users_path(&self) -> PathBuf {
        self.data_dir.join("users.json")
    }
}

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    /// The bot runs, but probably not as intended.
    Warning,
    /// The bot cannot run with this configuration.
    Error,
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Severity.
    pub level: IssueLevel,
    /// Human-readable description.
    pub message: String,
}

impl ConfigIssue {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            IssueLevel::Warning => "warning",
            IssueLevel::Error => "error",
        };
        write!(f, "{level}: {}", self.message)
    }
}

impl BotConfig {
    /// Check the configuration for problems.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let engine = &self.engine;

        if self.telegram.enabled && self.telegram.resolve_token().is_none() {
            issues.push(ConfigIssue::error(format!(
                "telegram is enabled but no token is set (config or {TOKEN_ENV})"
            )));
        }
        if engine.persist_interval_secs == 0 {
            issues.push(ConfigIssue::error("engine.persist_interval_secs must be positive"));
        }
        if engine.session_queue_capacity == 0 {
            issues.push(ConfigIssue::error("engine.session_queue_capacity must be positive"));
        }
        if engine.navigation_limit == 0 {
            issues.push(ConfigIssue::error("engine.navigation_limit must be positive"));
        }
        if engine.accept_window_secs == 0 {
            issues.push(ConfigIssue::warning(
                "engine.accept_window_secs is 0, invitations close immediately",
            ));
        }
        if engine.reactivate_within_days == 0 {
            issues.push(ConfigIssue::warning(
                "engine.reactivate_within_days is 0, no session is greeted on restart",
            ));
        }
        if engine.help_text.trim().is_empty() {
            issues.push(ConfigIssue::warning("engine.help_text is empty"));
        }
        if self.storage.data_dir.as_os_str().is_empty() {
            issues.push(ConfigIssue::error("storage.data_dir is empty"));
        }
        issues
    }

    /// Turn the validation findings into an error if any of them is fatal.
    pub fn ensure_valid(&self) -> ConfigResult<()> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|i| i.level == IssueLevel::Error)
            .map(|i| i.message)
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::invalid(errors.join("; ")))
        }
    }
}

/// Path of the configuration file.
#[must_use]
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| config_dir().join("config.json"))
}

/// Load the configuration from the default path.
pub async fn load_config() -> ConfigResult<BotConfig> {
    load_config_from(&config_path()).await
}

/// Load the configuration from `path`. A missing file yields the defaults.
pub async fn load_config_from(path: &Path) -> ConfigResult<BotConfig> {
    if !tokio::fs::try_exists(path).await? {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(BotConfig::default());
    }
    let content = tokio::fs::read_to_string(path).await?;
    let config = serde_json::from_str(&content)?;
    debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Write `config` to `path`, creating parent directories.
pub async fn save_config(config: &BotConfig, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, content).await?;
    Ok(())
}

/// Write a default configuration to `path`.
///
/// Fails if the file exists and `force` is not set.
pub async fn init_config(path: &Path, force: bool) -> ConfigResult<BotConfig> {
    if !force && tokio::fs::try_exists(path).await? {
        return Err(ConfigError::invalid(format!(
            "{} already exists",
            path.display()
        )));
    }
    let config = BotConfig::default();
    save_config(&config, path).await?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid_without_telegram() {
        let config = BotConfig::default();
        assert!(!config.telegram.enabled);
        assert_eq!(config.engine.accept_window_secs, 600);
        assert_eq!(config.engine.navigation_limit, 32);
        assert!(config.ensure_valid().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: BotConfig =
            serde_json::from_str(r#"{"engine":{"strict_drop":true}}"#).unwrap();
        assert!(config.engine.strict_drop);
        assert_eq!(config.engine.persist_interval_secs, 60);
        assert_eq!(
            config.engine.expired_interaction_note,
            "message expired, buttons disabled"
        );
    }

    #[test]
    fn test_validate_reports_levels() {
        let mut config = BotConfig::default();
        config.telegram.enabled = true;
        config.telegram.token = Some("123:abc".into());
        config.engine.navigation_limit = 0;
        config.engine.help_text = String::new();

        let issues = config.validate();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].level, IssueLevel::Error);
        assert_eq!(issues[1].level, IssueLevel::Warning);
        assert!(issues[0].to_string().starts_with("error: engine.navigation_limit"));
        assert!(matches!(config.ensure_valid(), Err(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_init_save_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("parley").join("config.json");

        assert_eq!(load_config_from(&path).await.unwrap(), BotConfig::default());

        let mut config = init_config(&path, false).await.unwrap();
        assert!(init_config(&path, false).await.is_err());

        config.engine.help_text = "hi".into();
        config.storage.data_dir = tmp.path().join("data");
        save_config(&config, &path).await.unwrap();
        assert_eq!(load_config_from(&path).await.unwrap(), config);

        init_config(&path, true).await.unwrap();
        assert_eq!(
            load_config_from(&path).await.unwrap().engine.help_text,
            EngineConfig::default().help_text
        );
    }

    #[tokio::test]
    async fn test_malformed_file_is_a_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        tokio::fs::write(&path, "{ nope").await.unwrap();
        assert!(matches!(
            load_config_from(&path).await,
            Err(ConfigError::Parse(_))
        ));
    }
}
