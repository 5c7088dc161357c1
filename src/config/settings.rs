use super::{default_state_root_path, ConfigError, ARTIFACTS_DIR_NAME, DATABASE_FILE_NAME};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const STALE_RUN_TIMEOUT_FLOOR_SECONDS: u64 = 180;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub state_root: Option<PathBuf>,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub presentation: PresentationSettings,
    #[serde(default)]
    pub stale_run: StaleRunSettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSettings {
    #[serde(default = "default_agent_binary")]
    pub binary: String,
    #[serde(default = "default_call_timeout_seconds")]
    pub call_timeout_seconds: u64,
    #[serde(default = "default_reconcile_timeout_seconds")]
    pub reconcile_timeout_seconds: u64,
    #[serde(default = "default_chat_timeout_seconds")]
    pub chat_timeout_seconds: u64,
    #[serde(default = "default_chat_context_messages")]
    pub chat_context_messages: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            binary: default_agent_binary(),
            call_timeout_seconds: default_call_timeout_seconds(),
            reconcile_timeout_seconds: default_reconcile_timeout_seconds(),
            chat_timeout_seconds: default_chat_timeout_seconds(),
            chat_context_messages: default_chat_context_messages(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PresentationSettings {
    #[serde(default = "default_presentation_api_base")]
    pub api_base: String,
    #[serde(default = "default_presentation_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_deadline_seconds")]
    pub poll_deadline_seconds: u64,
}

impl Default for PresentationSettings {
    fn default() -> Self {
        Self {
            api_base: default_presentation_api_base(),
            api_key_env: default_presentation_api_key_env(),
            output_dir: None,
            poll_interval_ms: default_poll_interval_ms(),
            poll_deadline_seconds: default_poll_deadline_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StaleRunSettings {
    #[serde(default = "default_stale_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for StaleRunSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_stale_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationSettings {
    #[serde(default)]
    pub slack: SlackNotificationSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SlackNotificationSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default = "default_slack_bot_token_env")]
    pub bot_token_env: String,
}

impl Default for SlackNotificationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            channel: None,
            bot_token_env: default_slack_bot_token_env(),
        }
    }
}

fn default_agent_binary() -> String {
    "openclaw".to_string()
}

fn default_call_timeout_seconds() -> u64 {
    300
}

fn default_reconcile_timeout_seconds() -> u64 {
    120
}

fn default_chat_timeout_seconds() -> u64 {
    180
}

fn default_chat_context_messages() -> usize {
    12
}

fn default_presentation_api_base() -> String {
    "https://api.slidespeak.co/api/v1".to_string()
}

fn default_presentation_api_key_env() -> String {
    "SLIDESPEAK_API_KEY".to_string()
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_poll_deadline_seconds() -> u64 {
    300
}

fn default_stale_timeout_seconds() -> u64 {
    330
}

fn default_slack_bot_token_env() -> String {
    "SLACK_BOT_TOKEN".to_string()
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(root) = &self.state_root {
            if !root.is_absolute() {
                return Err(ConfigError::Settings(
                    "`state_root` must be an absolute path".to_string(),
                ));
            }
        }
        if self.agent.binary.trim().is_empty() {
            return Err(ConfigError::Settings(
                "`agent.binary` must be non-empty".to_string(),
            ));
        }
        for (field, value) in [
            ("agent.call_timeout_seconds", self.agent.call_timeout_seconds),
            (
                "agent.reconcile_timeout_seconds",
                self.agent.reconcile_timeout_seconds,
            ),
            ("agent.chat_timeout_seconds", self.agent.chat_timeout_seconds),
            (
                "presentation.poll_interval_ms",
                self.presentation.poll_interval_ms,
            ),
            (
                "presentation.poll_deadline_seconds",
                self.presentation.poll_deadline_seconds,
            ),
            ("stale_run.timeout_seconds", self.stale_run.timeout_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::Settings(format!("`{field}` must be >= 1")));
            }
        }
        if self.agent.chat_context_messages == 0 {
            return Err(ConfigError::Settings(
                "`agent.chat_context_messages` must be >= 1".to_string(),
            ));
        }
        if self.presentation.poll_interval_ms > self.presentation.poll_deadline_seconds * 1000 {
            return Err(ConfigError::Settings(
                "`presentation.poll_interval_ms` must not exceed the poll deadline".to_string(),
            ));
        }
        if self.presentation.api_base.trim().is_empty() {
            return Err(ConfigError::Settings(
                "`presentation.api_base` must be non-empty".to_string(),
            ));
        }
        let slack = &self.notifications.slack;
        if slack.enabled
            && slack
                .channel
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .is_empty()
        {
            return Err(ConfigError::Settings(
                "`notifications.slack.channel` is required when slack notifications are enabled"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn resolve_state_root(&self) -> Result<PathBuf, ConfigError> {
        match &self.state_root {
            Some(root) => Ok(root.clone()),
            None => default_state_root_path(),
        }
    }

    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.resolve_state_root()?.join(DATABASE_FILE_NAME))
    }

    pub fn artifacts_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.presentation.output_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(self.resolve_state_root()?.join(ARTIFACTS_DIR_NAME)),
        }
    }

    pub fn effective_stale_timeout_seconds(&self) -> u64 {
        self.stale_run
            .timeout_seconds
            .max(STALE_RUN_TIMEOUT_FLOOR_SECONDS)
    }

    pub fn presentation_api_key(&self) -> Result<String, ConfigError> {
        read_secret(&self.presentation.api_key_env)
    }

    pub fn slack_bot_token(&self) -> Result<String, ConfigError> {
        read_secret(&self.notifications.slack.bot_token_env)
    }
}

fn read_secret(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingSecret {
            name: name.to_string(),
        })
}
