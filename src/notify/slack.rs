use super::{Notification, Notifier, NotifyError};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SlackNotifier {
    agent: ureq::Agent,
    api_base: String,
    bot_token: String,
    channel: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackEnvelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackNotifier {
    pub fn new(bot_token: String, channel: String) -> Self {
        let api_base = std::env::var("DECKFLOW_SLACK_API_BASE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SLACK_API_BASE.to_string());
        Self::with_api_base(api_base, bot_token, channel, REQUEST_TIMEOUT)
    }

    fn with_api_base(
        api_base: String,
        bot_token: String,
        channel: String,
        timeout: Duration,
    ) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            api_base,
            bot_token,
            channel,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), path)
    }
}

impl Notifier for SlackNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let body = json!({
            "channel": self.channel,
            "text": notification.text(),
        });
        let envelope: SlackEnvelope = self
            .agent
            .post(&self.endpoint("chat.postMessage"))
            .set("Authorization", &format!("Bearer {}", self.bot_token))
            .send_json(body)
            .map_err(|e| NotifyError::Request(e.to_string()))?
            .into_json()
            .map_err(|e| NotifyError::Request(e.to_string()))?;
        if !envelope.ok {
            return Err(NotifyError::Rejected(
                envelope
                    .error
                    .unwrap_or_else(|| "chat.postMessage failed".to_string()),
            ));
        }
        Ok(())
    }
}
