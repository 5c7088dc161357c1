use crate::config::{load_global_settings, ConfigError, Settings};
use crate::notify::{NotificationDispatcher, SlackNotifier};
use crate::orchestration::{Dispatch, EngineOptions, StageOutcome, WorkflowEngine};
use crate::presentation::HttpPresentationService;
use crate::provider::CliAgentGateway;
use crate::shared::logging::EngineLog;
use crate::store::{Participant, Workflow, WorkflowStore};
use std::path::Path;
use std::sync::Arc;

pub fn map_config_err(err: ConfigError) -> String {
    err.to_string()
}

pub fn load_settings(config_path: Option<&Path>) -> Result<Settings, String> {
    match config_path {
        Some(path) => crate::config::load_settings(path).map_err(map_config_err),
        None => load_global_settings().map_err(map_config_err),
    }
}

/// Wires the production collaborators: CLI agent, HTTP presentation service and, when
/// enabled, Slack notifications.
pub fn build_engine(settings: &Settings) -> Result<WorkflowEngine, String> {
    let state_root = settings.resolve_state_root().map_err(map_config_err)?;
    let log = EngineLog::new(&state_root);
    let store = WorkflowStore::open(&settings.database_path().map_err(map_config_err)?)
        .map_err(|e| e.to_string())?;
    let options = EngineOptions::from_settings(settings).map_err(map_config_err)?;

    let api_key = match settings.presentation_api_key() {
        Ok(key) => key,
        Err(err) => {
            log.runtime("warn", "presentation.api_key_missing", &err.to_string());
            String::new()
        }
    };
    let presentation = HttpPresentationService::new(settings.presentation.api_base.clone(), api_key);

    let slack = &settings.notifications.slack;
    let notifier = match (slack.enabled, slack.channel.as_deref()) {
        (true, Some(channel)) => {
            let token = settings.slack_bot_token().map_err(map_config_err)?;
            NotificationDispatcher::new(
                Arc::new(SlackNotifier::new(token, channel.to_string())),
                state_root.clone(),
            )
        }
        _ => NotificationDispatcher::disabled(state_root.clone()),
    };

    Ok(WorkflowEngine::new(
        store,
        Arc::new(CliAgentGateway::new(settings.agent.binary.clone())),
        Arc::new(presentation),
        notifier,
        log,
        options,
    ))
}

/// Splits `--flag value` and bare `--switch` options out of positional arguments.
#[derive(Debug, Default)]
pub struct ParsedArgs {
    pub positional: Vec<String>,
    values: Vec<(String, String)>,
    switches: Vec<String>,
}

impl ParsedArgs {
    pub fn parse(args: &[String], value_flags: &[&str], switch_flags: &[&str]) -> Result<Self, String> {
        let mut parsed = Self::default();
        let mut i = 0usize;
        while i < args.len() {
            let arg = &args[i];
            if value_flags.contains(&arg.as_str()) {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| format!("{arg} requires a value"))?;
                parsed.values.push((arg.clone(), value.clone()));
                i += 2;
                continue;
            }
            if switch_flags.contains(&arg.as_str()) {
                parsed.switches.push(arg.clone());
            } else if arg.starts_with("--") {
                return Err(format!("unexpected argument `{arg}`"));
            } else {
                parsed.positional.push(arg.clone());
            }
            i += 1;
        }
        Ok(parsed)
    }

    pub fn value(&self, flag: &str) -> Option<&str> {
        self.values
            .iter()
            .rev()
            .find(|(name, _)| name == flag)
            .map(|(_, value)| value.as_str())
    }

    pub fn values(&self, flag: &str) -> Vec<String> {
        self.values
            .iter()
            .filter(|(name, _)| name == flag)
            .map(|(_, value)| value.clone())
            .collect()
    }

    pub fn has(&self, flag: &str) -> bool {
        self.switches.iter().any(|name| name == flag)
    }
}

pub fn render_participant(participant: &Participant) -> String {
    format!(
        "participant_id={}\nname={}\nkind={}",
        participant.id,
        participant.name,
        participant.actor_kind()
    )
}

pub fn render_workflow(workflow: &Workflow) -> String {
    format!(
        "workflow_id={}\ntitle={}\ntype={}\nstatus={}\nrun_epoch={}",
        workflow.id, workflow.title, workflow.workflow_type, workflow.status, workflow.run_epoch
    )
}

/// A CLI process exits when the command returns, so it waits for the background stage
/// and reports the state it left behind.
pub fn finish_dispatch(engine: &WorkflowEngine, dispatch: Dispatch) -> Result<String, String> {
    let workflow_id = dispatch.workflow.id;
    let started = render_workflow(&dispatch.workflow);
    let Some(outcome) = dispatch.wait() else {
        return Ok(started);
    };
    let current = engine.workflow(workflow_id).map_err(|e| e.to_string())?;
    let outcome = match outcome {
        StageOutcome::Committed => "committed".to_string(),
        StageOutcome::Discarded(reason) => format!("discarded {reason}"),
        StageOutcome::Failed(error) => format!("failed error={error}"),
    };
    Ok(format!("{}\nstage_outcome={outcome}", render_workflow(&current)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parsed_args_split_flags_and_positionals() {
        let parsed = ParsedArgs::parse(
            &args(&["7", "--tag", "research", "Quarterly", "--tag", "slides", "--agent"]),
            &["--tag"],
            &["--agent"],
        )
        .expect("parse");
        assert_eq!(parsed.positional, args(&["7", "Quarterly"]));
        assert_eq!(parsed.values("--tag"), args(&["research", "slides"]));
        assert!(parsed.has("--agent"));
        assert_eq!(parsed.value("--missing"), None);
    }

    #[test]
    fn parsed_args_reject_unknown_and_dangling_flags() {
        let unknown = ParsedArgs::parse(&args(&["--nope"]), &[], &[]).expect_err("unknown");
        assert!(unknown.contains("--nope"));
        let dangling = ParsedArgs::parse(&args(&["--reason"]), &["--reason"], &[]).expect_err("dangling");
        assert!(dangling.contains("requires a value"));
    }
}
