use crate::app::command_support::ParsedArgs;
use crate::orchestration::WorkflowEngine;
use crate::shared::ids::{ParticipantId, WorkflowId};

const ADD_USAGE: &str = "usage: request add <requester_id> <title> [--description <text>] \
    [--tag <tag> ...] [--parent <workflow_id>]";

pub fn cmd_request(engine: &WorkflowEngine, args: &[String]) -> Result<String, String> {
    if args.is_empty() {
        return Err("usage: request add ...".to_string());
    }

    match args[0].as_str() {
        "add" => {
            let parsed =
                ParsedArgs::parse(&args[1..], &["--description", "--tag", "--parent"], &[])?;
            if parsed.positional.len() != 2 {
                return Err(ADD_USAGE.to_string());
            }
            let requester = ParticipantId::parse(&parsed.positional[0])?;
            let parent = parsed.value("--parent").map(WorkflowId::parse).transpose()?;
            let request = engine
                .submit_work_request(
                    requester,
                    &parsed.positional[1],
                    parsed.value("--description").unwrap_or_default(),
                    &parsed.values("--tag"),
                    parent,
                )
                .map_err(|e| e.to_string())?;
            Ok(format!(
                "request added\nrequest_id={}\nstatus={}\ntags={}",
                request.id,
                request.status,
                request.capability_tags.join(",")
            ))
        }
        other => Err(format!("unknown request subcommand `{other}`")),
    }
}
