use crate::app::command_support::{finish_dispatch, render_workflow, ParsedArgs};
use crate::orchestration::{CompletionAction, ReviewAction, WorkflowEngine};
use crate::shared::ids::{ParticipantId, WorkRequestId, WorkflowId};
use crate::store::{GenerationOptions, Tone, Verbosity};

pub fn cmd_workflow(engine: &WorkflowEngine, args: &[String]) -> Result<String, String> {
    if args.is_empty() {
        return Err(
            "usage: workflow <create|collab|list|show|research|approve|refine|chat|complete|generate|cancel|retry|delete> ..."
                .to_string(),
        );
    }
    let rest = &args[1..];

    match args[0].as_str() {
        "create" => {
            if rest.len() != 2 {
                return Err("usage: workflow create <owner_id> <topic>".to_string());
            }
            let owner = ParticipantId::parse(&rest[0])?;
            let dispatch = engine
                .create_research_workflow(owner, &rest[1])
                .map_err(|e| e.to_string())?;
            finish_dispatch(engine, dispatch)
        }
        "collab" => {
            if rest.len() != 2 {
                return Err("usage: workflow collab <request_id> <collaborator_id>".to_string());
            }
            let request = WorkRequestId::parse(&rest[0])?;
            let collaborator = ParticipantId::parse(&rest[1])?;
            let dispatch = engine
                .create_collaboration(request, collaborator)
                .map_err(|e| e.to_string())?;
            finish_dispatch(engine, dispatch)
        }
        "list" => {
            if rest.len() != 1 {
                return Err("usage: workflow list <participant_id>".to_string());
            }
            let participant = ParticipantId::parse(&rest[0])?;
            let workflows = engine
                .list_workflows(participant)
                .map_err(|e| e.to_string())?;
            Ok(workflows
                .iter()
                .map(|w| format!("{}\t{}\t{}\t{}", w.id, w.status, w.workflow_type, w.title))
                .collect::<Vec<_>>()
                .join("\n"))
        }
        "show" => {
            let (workflow_id, viewer) = workflow_and_actor(rest, "show")?;
            let detail = engine
                .workflow_detail(workflow_id, viewer)
                .map_err(|e| e.to_string())?;
            serde_json::to_string_pretty(&detail)
                .map_err(|e| format!("failed to encode workflow detail: {e}"))
        }
        "research" => {
            let (workflow_id, actor) = workflow_and_actor(rest, "research")?;
            let dispatch = engine
                .start_research(workflow_id, actor)
                .map_err(|e| e.to_string())?;
            finish_dispatch(engine, dispatch)
        }
        "approve" => {
            let parsed = ParsedArgs::parse(
                rest,
                &["--slides", "--tone", "--verbosity", "--instructions"],
                &[],
            )?;
            let (workflow_id, actor) = workflow_and_actor(&parsed.positional, "approve")?;
            let options = GenerationOptions {
                slide_count: parsed
                    .value("--slides")
                    .map(|raw| {
                        raw.parse::<u32>()
                            .map_err(|_| format!("--slides must be a positive integer (got `{raw}`)"))
                    })
                    .transpose()?,
                tone: parsed.value("--tone").map(Tone::parse).transpose()?,
                verbosity: parsed.value("--verbosity").map(Verbosity::parse).transpose()?,
                instructions: parsed.value("--instructions").map(str::to_string),
            };
            let dispatch = engine
                .submit_review(workflow_id, actor, ReviewAction::Approve { options })
                .map_err(|e| e.to_string())?;
            finish_dispatch(engine, dispatch)
        }
        "refine" => {
            if rest.len() != 3 {
                return Err("usage: workflow refine <workflow_id> <actor_id> <feedback>".to_string());
            }
            let (workflow_id, actor) = workflow_and_actor(&rest[..2], "refine")?;
            let dispatch = engine
                .submit_review(
                    workflow_id,
                    actor,
                    ReviewAction::Refine {
                        feedback: rest[2].clone(),
                    },
                )
                .map_err(|e| e.to_string())?;
            finish_dispatch(engine, dispatch)
        }
        "chat" => {
            let parsed = ParsedArgs::parse(rest, &[], &["--ask-agent", "--no-agent"])?;
            if parsed.positional.len() != 3 {
                return Err(
                    "usage: workflow chat <workflow_id> <actor_id> <message> [--ask-agent|--no-agent]"
                        .to_string(),
                );
            }
            let (workflow_id, actor) = workflow_and_actor(&parsed.positional[..2], "chat")?;
            let ask_agent = match (parsed.has("--ask-agent"), parsed.has("--no-agent")) {
                (true, true) => {
                    return Err("--ask-agent and --no-agent are mutually exclusive".to_string())
                }
                (true, false) => Some(true),
                (false, true) => Some(false),
                (false, false) => None,
            };
            let dispatch = engine
                .post_message(workflow_id, actor, &parsed.positional[2], ask_agent)
                .map_err(|e| e.to_string())?;
            finish_dispatch(engine, dispatch)
        }
        "complete" => {
            let parsed = ParsedArgs::parse(rest, &[], &["--reopen"])?;
            let (workflow_id, actor) = workflow_and_actor(&parsed.positional, "complete")?;
            let action = if parsed.has("--reopen") {
                CompletionAction::Reopen
            } else {
                CompletionAction::MarkReady
            };
            let workflow = engine
                .mark_completion(workflow_id, actor, action)
                .map_err(|e| e.to_string())?;
            Ok(render_workflow(&workflow))
        }
        "generate" => {
            let parsed = ParsedArgs::parse(rest, &["--instructions"], &[])?;
            let (workflow_id, actor) = workflow_and_actor(&parsed.positional, "generate")?;
            let dispatch = engine
                .generate_from_chat(workflow_id, actor, parsed.value("--instructions"))
                .map_err(|e| e.to_string())?;
            finish_dispatch(engine, dispatch)
        }
        "cancel" => {
            let parsed = ParsedArgs::parse(rest, &["--reason"], &[])?;
            let (workflow_id, actor) = workflow_and_actor(&parsed.positional, "cancel")?;
            let workflow = engine
                .cancel_run(workflow_id, actor, parsed.value("--reason"))
                .map_err(|e| e.to_string())?;
            Ok(format!("run cancelled\n{}", render_workflow(&workflow)))
        }
        "retry" => {
            let (workflow_id, actor) = workflow_and_actor(rest, "retry")?;
            let dispatch = engine
                .retry_run(workflow_id, actor)
                .map_err(|e| e.to_string())?;
            finish_dispatch(engine, dispatch)
        }
        "delete" => {
            let (workflow_id, actor) = workflow_and_actor(rest, "delete")?;
            engine
                .delete_workflow(workflow_id, actor)
                .map_err(|e| e.to_string())?;
            Ok(format!("workflow deleted\nworkflow_id={workflow_id}"))
        }
        other => Err(format!("unknown workflow subcommand `{other}`")),
    }
}

fn workflow_and_actor(
    args: &[String],
    subcommand: &str,
) -> Result<(WorkflowId, ParticipantId), String> {
    if args.len() != 2 {
        return Err(format!(
            "usage: workflow {subcommand} <workflow_id> <participant_id>"
        ));
    }
    Ok((WorkflowId::parse(&args[0])?, ParticipantId::parse(&args[1])?))
}
