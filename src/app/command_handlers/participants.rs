use crate::app::command_support::{render_participant, ParsedArgs};
use crate::orchestration::WorkflowEngine;

pub fn cmd_participant(engine: &WorkflowEngine, args: &[String]) -> Result<String, String> {
    if args.is_empty() {
        return Err("usage: participant <add|list> ...".to_string());
    }

    match args[0].as_str() {
        "add" => {
            let parsed = ParsedArgs::parse(&args[1..], &["--slack"], &["--agent"])?;
            if parsed.positional.len() != 1 {
                return Err(
                    "usage: participant add <name> [--agent] [--slack <user_id>]".to_string(),
                );
            }
            let participant = engine
                .register_participant(
                    &parsed.positional[0],
                    parsed.has("--agent"),
                    parsed.value("--slack"),
                )
                .map_err(|e| e.to_string())?;
            Ok(format!("participant added\n{}", render_participant(&participant)))
        }
        "list" => {
            if args.len() != 1 {
                return Err("usage: participant list".to_string());
            }
            let participants = engine.participants().map_err(|e| e.to_string())?;
            Ok(participants
                .iter()
                .map(|p| format!("{}\t{}\t{}", p.id, p.actor_kind(), p.name))
                .collect::<Vec<_>>()
                .join("\n"))
        }
        other => Err(format!("unknown participant subcommand `{other}`")),
    }
}
