use crate::app::cli::{help_text, parse_cli_verb, CliVerb};
use crate::app::command_support::{build_engine, load_settings, render_workflow};
use crate::orchestration::WorkflowEngine;
use std::path::PathBuf;

pub mod participants;
pub mod requests;
pub mod workflows;

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    let (config_path, args) = split_config_flag(args)?;
    if args.is_empty() {
        return Ok(help_text());
    }

    let verb = parse_cli_verb(args[0].as_str());
    if verb == CliVerb::Unknown {
        return Err(format!("unknown command `{}`", args[0]));
    }
    let settings = load_settings(config_path.as_deref())?;
    let engine = build_engine(&settings)?;
    let result = dispatch_verb(&engine, verb, &args);
    engine.flush_notifications();
    result
}

fn dispatch_verb(engine: &WorkflowEngine, verb: CliVerb, args: &[String]) -> Result<String, String> {
    match verb {
        CliVerb::Participant => participants::cmd_participant(engine, &args[1..]),
        CliVerb::Request => requests::cmd_request(engine, &args[1..]),
        CliVerb::Workflow => workflows::cmd_workflow(engine, &args[1..]),
        CliVerb::Sweep => {
            let failed = engine.sweep_stale_runs().map_err(|e| e.to_string())?;
            if failed.is_empty() {
                return Ok("no stale runs".to_string());
            }
            Ok(failed
                .iter()
                .map(render_workflow)
                .collect::<Vec<_>>()
                .join("\n\n"))
        }
        CliVerb::Unknown => Err(format!("unknown command `{}`", args[0])),
    }
}

fn split_config_flag(args: Vec<String>) -> Result<(Option<PathBuf>, Vec<String>), String> {
    match args.first().map(String::as_str) {
        Some("--config") => {
            let path = args
                .get(1)
                .ok_or_else(|| "--config requires a path".to_string())?;
            Ok((Some(PathBuf::from(path)), args[2..].to_vec()))
        }
        _ => Ok((None, args)),
    }
}
