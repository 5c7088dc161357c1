use deckflow::app::command_handlers::run_cli;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("config.yaml");
    fs::write(
        &path,
        format!(
            "state_root: {}\nstale_run:\n  timeout_seconds: 600\n",
            dir.join("state").display()
        ),
    )
    .expect("write config");
    path
}

fn cli(config: &Path, args: &[&str]) -> Result<String, String> {
    let mut argv = vec!["--config".to_string(), config.display().to_string()];
    argv.extend(args.iter().map(|s| s.to_string()));
    run_cli(argv)
}

fn field(output: &str, key: &str) -> String {
    output
        .lines()
        .find_map(|line| line.strip_prefix(&format!("{key}=")))
        .unwrap_or_else(|| panic!("missing `{key}` in:\n{output}"))
        .to_string()
}

#[test]
fn help_and_unknown_commands() {
    let help = run_cli(Vec::new()).expect("help");
    assert!(help.starts_with("Usage: deckflow"));
    assert!(help.contains("workflow approve"));

    let temp = tempdir().expect("tempdir");
    let config = write_config(temp.path());
    let err = cli(&config, &["deploy"]).expect_err("unknown");
    assert_eq!(err, "unknown command `deploy`");
    let err = run_cli(vec!["--config".to_string()]).expect_err("dangling flag");
    assert!(err.contains("--config requires a path"));
}

#[test]
fn participants_and_requests_round_trip_through_the_store() {
    let temp = tempdir().expect("tempdir");
    let config = write_config(temp.path());

    let added = cli(&config, &["participant", "add", "Alice"]).expect("add alice");
    assert!(added.starts_with("participant added"));
    let alice = field(&added, "participant_id");
    assert_eq!(field(&added, "kind"), "human");
    let bot = cli(&config, &["participant", "add", "Deck Bot", "--agent"]).expect("add bot");
    assert_eq!(field(&bot, "kind"), "agent");

    let listed = cli(&config, &["participant", "list"]).expect("list");
    assert_eq!(listed.lines().count(), 2);
    assert!(listed.contains("Deck Bot"));

    let request = cli(
        &config,
        &[
            "request",
            "add",
            &alice,
            "Quarterly deck",
            "--description",
            "Revenue review",
            "--tag",
            "slides",
            "--tag",
            "research",
        ],
    )
    .expect("request");
    assert_eq!(field(&request, "status"), "open");
    assert_eq!(field(&request, "tags"), "slides,research");

    assert!(temp.path().join("state/deckflow.sqlite3").exists());
}

#[test]
fn human_collaboration_completes_through_the_cli() {
    let temp = tempdir().expect("tempdir");
    let config = write_config(temp.path());
    let alice = field(
        &cli(&config, &["participant", "add", "Alice"]).expect("alice"),
        "participant_id",
    );
    let bob = field(
        &cli(&config, &["participant", "add", "Bob"]).expect("bob"),
        "participant_id",
    );
    let request = field(
        &cli(&config, &["request", "add", &alice, "Policy audit"]).expect("request"),
        "request_id",
    );

    let collab = cli(&config, &["workflow", "collab", &request, &bob]).expect("collab");
    let workflow = field(&collab, "workflow_id");
    assert_eq!(field(&collab, "status"), "collaborating");
    assert_eq!(field(&collab, "type"), "compliance_review");
    assert!(!collab.contains("stage_outcome="));

    let listed = cli(&config, &["workflow", "list", &bob]).expect("list");
    assert!(listed.contains("Policy audit"));

    let chat = cli(&config, &["workflow", "chat", &workflow, &alice, "Draft is ready"]).expect("chat");
    assert_eq!(field(&chat, "status"), "collaborating");

    let first = cli(&config, &["workflow", "complete", &workflow, &alice]).expect("alice ready");
    assert_eq!(field(&first, "status"), "collaborating");
    let second = cli(&config, &["workflow", "complete", &workflow, &bob]).expect("bob ready");
    assert_eq!(field(&second, "status"), "completed");

    let shown = cli(&config, &["workflow", "show", &workflow, &alice]).expect("show");
    let detail: serde_json::Value = serde_json::from_str(&shown).expect("json detail");
    assert_eq!(detail["workflow"]["status"], "completed");
    assert_eq!(detail["approvals"].as_array().map(Vec::len), Some(2));
    assert!(detail["messages"]
        .as_array()
        .expect("messages")
        .iter()
        .any(|m| m["body"] == "Draft is ready"));

    let err = cli(&config, &["workflow", "cancel", &workflow, &alice]).expect_err("not running");
    assert!(err.contains("cancel is not allowed"));

    let deleted = cli(&config, &["workflow", "delete", &workflow, &alice]).expect("delete");
    assert!(deleted.starts_with("workflow deleted"));
    let err = cli(&config, &["workflow", "show", &workflow, &alice]).expect_err("gone");
    assert!(err.contains("not found"));
}

#[test]
fn argument_errors_are_reported_as_usage() {
    let temp = tempdir().expect("tempdir");
    let config = write_config(temp.path());
    let err = cli(&config, &["workflow", "approve", "1"]).expect_err("missing actor");
    assert!(err.starts_with("usage: workflow approve"));
    let err = cli(&config, &["workflow", "approve", "1", "2", "--tone", "grim"]).expect_err("tone");
    assert!(err.contains("unknown tone"));
    let err = cli(&config, &["workflow", "chat", "1", "2", "hi", "--ask-agent", "--no-agent"])
        .expect_err("exclusive");
    assert!(err.contains("mutually exclusive"));
    let err = cli(&config, &["participant", "add"]).expect_err("no name");
    assert!(err.starts_with("usage: participant add"));
    let sweep = cli(&config, &["sweep"]).expect("sweep");
    assert_eq!(sweep, "no stale runs");
}
