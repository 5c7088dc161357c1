#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Participant,
    Request,
    Workflow,
    Sweep,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "participant" => CliVerb::Participant,
        "request" => CliVerb::Request,
        "workflow" => CliVerb::Workflow,
        "sweep" => CliVerb::Sweep,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    [
        "Usage: deckflow [--config <path>] <command> ...",
        "",
        "Commands:",
        "  participant add <name> [--agent] [--slack <user_id>]",
        "                                       Register a human or agent participant",
        "  participant list                     List participants",
        "  request add <requester_id> <title> [--description <text>] [--tag <tag> ...] [--parent <workflow_id>]",
        "                                       Open a work request",
        "  workflow create <owner_id> <topic>   Create a presentation workflow and start research",
        "  workflow collab <request_id> <collaborator_id>",
        "                                       Accept a work request as a collaboration",
        "  workflow list <participant_id>       List workflows a participant belongs to",
        "  workflow show <workflow_id> <viewer_id>",
        "                                       Print steps, events, messages and approvals",
        "  workflow research <workflow_id> <actor_id>",
        "                                       Start agent research from a collaboration",
        "  workflow approve <workflow_id> <actor_id> [--slides <n>] [--tone <tone>] [--verbosity <v>] [--instructions <text>]",
        "                                       Approve research and generate the presentation",
        "  workflow refine <workflow_id> <actor_id> <feedback>",
        "                                       Request another research round",
        "  workflow chat <workflow_id> <actor_id> <message> [--ask-agent|--no-agent]",
        "                                       Post a chat message",
        "  workflow complete <workflow_id> <actor_id> [--reopen]",
        "                                       Mark a collaboration ready (or reopen it)",
        "  workflow generate <workflow_id> <actor_id> [--instructions <text>]",
        "                                       Generate from chat context",
        "  workflow cancel <workflow_id> <actor_id> [--reason <text>]",
        "                                       Cancel the active run",
        "  workflow retry <workflow_id> <actor_id>",
        "                                       Retry a failed run",
        "  workflow delete <workflow_id> <actor_id>",
        "                                       Delete a workflow that is not running",
        "  sweep                                Fail running workflows that have gone stale",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

pub(crate) fn help_text() -> String {
    cli_help_lines().join("\n")
}
