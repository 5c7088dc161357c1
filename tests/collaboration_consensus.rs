mod support;

use deckflow::orchestration::{CompletionAction, OrchestratorError, StageOutcome};
use deckflow::store::{
    ActorKind, ApprovalStatus, EventKind, StepStatus, StepType, StoreError, WorkRequestStatus,
    WorkflowStatus, WorkflowType,
};
use deckflow::shared::ids::WorkRequestId;
use support::{CallKind, Harness};

fn request_status(h: &Harness, id: WorkRequestId) -> WorkRequestStatus {
    h.engine
        .store()
        .read(|tx| Ok::<_, StoreError>(tx.work_request(id)?))
        .expect("read request")
        .expect("request exists")
        .status
}

#[test]
fn two_humans_must_both_be_ready_before_completion() {
    let h = Harness::new();
    let alice = h.human("Alice");
    let bob = h.human("Bob");
    let request = h
        .engine
        .submit_work_request(
            alice.id,
            "Q3 audit of vendor contracts",
            "Check renewal terms against policy",
            &[],
            None,
        )
        .expect("request");
    assert_eq!(request.status, WorkRequestStatus::Open);

    let dispatch = h
        .engine
        .create_collaboration(request.id, bob.id)
        .expect("collaborate");
    assert!(dispatch.task.is_none());
    let workflow_id = dispatch.workflow.id;
    assert_eq!(dispatch.workflow.status, WorkflowStatus::Collaborating);
    assert_eq!(dispatch.workflow.workflow_type, WorkflowType::ComplianceReview);
    assert_eq!(request_status(&h, request.id), WorkRequestStatus::Assigned);

    let again = h
        .engine
        .create_collaboration(request.id, bob.id)
        .expect_err("request already taken");
    assert!(matches!(again, OrchestratorError::RequestNotOpen { .. }));

    let detail = h.detail(workflow_id, &bob);
    assert_eq!(detail.participants.len(), 2);
    assert_eq!(detail.approvals.len(), 2);
    assert!(detail
        .approvals
        .iter()
        .all(|a| a.status == ApprovalStatus::Pending));
    let review = &detail.steps[0];
    assert_eq!(review.step_type, StepType::SpecialistReview);
    assert_eq!(review.status, StepStatus::InProgress);
    assert_eq!(review.assignee_id, Some(bob.id));
    assert_eq!(
        detail.events[0].message,
        "Handshake complete! Bob is starting work on: Q3 audit of vendor contracts"
    );

    let workflow = h
        .engine
        .mark_completion(workflow_id, alice.id, CompletionAction::MarkReady)
        .expect("alice ready");
    assert_eq!(workflow.status, WorkflowStatus::Collaborating);

    let workflow = h
        .engine
        .mark_completion(workflow_id, bob.id, CompletionAction::MarkReady)
        .expect("bob ready");
    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(request_status(&h, request.id), WorkRequestStatus::Completed);
    let detail = h.detail(workflow_id, &alice);
    assert_eq!(detail.steps[0].status, StepStatus::Completed);
    let approved = detail
        .events
        .iter()
        .find(|e| e.kind == EventKind::Approved)
        .expect("consensus event");
    assert_eq!(approved.actor_kind, ActorKind::System);

    let workflow = h
        .engine
        .mark_completion(workflow_id, alice.id, CompletionAction::Reopen)
        .expect("reopen");
    assert_eq!(workflow.status, WorkflowStatus::Collaborating);
    assert_eq!(request_status(&h, request.id), WorkRequestStatus::Assigned);
    let detail = h.detail(workflow_id, &alice);
    let alice_approval = detail
        .approvals
        .iter()
        .find(|a| a.participant_id == alice.id)
        .expect("alice approval");
    assert_eq!(alice_approval.status, ApprovalStatus::Pending);
    assert!(detail.events.iter().any(|e| e.kind == EventKind::Reopened));
}

#[test]
fn agents_cannot_mark_completion_and_one_human_never_completes() {
    let h = Harness::new();
    let alice = h.human("Alice");
    let bot = h.agent_participant("Design Bot");
    let request = h
        .engine
        .submit_work_request(alice.id, "Brand style refresh", "", &[], None)
        .expect("request");
    let dispatch = h
        .engine
        .create_collaboration(request.id, bot.id)
        .expect("collaborate");
    assert!(dispatch.task.is_none(), "no research tag means no kickoff reply");
    let workflow_id = dispatch.workflow.id;
    assert_eq!(dispatch.workflow.workflow_type, WorkflowType::DesignAlignment);

    let err = h
        .engine
        .mark_completion(workflow_id, bot.id, CompletionAction::MarkReady)
        .expect_err("agent");
    assert!(matches!(err, OrchestratorError::Forbidden(_)));

    let workflow = h
        .engine
        .mark_completion(workflow_id, alice.id, CompletionAction::MarkReady)
        .expect("alice ready");
    assert_eq!(workflow.status, WorkflowStatus::Collaborating);
    assert_eq!(request_status(&h, request.id), WorkRequestStatus::Assigned);
}

#[test]
fn presentation_workflows_do_not_use_readiness_flags() {
    let h = Harness::new();
    let alice = h.human("Alice");
    let dispatch = h
        .engine
        .create_research_workflow(alice.id, "Solar microgrids")
        .expect("create workflow");
    let workflow_id = dispatch.workflow.id;
    dispatch.wait();

    let err = h
        .engine
        .mark_completion(workflow_id, alice.id, CompletionAction::MarkReady)
        .expect_err("not collaborative");
    assert!(matches!(err, OrchestratorError::NotCollaborative(id) if id == workflow_id));
}

#[test]
fn agent_collaborator_replies_in_chat() {
    let h = Harness::new();
    let alice = h.human("Alice");
    let bot = h.agent_participant("Research Bot");
    let request = h
        .engine
        .submit_work_request(
            alice.id,
            "Microgrid deck",
            "Solar microgrids for rural clinics",
            &["Research".to_string(), " slides ".to_string()],
            None,
        )
        .expect("request");
    let kickoff = h
        .engine
        .create_collaboration(request.id, bot.id)
        .expect("collaborate");
    let workflow_id = kickoff.workflow.id;
    assert_eq!(kickoff.wait(), Some(StageOutcome::Committed));

    let kickoff_call = &h.agent.calls_of(CallKind::Chat)[0];
    assert!(kickoff_call.prompt.contains("Start Agent Research"));

    h.agent
        .set_chat(Ok("Sure, I will add a Kenya case study.".to_string()));
    let dispatch = h
        .engine
        .post_message(workflow_id, alice.id, "Please cover Kenya", None)
        .expect("post");
    assert_eq!(dispatch.wait(), Some(StageOutcome::Committed));

    let detail = h.detail(workflow_id, &alice);
    let bodies = detail
        .messages
        .iter()
        .map(|m| (m.sender_name.clone(), m.body.clone()))
        .collect::<Vec<_>>();
    assert!(bodies.contains(&(Some("Alice".to_string()), "Please cover Kenya".to_string())));
    assert!(bodies.contains(&(
        Some("Research Bot".to_string()),
        "Sure, I will add a Kenya case study.".to_string()
    )));
    let chat_calls = h.agent.calls_of(CallKind::Chat);
    assert_eq!(chat_calls.len(), 2);
    assert!(chat_calls[1].prompt.contains("Please cover Kenya"));
    assert_eq!(chat_calls[0].session_id, chat_calls[1].session_id);

    let quiet = h
        .engine
        .post_message(workflow_id, alice.id, "Note to self", Some(false))
        .expect("post without agent");
    assert!(quiet.task.is_none());
    assert_eq!(h.agent.calls_of(CallKind::Chat).len(), 2);
}

#[test]
fn leaky_or_failed_agent_replies_become_a_neutral_message() {
    let h = Harness::new();
    let alice = h.human("Alice");
    let bot = h.agent_participant("Research Bot");
    let request = h
        .engine
        .submit_work_request(alice.id, "Microgrid deck", "", &["ppt".to_string()], None)
        .expect("request");
    h.agent.set_chat(Err("agent binary missing".to_string()));
    let kickoff = h
        .engine
        .create_collaboration(request.id, bot.id)
        .expect("collaborate");
    let workflow_id = kickoff.workflow.id;
    assert_eq!(kickoff.wait(), Some(StageOutcome::Committed));

    h.agent
        .set_chat(Ok("Traceback (most recent call last): tool_call failed".to_string()));
    h.engine
        .post_message(workflow_id, alice.id, "Any update?", None)
        .expect("post")
        .wait();

    let detail = h.detail(workflow_id, &alice);
    let agent_replies = detail
        .messages
        .iter()
        .filter(|m| m.sender_kind == ActorKind::Agent)
        .collect::<Vec<_>>();
    assert_eq!(agent_replies.len(), 2);
    assert!(agent_replies
        .iter()
        .all(|m| m.body == deckflow::orchestration::chat::NEUTRAL_REPLY));
    assert!(!agent_replies
        .iter()
        .any(|m| m.body.to_lowercase().contains("traceback")));
}
