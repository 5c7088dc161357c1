mod support;

use deckflow::notify::NotificationKind;
use deckflow::orchestration::{OrchestratorError, ReviewAction, StageOutcome};
use deckflow::store::{
    EventKind, GenerationOptions, Provenance, ReviewDecision, StepOutput, StepStatus, StepType,
    Tone, Verbosity, WorkflowStatus,
};
use std::fs;
use support::{CallKind, Harness};

#[test]
fn solar_microgrids_runs_from_topic_to_artifact() {
    let h = Harness::new();
    let alice = h.human("Alice");

    let dispatch = h
        .engine
        .create_research_workflow(alice.id, "Solar microgrids for rural clinics")
        .expect("create workflow");
    assert_eq!(dispatch.workflow.status, WorkflowStatus::Researching);
    let workflow_id = dispatch.workflow.id;
    assert_eq!(dispatch.wait(), Some(StageOutcome::Committed));

    let detail = h.detail(workflow_id, &alice);
    assert_eq!(detail.workflow.status, WorkflowStatus::AwaitingReview);
    assert!(detail.workflow.session_id.is_some());
    let research = detail
        .steps
        .iter()
        .find(|s| s.step_type == StepType::AgentResearch)
        .expect("research step");
    assert_eq!(research.status, StepStatus::Completed);
    let sections = research
        .output
        .as_ref()
        .and_then(StepOutput::research_sections)
        .expect("research sections");
    assert!(sections.summary.contains("rural clinics"));
    assert!(sections.slide_outline.starts_with("Slide 1: Why microgrids"));
    assert!(sections.raw_research.contains("IEA 2024"));
    assert_eq!(sections.raw_text, support::SOLAR_RESEARCH);

    let review = detail
        .steps
        .iter()
        .find(|s| s.step_type == StepType::HumanReview)
        .expect("review step");
    assert_eq!(review.status, StepStatus::AwaitingInput);
    assert_eq!(review.assignee_id, Some(alice.id));

    let kinds = detail.events.iter().map(|e| e.kind).collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![
            EventKind::Created,
            EventKind::ResearchStarted,
            EventKind::ResearchCompleted,
            EventKind::ReviewRequested,
        ]
    );
    assert_eq!(
        detail.events[0].message,
        "Workflow created: Solar microgrids for rural clinics"
    );

    let dispatch = h
        .engine
        .submit_review(
            workflow_id,
            alice.id,
            ReviewAction::Approve {
                options: GenerationOptions {
                    verbosity: Some(Verbosity::Concise),
                    ..GenerationOptions::default()
                },
            },
        )
        .expect("approve");
    assert_eq!(dispatch.workflow.status, WorkflowStatus::GeneratingPpt);
    assert_eq!(dispatch.wait(), Some(StageOutcome::Committed));

    let detail = h.detail(workflow_id, &alice);
    assert_eq!(detail.workflow.status, WorkflowStatus::Completed);
    let generation = detail
        .steps
        .iter()
        .find(|s| s.step_type == StepType::AgentGeneration)
        .expect("generation step");
    assert_eq!(generation.status, StepStatus::Completed);
    let Some(StepOutput::Generation { artifact, spec }) = &generation.output else {
        panic!("expected generation output, got {:?}", generation.output);
    };
    assert_eq!(spec.source, Provenance::AgentReconciled);
    assert_eq!(spec.slide_count, 6);
    assert_eq!(spec.tone, Tone::Educational);
    assert_eq!(spec.verbosity, Verbosity::Concise);
    assert!(artifact.file_name.starts_with("solar_microgrids_for_rural_clinics_"));
    assert!(artifact.file_name.ends_with(".pptx"));
    assert_eq!(artifact.file_size, h.presentation.payload_len());
    assert_eq!(artifact.sha256.len(), 64);
    assert_eq!(
        fs::metadata(&artifact.file_path).expect("artifact on disk").len(),
        artifact.file_size
    );

    let submitted = h.presentation.submissions();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].slide_count, 6);
    assert_eq!(submitted[0].verbosity, Verbosity::Concise);
    assert!(submitted[0].plain_text.contains("EXECUTIVE SUMMARY"));
    assert!(submitted[0].custom_instructions.contains("Must include: cost comparison"));

    let review = detail
        .steps
        .iter()
        .find(|s| s.step_type == StepType::HumanReview)
        .expect("review step");
    assert_eq!(
        review.output,
        Some(StepOutput::Review {
            decision: ReviewDecision::Approve,
            feedback: None
        })
    );
    assert!(detail
        .events
        .iter()
        .any(|e| e.kind == EventKind::GenerationCompleted
            && e.message == format!("Presentation generated: {}", artifact.file_name)));
    assert_eq!(
        h.notification_kinds(),
        vec![
            NotificationKind::ResearchComplete,
            NotificationKind::PresentationComplete
        ]
    );
    assert!(h.engine_log().contains("stage=generation outcome=committed"));
}

#[test]
fn blank_agent_reply_fails_the_run_and_retry_recovers() {
    let h = Harness::new();
    let alice = h.human("Alice");
    h.agent.script_research(vec![
        Ok("   \n\t".to_string()),
        Ok(support::SOLAR_RESEARCH.to_string()),
    ]);
    let dispatch = h
        .engine
        .create_research_workflow(alice.id, "Solar microgrids")
        .expect("create workflow");
    let workflow_id = dispatch.workflow.id;
    assert_eq!(dispatch.wait(), Some(StageOutcome::Committed));

    let detail = h.detail(workflow_id, &alice);
    assert_eq!(detail.workflow.status, WorkflowStatus::Failed);
    assert_eq!(detail.steps[0].status, StepStatus::Failed);
    let failure = detail.steps[0]
        .output
        .as_ref()
        .and_then(StepOutput::failure)
        .expect("failure payload");
    assert_eq!(
        failure.error,
        "Research failed: agent returned an empty reply"
    );
    assert!(detail
        .steps
        .iter()
        .all(|s| s.step_type != StepType::HumanReview));
    assert_eq!(h.notification_kinds(), vec![NotificationKind::RunFailed]);

    let dispatch = h.engine.retry_run(workflow_id, alice.id).expect("retry");
    assert_eq!(dispatch.workflow.status, WorkflowStatus::Researching);
    assert_eq!(dispatch.wait(), Some(StageOutcome::Committed));

    let detail = h.detail(workflow_id, &alice);
    assert_eq!(detail.workflow.status, WorkflowStatus::AwaitingReview);
    let research = detail
        .steps
        .iter()
        .filter(|s| s.step_type == StepType::AgentResearch)
        .collect::<Vec<_>>();
    assert_eq!(research.len(), 2);
    assert_eq!(research[1].status, StepStatus::Completed);
    let sections = research[1]
        .output
        .as_ref()
        .and_then(StepOutput::research_sections)
        .expect("research sections");
    assert!(sections.summary.contains("rural clinics"));
}

#[test]
fn refinement_reuses_the_research_step_and_session() {
    let h = Harness::new();
    let alice = h.human("Alice");
    let dispatch = h
        .engine
        .create_research_workflow(alice.id, "Solar microgrids")
        .expect("create workflow");
    let workflow_id = dispatch.workflow.id;
    dispatch.wait();

    let dispatch = h
        .engine
        .submit_review(
            workflow_id,
            alice.id,
            ReviewAction::Refine {
                feedback: "Add a financing slide for NGOs".to_string(),
            },
        )
        .expect("refine");
    assert_eq!(dispatch.workflow.status, WorkflowStatus::Refining);
    assert_eq!(dispatch.wait(), Some(StageOutcome::Committed));

    let detail = h.detail(workflow_id, &alice);
    assert_eq!(detail.workflow.status, WorkflowStatus::AwaitingReview);
    let research_steps = detail
        .steps
        .iter()
        .filter(|s| s.step_type == StepType::AgentResearch)
        .collect::<Vec<_>>();
    assert_eq!(research_steps.len(), 1);
    assert_eq!(research_steps[0].iteration_count, 1);
    assert_eq!(
        research_steps[0].feedback.as_deref(),
        Some("Add a financing slide for NGOs")
    );
    let reviews = detail
        .steps
        .iter()
        .filter(|s| s.step_type == StepType::HumanReview)
        .collect::<Vec<_>>();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].status, StepStatus::AwaitingInput);

    let research_calls = h.agent.calls_of(CallKind::Research);
    let refinement_calls = h.agent.calls_of(CallKind::Refinement);
    assert_eq!(research_calls.len(), 1);
    assert_eq!(refinement_calls.len(), 1);
    assert_eq!(research_calls[0].session_id, refinement_calls[0].session_id);
    assert!(refinement_calls[0]
        .prompt
        .contains("Add a financing slide for NGOs"));

    assert!(detail
        .events
        .iter()
        .any(|e| e.kind == EventKind::ResearchCompleted && e.message == "Refinement round 1 complete"));
    let refined = detail
        .events
        .iter()
        .find(|e| e.kind == EventKind::Refined)
        .expect("refined event");
    assert_eq!(refined.metadata["feedback"], "Add a financing slide for NGOs");

    let sent = h.notifications();
    assert_eq!(sent.len(), 2);
    assert!(sent[1]
        .body
        .starts_with("Refinement round 1: Solar microgrids let rural clinics"));
}

#[test]
fn refine_after_completion_reopens_the_generation_step() {
    let h = Harness::new();
    let alice = h.human("Alice");
    let dispatch = h
        .engine
        .create_research_workflow(alice.id, "Solar microgrids")
        .expect("create workflow");
    let workflow_id = dispatch.workflow.id;
    dispatch.wait();
    h.engine
        .submit_review(
            workflow_id,
            alice.id,
            ReviewAction::Approve {
                options: GenerationOptions::default(),
            },
        )
        .expect("approve")
        .wait();
    assert_eq!(
        h.engine.workflow(workflow_id).expect("workflow").status,
        WorkflowStatus::Completed
    );

    h.engine
        .submit_review(
            workflow_id,
            alice.id,
            ReviewAction::Refine {
                feedback: "Use fewer statistics".to_string(),
            },
        )
        .expect("refine after completion")
        .wait();
    let detail = h.detail(workflow_id, &alice);
    assert_eq!(detail.workflow.status, WorkflowStatus::AwaitingReview);
    assert!(detail.events.iter().any(|e| e.kind == EventKind::Reopened));
    let generation = detail
        .steps
        .iter()
        .find(|s| s.step_type == StepType::AgentGeneration)
        .expect("generation step");
    assert_eq!(generation.status, StepStatus::Pending);

    h.engine
        .submit_review(
            workflow_id,
            alice.id,
            ReviewAction::Approve {
                options: GenerationOptions::default(),
            },
        )
        .expect("approve again")
        .wait();
    let detail = h.detail(workflow_id, &alice);
    assert_eq!(detail.workflow.status, WorkflowStatus::Completed);
    let generations = detail
        .steps
        .iter()
        .filter(|s| s.step_type == StepType::AgentGeneration)
        .collect::<Vec<_>>();
    assert_eq!(generations.len(), 1, "reopened step is reused");
    assert_eq!(generations[0].status, StepStatus::Completed);
    assert_eq!(h.presentation.submissions().len(), 2);
}

#[test]
fn research_failure_marks_workflow_failed_and_notifies() {
    let h = Harness::new();
    let alice = h.human("Alice");
    h.agent
        .script_research(vec![Err("gateway offline".to_string())]);
    let dispatch = h
        .engine
        .create_research_workflow(alice.id, "Solar microgrids")
        .expect("create workflow");
    let workflow_id = dispatch.workflow.id;
    assert_eq!(dispatch.wait(), Some(StageOutcome::Committed));

    let detail = h.detail(workflow_id, &alice);
    assert_eq!(detail.workflow.status, WorkflowStatus::Failed);
    let research = &detail.steps[0];
    assert_eq!(research.status, StepStatus::Failed);
    let failure = research
        .output
        .as_ref()
        .and_then(StepOutput::failure)
        .expect("failure payload");
    assert!(failure.error.starts_with("Research failed:"));
    assert!(failure.error.contains("gateway offline"));
    assert_eq!(h.notification_kinds(), vec![NotificationKind::RunFailed]);
}

#[test]
fn review_validation_rejects_without_writing() {
    let h = Harness::new();
    let alice = h.human("Alice");
    let mallory = h.human("Mallory");

    let empty_topic = h
        .engine
        .create_research_workflow(alice.id, "   ")
        .expect_err("empty topic");
    assert!(matches!(empty_topic, OrchestratorError::MissingField("topic")));

    let dispatch = h
        .engine
        .create_research_workflow(alice.id, "Solar microgrids")
        .expect("create workflow");
    let workflow_id = dispatch.workflow.id;
    dispatch.wait();
    let before = h.detail(workflow_id, &alice);

    let empty_feedback = h
        .engine
        .submit_review(
            workflow_id,
            alice.id,
            ReviewAction::Refine {
                feedback: "  ".to_string(),
            },
        )
        .expect_err("empty feedback");
    assert!(matches!(empty_feedback, OrchestratorError::MissingField("feedback")));

    let outsider = h
        .engine
        .submit_review(
            workflow_id,
            mallory.id,
            ReviewAction::Approve {
                options: GenerationOptions::default(),
            },
        )
        .expect_err("outsider");
    assert!(matches!(outsider, OrchestratorError::Forbidden(_)));
    assert!(outsider.is_validation());

    let after = h.detail(workflow_id, &alice);
    assert_eq!(before.workflow, after.workflow);
    assert_eq!(before.events.len(), after.events.len());
    assert_eq!(before.steps, after.steps);
}
