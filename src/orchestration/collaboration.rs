use crate::shared::ids::ParticipantId;
use crate::store::{ApprovalStatus, Participant, StepType, WorkflowApproval, WorkflowType};

pub const MIN_HUMANS_FOR_CONSENSUS: usize = 2;

const COMPLIANCE_KEYWORDS: &[&str] = &["compliance", "audit", "regulatory", "policy", "risk"];
const DESIGN_KEYWORDS: &[&str] = &["design", "branding", "brand", "logo", "color", "style"];
const PRESENTATION_KEYWORDS: &[&str] = &["research", "ppt", "powerpoint", "slides", "presentation"];
const RESEARCH_CAPABILITIES: &[&str] = &[
    "research",
    "ppt",
    "ppt_generation",
    "powerpoint",
    "slides",
    "presentation",
];

pub const AGENT_KICKOFF_PROMPT: &str = "Please acknowledge the requester description for this \
    workflow, summarize the requirements you will follow, and ask whether they want to refine \
    anything before pressing 'Start Agent Research'.";

pub fn normalize_capabilities(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|tag| tag.trim().to_ascii_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect()
}

pub fn infer_workflow_type(title: &str, description: &str, capabilities: &[String]) -> WorkflowType {
    let haystack = format!(
        "{title} {description} {}",
        normalize_capabilities(capabilities).join(" ")
    )
    .to_lowercase();
    let hits = |keywords: &[&str]| keywords.iter().any(|k| haystack.contains(k));
    if hits(COMPLIANCE_KEYWORDS) {
        WorkflowType::ComplianceReview
    } else if hits(DESIGN_KEYWORDS) {
        WorkflowType::DesignAlignment
    } else if hits(PRESENTATION_KEYWORDS) {
        WorkflowType::PptGeneration
    } else {
        WorkflowType::GeneralCollaboration
    }
}

pub fn wants_research(capabilities: &[String]) -> bool {
    normalize_capabilities(capabilities)
        .iter()
        .any(|tag| RESEARCH_CAPABILITIES.contains(&tag.as_str()))
}

pub fn initial_step_type(collaborator: &Participant, workflow_type: WorkflowType) -> StepType {
    if collaborator.is_agent {
        StepType::AgentCollaboration
    } else if matches!(
        workflow_type,
        WorkflowType::ComplianceReview | WorkflowType::DesignAlignment
    ) {
        StepType::SpecialistReview
    } else {
        StepType::HumanResearch
    }
}

/// True when at least two humans take part and every one of them is ready.
/// Fewer than two humans never auto-completes.
pub fn consensus_reached(participants: &[Participant], approvals: &[WorkflowApproval]) -> bool {
    let humans = participants
        .iter()
        .filter(|p| !p.is_agent)
        .map(|p| p.id)
        .collect::<Vec<ParticipantId>>();
    humans.len() >= MIN_HUMANS_FOR_CONSENSUS
        && humans.iter().all(|id| {
            approvals
                .iter()
                .any(|a| a.participant_id == *id && a.status == ApprovalStatus::Ready)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::ids::WorkflowId;

    fn person(id: i64, is_agent: bool) -> Participant {
        Participant {
            id: ParticipantId::new(id),
            name: format!("p{id}"),
            is_agent,
            slack_user_id: None,
            created_at: 0,
        }
    }

    fn approval(id: i64, status: ApprovalStatus) -> WorkflowApproval {
        WorkflowApproval {
            workflow_id: WorkflowId::new(1),
            participant_id: ParticipantId::new(id),
            status,
            updated_at: 0,
        }
    }

    #[test]
    fn workflow_type_follows_keyword_priority() {
        let none: Vec<String> = vec![];
        assert_eq!(
            infer_workflow_type("Brand audit", "", &none),
            WorkflowType::ComplianceReview
        );
        assert_eq!(
            infer_workflow_type("New logo", "", &none),
            WorkflowType::DesignAlignment
        );
        assert_eq!(
            infer_workflow_type("Quarterly deck", "", &["Slides".to_string()]),
            WorkflowType::PptGeneration
        );
        assert_eq!(
            infer_workflow_type("Help me", "plan an offsite", &none),
            WorkflowType::GeneralCollaboration
        );
    }

    #[test]
    fn consensus_needs_two_ready_humans_and_ignores_agents() {
        let people = vec![person(1, false), person(2, false), person(3, true)];
        assert!(!consensus_reached(
            &people,
            &[approval(1, ApprovalStatus::Ready), approval(2, ApprovalStatus::Pending)]
        ));
        assert!(consensus_reached(
            &people,
            &[approval(1, ApprovalStatus::Ready), approval(2, ApprovalStatus::Ready)]
        ));
        assert!(!consensus_reached(
            &[person(1, false), person(3, true)],
            &[approval(1, ApprovalStatus::Ready)]
        ));
    }

    #[test]
    fn initial_step_depends_on_collaborator_and_type() {
        assert_eq!(
            initial_step_type(&person(1, true), WorkflowType::ComplianceReview),
            StepType::AgentCollaboration
        );
        assert_eq!(
            initial_step_type(&person(1, false), WorkflowType::DesignAlignment),
            StepType::SpecialistReview
        );
        assert_eq!(
            initial_step_type(&person(1, false), WorkflowType::PptGeneration),
            StepType::HumanResearch
        );
        assert!(wants_research(&[" Research ".to_string()]));
        assert!(!wants_research(&["legal".to_string()]));
    }
}
