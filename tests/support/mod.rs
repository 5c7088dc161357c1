use deckflow::notify::{Notification, NotificationDispatcher, NotificationKind, Notifier, NotifyError};
use deckflow::orchestration::{EngineOptions, GeneratorConfig, WorkflowEngine, WorkflowDetail};
use deckflow::presentation::{
    PollStatus, PresentationError, PresentationService, SubmitReceipt, SubmitRequest,
};
use deckflow::provider::{AgentError, AgentGateway, AgentReply, AgentRequest};
use deckflow::shared::clock::ManualClock;
use deckflow::shared::ids::WorkflowId;
use deckflow::shared::logging::EngineLog;
use deckflow::store::{Participant, WorkflowStore};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const START_TIME: i64 = 1_760_000_000;

pub const SOLAR_RESEARCH: &str = "=== EXECUTIVE SUMMARY ===
Solar microgrids let rural clinics run cold chains and lighting without diesel.

=== SLIDE OUTLINE ===
Slide 1: Why microgrids
- Energy access gap
Slide 2: System design
- PV, storage, controller
Slide 3: Costs
- Capex vs diesel
Slide 4: Case studies
- Kenya, India
Slide 5: Financing
- Pay-as-you-go
Slide 6: Next steps
- Pilot sites

=== RAW RESEARCH ===
IEA 2024: 750M people lack electricity. Battery prices fell 90% since 2010.";

pub const RECONCILED_JSON: &str = r#"{"slide_count": 6, "tone": "educational", "verbosity": "standard",
"instructions": "Lead with the clinic use case.", "must_include": ["cost comparison"], "must_avoid": ["jargon"]}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Research,
    Refinement,
    Reconcile,
    Chat,
}

pub fn classify(request: &AgentRequest) -> CallKind {
    if request.session_id.as_str().ends_with("-reconcile") {
        CallKind::Reconcile
    } else if request.prompt.starts_with("You are the agent collaborator") {
        CallKind::Chat
    } else if request.prompt.contains("REVIEWER FEEDBACK") {
        CallKind::Refinement
    } else {
        CallKind::Research
    }
}

// Each test binary uses its own subset of the knobs below; dead-code analysis does not
// see usage across test binaries.

/// Holds the next research or refinement call until released.
#[allow(dead_code)]
pub struct Gate {
    pub entered: Receiver<()>,
    pub release: Sender<()>,
}

#[allow(dead_code)]
impl Gate {
    pub fn wait_entered(&self) {
        self.entered
            .recv_timeout(Duration::from_secs(10))
            .expect("agent call should start");
    }

    pub fn open(self) {
        let _ = self.release.send(());
    }
}

#[allow(dead_code)]
struct PendingGate {
    entered: Sender<()>,
    release: Receiver<()>,
}

/// Scripted agent. Research replies are consumed in order; the last one repeats.
pub struct FakeAgent {
    research: Mutex<VecDeque<Result<String, String>>>,
    reconcile: Mutex<Result<String, String>>,
    chat: Mutex<Result<String, String>>,
    gate: Mutex<Option<PendingGate>>,
    calls: Mutex<Vec<AgentRequest>>,
}

impl Default for FakeAgent {
    fn default() -> Self {
        Self {
            research: Mutex::new(VecDeque::from([Ok(SOLAR_RESEARCH.to_string())])),
            reconcile: Mutex::new(Ok(RECONCILED_JSON.to_string())),
            chat: Mutex::new(Ok("Happy to help. Shall I start the research?".to_string())),
            gate: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[allow(dead_code)]
impl FakeAgent {
    pub fn script_research(&self, replies: Vec<Result<String, String>>) {
        *self.research.lock().expect("research lock") = replies.into();
    }

    pub fn set_reconcile(&self, reply: Result<String, String>) {
        *self.reconcile.lock().expect("reconcile lock") = reply;
    }

    pub fn set_chat(&self, reply: Result<String, String>) {
        *self.chat.lock().expect("chat lock") = reply;
    }

    pub fn gate_next_research(&self) -> Gate {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock().expect("gate lock") = Some(PendingGate {
            entered: entered_tx,
            release: release_rx,
        });
        Gate {
            entered: entered_rx,
            release: release_tx,
        }
    }

    pub fn calls(&self) -> Vec<AgentRequest> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn calls_of(&self, kind: CallKind) -> Vec<AgentRequest> {
        self.calls()
            .into_iter()
            .filter(|call| classify(call) == kind)
            .collect()
    }

    fn next_research(&self) -> Result<String, String> {
        let mut queue = self.research.lock().expect("research lock");
        if queue.len() > 1 {
            queue.pop_front().unwrap_or_else(|| Err("no research scripted".to_string()))
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err("no research scripted".to_string()))
        }
    }
}

impl AgentGateway for FakeAgent {
    fn call(&self, request: &AgentRequest) -> Result<AgentReply, AgentError> {
        self.calls.lock().expect("calls lock").push(request.clone());
        let kind = classify(request);
        let reply = match kind {
            CallKind::Research | CallKind::Refinement => {
                let gate = self.gate.lock().expect("gate lock").take();
                if let Some(gate) = gate {
                    let _ = gate.entered.send(());
                    let _ = gate.release.recv_timeout(Duration::from_secs(10));
                }
                self.next_research()
            }
            CallKind::Reconcile => self.reconcile.lock().expect("reconcile lock").clone(),
            CallKind::Chat => self.chat.lock().expect("chat lock").clone(),
        };
        reply
            .map(|text| AgentReply { text })
            .map_err(|message| AgentError::Rejected {
                status: "error".to_string(),
                message,
            })
    }
}

/// Scripted presentation service: a fixed number of pending polls, then success.
pub struct FakePresentation {
    pending_polls: Mutex<u32>,
    fail_submit: Mutex<Option<String>>,
    payload: Vec<u8>,
    submissions: Mutex<Vec<SubmitRequest>>,
}

impl Default for FakePresentation {
    fn default() -> Self {
        Self {
            pending_polls: Mutex::new(1),
            fail_submit: Mutex::new(None),
            payload: b"PK\x03\x04 fake pptx bytes".to_vec(),
            submissions: Mutex::new(Vec::new()),
        }
    }
}

#[allow(dead_code)]
impl FakePresentation {
    pub fn fail_next_submit(&self, reason: &str) {
        *self.fail_submit.lock().expect("fail lock") = Some(reason.to_string());
    }

    pub fn submissions(&self) -> Vec<SubmitRequest> {
        self.submissions.lock().expect("submissions lock").clone()
    }

    pub fn payload_len(&self) -> u64 {
        self.payload.len() as u64
    }
}

impl PresentationService for FakePresentation {
    fn submit(&self, request: &SubmitRequest) -> Result<SubmitReceipt, PresentationError> {
        if let Some(reason) = self.fail_submit.lock().expect("fail lock").take() {
            return Err(PresentationError::Request(reason));
        }
        let mut submissions = self.submissions.lock().expect("submissions lock");
        submissions.push(request.clone());
        Ok(SubmitReceipt {
            task_id: format!("task-{}", submissions.len()),
            request_id: None,
            complete: false,
        })
    }

    fn poll(&self, task_id: &str) -> Result<PollStatus, PresentationError> {
        let mut pending = self.pending_polls.lock().expect("poll lock");
        if *pending > 0 {
            *pending -= 1;
            return Ok(PollStatus::Pending);
        }
        Ok(PollStatus::Success {
            request_id: Some(format!("req-{task_id}")),
        })
    }

    fn resolve_download(&self, request_id: &str) -> Result<String, PresentationError> {
        Ok(format!("https://files.example.test/{request_id}.pptx"))
    }

    fn download(&self, _url: &str, sink: &mut dyn Write) -> Result<u64, PresentationError> {
        sink.write_all(&self.payload)
            .map_err(|err| PresentationError::Response(err.to_string()))?;
        Ok(self.payload.len() as u64)
    }
}

/// Records deliveries, optionally after a delay that stands in for a slow chat API.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    delay: Mutex<Duration>,
}

#[allow(dead_code)]
impl RecordingNotifier {
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("delay lock") = delay;
    }

    /// Deliveries finished so far, without waiting for ones still in flight.
    pub fn delivered(&self) -> usize {
        self.sent.lock().expect("sent lock").len()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let delay = *self.delay.lock().expect("delay lock");
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.sent
            .lock()
            .expect("sent lock")
            .push(notification.clone());
        Ok(())
    }
}

#[allow(dead_code)]
pub struct Harness {
    pub temp: TempDir,
    pub engine: WorkflowEngine,
    pub agent: Arc<FakeAgent>,
    pub presentation: Arc<FakePresentation>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let state_root = temp.path().to_path_buf();
        let store = WorkflowStore::open(&state_root.join("deckflow.sqlite3")).expect("open store");
        let agent = Arc::new(FakeAgent::default());
        let presentation = Arc::new(FakePresentation::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(START_TIME));
        let options = EngineOptions {
            agent_call_timeout: Duration::from_secs(5),
            reconcile_timeout: Duration::from_secs(5),
            chat_timeout: Duration::from_secs(5),
            chat_context_messages: 12,
            stale_timeout_seconds: 330,
            generator: GeneratorConfig {
                output_dir: state_root.join("artifacts"),
                poll_interval: Duration::from_millis(5),
                poll_deadline: Duration::from_secs(5),
            },
        };
        let engine = WorkflowEngine::new(
            store,
            agent.clone(),
            presentation.clone(),
            NotificationDispatcher::new(notifier.clone(), state_root.clone()),
            EngineLog::new(&state_root),
            options,
        )
        .with_clock(clock.clone());
        Self {
            temp,
            engine,
            agent,
            presentation,
            notifier,
            clock,
        }
    }

    pub fn human(&self, name: &str) -> Participant {
        self.engine
            .register_participant(name, false, None)
            .expect("register human")
    }

    pub fn agent_participant(&self, name: &str) -> Participant {
        self.engine
            .register_participant(name, true, None)
            .expect("register agent")
    }

    pub fn detail(&self, workflow_id: WorkflowId, viewer: &Participant) -> WorkflowDetail {
        self.engine
            .workflow_detail(workflow_id, viewer.id)
            .expect("workflow detail")
    }

    /// Waits for in-flight deliveries, then returns everything sent.
    pub fn notifications(&self) -> Vec<Notification> {
        self.engine.flush_notifications();
        self.notifier.sent.lock().expect("sent lock").clone()
    }

    pub fn notification_kinds(&self) -> Vec<NotificationKind> {
        self.notifications().iter().map(|n| n.kind).collect()
    }

    pub fn engine_log(&self) -> String {
        std::fs::read_to_string(self.temp.path().join("logs/engine.log")).unwrap_or_default()
    }
}
