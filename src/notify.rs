use crate::shared::ids::WorkflowId;
use crate::shared::logging::append_runtime_log;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

pub mod slack;

pub use slack::SlackNotifier;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Request(String),
    #[error("notification api rejected the message: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    ResearchComplete,
    PresentationComplete,
    RunFailed,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ResearchComplete => "research_complete",
            Self::PresentationComplete => "presentation_complete",
            Self::RunFailed => "run_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub workflow_id: WorkflowId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn text(&self) -> String {
        format!("*{}* (workflow {})\n{}", self.title, self.workflow_id, self.body)
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}

enum Delivery {
    Send(Notification),
    Flush(Sender<()>),
}

/// Delivers notifications in order on one background worker, started on first use.
/// Callers never wait on delivery. Failures are logged and dropped.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    state_root: PathBuf,
    queue: Arc<Mutex<Option<Sender<Delivery>>>>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, state_root: PathBuf) -> Self {
        Self {
            notifier,
            state_root,
            queue: Arc::new(Mutex::new(None)),
        }
    }

    pub fn disabled(state_root: PathBuf) -> Self {
        Self::new(Arc::new(NoopNotifier), state_root)
    }

    /// Queues the notification and returns at once.
    pub fn dispatch(&self, notification: Notification) {
        let Some(queue) = self.queue(true) else {
            return;
        };
        if let Err(mpsc::SendError(Delivery::Send(dropped))) = queue.send(Delivery::Send(notification)) {
            append_runtime_log(
                &self.state_root,
                "warn",
                "notify.worker_gone",
                &format!(
                    "workflow_id={} kind={}",
                    dropped.workflow_id,
                    dropped.kind.as_str()
                ),
            );
        }
    }

    /// Waits until everything queued so far has been delivered or given up. For
    /// processes about to exit; the engine itself never calls this.
    pub fn flush(&self) {
        let Some(queue) = self.queue(false) else {
            return;
        };
        let (ack, done) = mpsc::channel();
        if queue.send(Delivery::Flush(ack)).is_ok() {
            let _ = done.recv();
        }
    }

    fn queue(&self, start: bool) -> Option<Sender<Delivery>> {
        let mut slot = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() && start {
            *slot = self.start_worker();
        }
        slot.clone()
    }

    fn start_worker(&self) -> Option<Sender<Delivery>> {
        let (queue, inbox) = mpsc::channel::<Delivery>();
        let notifier = Arc::clone(&self.notifier);
        let state_root = self.state_root.clone();
        let spawned = thread::Builder::new()
            .name("notify".to_string())
            .spawn(move || {
                for delivery in inbox {
                    match delivery {
                        Delivery::Send(notification) => {
                            deliver(notifier.as_ref(), &state_root, &notification)
                        }
                        Delivery::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
            });
        match spawned {
            Ok(_) => Some(queue),
            Err(err) => {
                append_runtime_log(&self.state_root, "warn", "notify.spawn_failed", &err.to_string());
                None
            }
        }
    }
}

fn deliver(notifier: &dyn Notifier, state_root: &Path, notification: &Notification) {
    if let Err(err) = notifier.notify(notification) {
        append_runtime_log(
            state_root,
            "warn",
            "notify.failed",
            &format!(
                "workflow_id={} kind={} error={err}",
                notification.workflow_id,
                notification.kind.as_str()
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::logging::runtime_log_path;
    use std::fs;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    struct Failing;

    impl Notifier for Failing {
        fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Rejected("channel_not_found".to_string()))
        }
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<Notification>>);

    impl Notifier for Recording {
        fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.0
                .lock()
                .map_err(|_| NotifyError::Request("poisoned".to_string()))?
                .push(notification.clone());
            Ok(())
        }
    }

    struct Slow {
        delay: Duration,
        inner: Recording,
    }

    impl Notifier for Slow {
        fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            thread::sleep(self.delay);
            self.inner.notify(notification)
        }
    }

    fn sample() -> Notification {
        Notification {
            workflow_id: WorkflowId::new(7),
            kind: NotificationKind::ResearchComplete,
            title: "Research ready".to_string(),
            body: "Solar microgrids".to_string(),
        }
    }

    #[test]
    fn dispatch_delivers_on_background_thread() {
        let temp = tempdir().expect("tempdir");
        let recording = Arc::new(Recording::default());
        let dispatcher = NotificationDispatcher::new(recording.clone(), temp.path().to_path_buf());
        dispatcher.dispatch(sample());
        dispatcher.flush();
        let seen = recording.0.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert!(seen[0].text().contains("workflow 7"));
    }

    #[test]
    fn dispatch_returns_before_slow_delivery_finishes() {
        let temp = tempdir().expect("tempdir");
        let slow = Arc::new(Slow {
            delay: Duration::from_millis(800),
            inner: Recording::default(),
        });
        let dispatcher = NotificationDispatcher::new(slow.clone(), temp.path().to_path_buf());

        let started = Instant::now();
        dispatcher.dispatch(sample());
        dispatcher.dispatch(Notification {
            kind: NotificationKind::PresentationComplete,
            ..sample()
        });
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(slow.inner.0.lock().expect("lock").is_empty());

        dispatcher.flush();
        let kinds = slow
            .inner
            .0
            .lock()
            .expect("lock")
            .iter()
            .map(|n| n.kind)
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                NotificationKind::ResearchComplete,
                NotificationKind::PresentationComplete
            ]
        );
    }

    #[test]
    fn flush_without_any_dispatch_returns_immediately() {
        let temp = tempdir().expect("tempdir");
        NotificationDispatcher::disabled(temp.path().to_path_buf()).flush();
    }

    #[test]
    fn delivery_failure_is_logged_not_raised() {
        let temp = tempdir().expect("tempdir");
        let dispatcher = NotificationDispatcher::new(Arc::new(Failing), temp.path().to_path_buf());
        dispatcher.dispatch(sample());
        dispatcher.flush();
        let raw = fs::read_to_string(runtime_log_path(temp.path())).expect("runtime log");
        assert!(raw.contains("notify.failed"));
        assert!(raw.contains("channel_not_found"));
    }
}
