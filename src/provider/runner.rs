use crate::provider::output_parse::parse_agent_output;
use crate::provider::{io_error, AgentError, AgentGateway, AgentReply, AgentRequest};
use std::io::BufReader;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Grace period on top of the agent's own timeout before the child is killed.
const PROCESS_GRACE: Duration = Duration::from_secs(30);

/// Agent gateway backed by `<binary> agent --message .. --session-id .. --json --timeout ..`.
#[derive(Debug, Clone)]
pub struct CliAgentGateway {
    binary: String,
}

impl CliAgentGateway {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn args(&self, request: &AgentRequest) -> Vec<String> {
        vec![
            "agent".to_string(),
            "--message".to_string(),
            request.prompt.clone(),
            "--session-id".to_string(),
            request.session_id.to_string(),
            "--json".to_string(),
            "--timeout".to_string(),
            request.timeout.as_secs().to_string(),
        ]
    }
}

impl Default for CliAgentGateway {
    fn default() -> Self {
        Self::new("openclaw")
    }
}

impl AgentGateway for CliAgentGateway {
    fn call(&self, request: &AgentRequest) -> Result<AgentReply, AgentError> {
        let binary_path = Path::new(&self.binary);
        let mut command = Command::new(&self.binary);
        command
            .args(self.args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(AgentError::MissingBinary {
                    binary: self.binary.clone(),
                })
            }
            Err(err) => return Err(io_error(binary_path, err)),
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io_error(binary_path, std::io::Error::other("missing stdout pipe")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io_error(binary_path, std::io::Error::other("missing stderr pipe")))?;

        let stdout_reader = thread::spawn(move || {
            let mut buf = String::new();
            let mut reader = BufReader::new(stdout);
            let _ = reader.read_to_string(&mut buf);
            buf
        });
        let stderr_reader = thread::spawn(move || {
            let mut buf = String::new();
            let mut reader = BufReader::new(stderr);
            let _ = reader.read_to_string(&mut buf);
            buf
        });

        let limit = request.timeout + PROCESS_GRACE;
        let start = Instant::now();
        let exit_status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if start.elapsed() > limit {
                        let _ = child.kill();
                        let _ = child.wait();
                        let _ = stdout_reader.join();
                        let _ = stderr_reader.join();
                        return Err(AgentError::Timeout {
                            timeout_secs: request.timeout.as_secs(),
                        });
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(err) => return Err(io_error(binary_path, err)),
            }
        };

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        if !exit_status.success() {
            let exit_code = exit_status.code().unwrap_or(-1);
            let stderr = if stderr.trim().is_empty() {
                format!("exit code {exit_code}")
            } else {
                stderr.trim().to_string()
            };
            return Err(AgentError::NonZeroExit { exit_code, stderr });
        }

        parse_agent_output(&stdout).map(|text| AgentReply { text })
    }
}
