use super::{PollStatus, PresentationError, PresentationService, SubmitReceipt, SubmitRequest};
use serde::Deserialize;
use serde_json::json;
use std::io::Write;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct HttpPresentationService {
    api_base: String,
    api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TaskStatusResponse {
    #[serde(default)]
    task_status: String,
    #[serde(default)]
    task_result: Option<TaskResult>,
    #[serde(default)]
    task_info: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TaskResult {
    Detail {
        #[serde(default)]
        request_id: Option<String>,
    },
    Other(serde_json::Value),
}

#[derive(Debug, Clone, Deserialize)]
struct DownloadResponse {
    #[serde(default)]
    url: Option<String>,
}

impl HttpPresentationService {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), path)
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, PresentationError> {
        let response = ureq::get(&self.endpoint(path))
            .timeout(REQUEST_TIMEOUT)
            .set("X-API-Key", &self.api_key)
            .call()
            .map_err(map_ureq_error)?;
        response
            .into_json::<T>()
            .map_err(|e| PresentationError::Response(e.to_string()))
    }
}

impl PresentationService for HttpPresentationService {
    fn submit(&self, request: &SubmitRequest) -> Result<SubmitReceipt, PresentationError> {
        let body = json!({
            "plain_text": request.plain_text,
            "length": request.slide_count,
            "tone": request.tone.as_str(),
            "verbosity": request.verbosity.as_str(),
            "custom_user_instructions": request.custom_instructions,
            "fetch_images": true,
        });
        let response = ureq::post(&self.endpoint("presentation/generate"))
            .timeout(REQUEST_TIMEOUT)
            .set("X-API-Key", &self.api_key)
            .send_json(body)
            .map_err(map_ureq_error)?;
        let parsed: SubmitResponse = response
            .into_json()
            .map_err(|e| PresentationError::Response(e.to_string()))?;

        let task_id = non_empty(parsed.task_id);
        let request_id = non_empty(parsed.request_id);
        match (task_id, request_id) {
            (Some(task_id), request_id) => Ok(SubmitReceipt {
                task_id,
                request_id,
                complete: false,
            }),
            (None, Some(request_id)) => Ok(SubmitReceipt {
                task_id: request_id.clone(),
                complete: parsed.url.is_some(),
                request_id: Some(request_id),
            }),
            (None, None) => Err(PresentationError::MissingIdentifier("task_id")),
        }
    }

    fn poll(&self, task_id: &str) -> Result<PollStatus, PresentationError> {
        let path = format!("task_status/{}", urlencoding::encode(task_id));
        let parsed: TaskStatusResponse = self.get_json(&path)?;
        match parsed.task_status.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => {
                let request_id = match parsed.task_result {
                    Some(TaskResult::Detail { request_id }) => non_empty(request_id),
                    _ => None,
                };
                Ok(PollStatus::Success { request_id })
            }
            "FAILURE" | "REVOKED" => Ok(PollStatus::Failure {
                reason: parsed
                    .task_info
                    .map(|info| match info {
                        serde_json::Value::String(text) => text,
                        other => other.to_string(),
                    })
                    .unwrap_or_else(|| "task reported failure".to_string()),
            }),
            _ => Ok(PollStatus::Pending),
        }
    }

    fn resolve_download(&self, request_id: &str) -> Result<String, PresentationError> {
        let path = format!("presentation/download/{}", urlencoding::encode(request_id));
        let parsed: DownloadResponse = self.get_json(&path)?;
        non_empty(parsed.url).ok_or(PresentationError::MissingIdentifier("url"))
    }

    fn download(&self, url: &str, sink: &mut dyn Write) -> Result<u64, PresentationError> {
        let response = ureq::get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .call()
            .map_err(map_ureq_error)?;
        let mut reader = response.into_reader();
        std::io::copy(&mut reader, sink).map_err(|source| PresentationError::Io {
            path: url.to_string(),
            source,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn map_ureq_error(err: ureq::Error) -> PresentationError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            PresentationError::Request(format!("http {code}: {}", body.trim()))
        }
        other => PresentationError::Request(other.to_string()),
    }
}
