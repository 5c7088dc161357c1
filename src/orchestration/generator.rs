//! Submit, poll and download against the presentation service, landing the artifact
//! under a collision-free name in the output directory.

use crate::presentation::{PollStatus, PresentationError, PresentationService, SubmitRequest};
use crate::store::{ArtifactMetadata, GenerationSpec};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

const MAX_SLUG_CHARS: usize = 60;
const MAX_NAME_ATTEMPTS: u32 = 100;
const PLAIN_TEXT_CONTEXT_CHARS: usize = 12_000;

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub output_dir: PathBuf,
    pub poll_interval: Duration,
    pub poll_deadline: Duration,
}

#[derive(Debug, Clone)]
pub struct GenerationJob<'a> {
    pub topic: &'a str,
    pub context: &'a str,
    pub spec: &'a GenerationSpec,
    pub now: i64,
}

pub fn submit_request(job: &GenerationJob<'_>) -> SubmitRequest {
    let mut plain_text = format!("Create a presentation about: {}", job.topic.trim());
    let context = job.context.trim();
    if !context.is_empty() && context != job.topic.trim() {
        plain_text.push_str("\n\n");
        plain_text.push_str(&clip(context, PLAIN_TEXT_CONTEXT_CHARS));
    }
    SubmitRequest {
        plain_text,
        slide_count: job.spec.slide_count,
        tone: job.spec.tone,
        verbosity: job.spec.verbosity,
        custom_instructions: custom_instructions(job.spec),
    }
}

pub fn custom_instructions(spec: &GenerationSpec) -> String {
    let mut parts = Vec::new();
    if !spec.instructions.trim().is_empty() {
        parts.push(spec.instructions.trim().to_string());
    }
    if !spec.must_include.is_empty() {
        parts.push(format!("Must include: {}", spec.must_include.join("; ")));
    }
    if !spec.must_avoid.is_empty() {
        parts.push(format!("Must avoid: {}", spec.must_avoid.join("; ")));
    }
    parts.join("\n")
}

/// Runs the whole protocol. `heartbeat` is called before every poll; returning `false`
/// abandons the job because the run it belongs to is no longer current.
pub fn generate(
    service: &dyn PresentationService,
    config: &GeneratorConfig,
    job: &GenerationJob<'_>,
    heartbeat: &mut dyn FnMut() -> bool,
) -> Result<ArtifactMetadata, PresentationError> {
    let receipt = service.submit(&submit_request(job))?;
    let task_id = receipt.task_id.clone();

    let request_id = if receipt.complete {
        receipt.request_id.clone()
    } else {
        let started = Instant::now();
        loop {
            if !heartbeat() {
                return Err(PresentationError::Abandoned { task_id });
            }
            match service.poll(&task_id)? {
                PollStatus::Pending => {}
                PollStatus::Success { request_id } => {
                    break request_id.or_else(|| receipt.request_id.clone());
                }
                PollStatus::Failure { reason } => {
                    return Err(PresentationError::JobFailed { task_id, reason });
                }
            }
            let elapsed = started.elapsed();
            if elapsed >= config.poll_deadline {
                return Err(PresentationError::Timeout {
                    task_id,
                    waited_secs: elapsed.as_secs(),
                });
            }
            thread::sleep(config.poll_interval.min(config.poll_deadline - elapsed));
        }
    };
    let request_id = request_id.ok_or(PresentationError::MissingIdentifier("request_id"))?;
    let url = service.resolve_download(&request_id)?;

    let (path, file) = create_unique_file(&config.output_dir, job.topic, job.now)?;
    let mut sink = HashingWriter::new(file);
    let written = match service.download(&url, &mut sink) {
        Ok(written) => written,
        Err(err) => {
            let _ = fs::remove_file(&path);
            return Err(err);
        }
    };
    let sha256 = sink.finish().map_err(|source| io_error(&path, source))?;
    if written == 0 {
        let _ = fs::remove_file(&path);
        return Err(PresentationError::EmptyArtifact { url });
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_path = fs::canonicalize(&path).unwrap_or(path);
    Ok(ArtifactMetadata {
        file_name,
        file_path,
        file_size: written,
        file_size_formatted: format_size(written),
        sha256,
        task_id,
        request_id: Some(request_id),
    })
}

pub fn slugify(topic: &str) -> String {
    let mut slug = String::new();
    for ch in topic.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
        if slug.len() >= MAX_SLUG_CHARS {
            break;
        }
    }
    let slug = slug.trim_end_matches('_');
    if slug.is_empty() {
        "presentation".to_string()
    } else {
        slug.to_string()
    }
}

pub fn artifact_base_name(topic: &str, now: i64) -> String {
    let stamp = chrono::DateTime::from_timestamp(now, 0)
        .map(|ts| ts.format("%Y%m%d_%H%M%S").to_string())
        .unwrap_or_else(|| now.to_string());
    format!("{}_{stamp}", slugify(topic))
}

fn create_unique_file(
    dir: &Path,
    topic: &str,
    now: i64,
) -> Result<(PathBuf, File), PresentationError> {
    fs::create_dir_all(dir).map_err(|source| io_error(dir, source))?;
    let base = artifact_base_name(topic, now);
    for attempt in 1..=MAX_NAME_ATTEMPTS {
        let name = if attempt == 1 {
            format!("{base}.pptx")
        } else {
            format!("{base}_{attempt}.pptx")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(source) => return Err(io_error(&path, source)),
        }
    }
    Err(io_error(
        dir,
        io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free artifact name for `{base}`"),
        ),
    ))
}

pub fn format_size(bytes: u64) -> String {
    format!("{:.1} KB", bytes as f64 / 1024.0)
}

struct HashingWriter {
    file: File,
    hasher: Sha256,
}

impl HashingWriter {
    fn new(file: File) -> Self {
        Self {
            file,
            hasher: Sha256::new(),
        }
    }

    fn finish(mut self) -> io::Result<String> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(format!("{:x}", self.hasher.finalize()))
    }
}

impl Write for HashingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.file.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn io_error(path: &Path, source: io::Error) -> PresentationError {
    PresentationError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn clip(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}
