//! Stub adapter and a one-thread HTTP responder shared by the unit tests.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use alkemy_contracts::jobs::{JobHandle, JobStatus};
use alkemy_contracts::request::{GenerationKind, GenerationRequest};
use reqwest::blocking::Client as HttpClient;

use crate::adapter::{ensure_supported, ProviderAdapter, ProviderKind};
use crate::clock::{Clock, ManualClock};
use crate::error::GenerationError;
use crate::poller::PollOptions;

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Status(JobStatus),
    Error(GenerationError),
}

#[derive(Default)]
struct ScriptState {
    steps: VecDeque<Step>,
    submits: usize,
    fetch_times: Vec<Duration>,
    cancels: usize,
}

/// Adapter that replays a fixed script of poll outcomes.
pub(crate) struct ScriptedAdapter {
    name: String,
    kinds: Vec<GenerationKind>,
    provider_kind: ProviderKind,
    clock: Option<Arc<ManualClock>>,
    submit_error: Option<GenerationError>,
    fallback: Step,
    poll_options: Option<PollOptions>,
    state: Mutex<ScriptState>,
}

impl ScriptedAdapter {
    pub(crate) fn new(name: &str, kinds: &[GenerationKind]) -> Self {
        Self {
            name: name.to_string(),
            kinds: kinds.to_vec(),
            provider_kind: ProviderKind::Dryrun,
            clock: None,
            submit_error: None,
            fallback: Step::Status(JobStatus::running(None)),
            poll_options: None,
            state: Mutex::new(ScriptState::default()),
        }
    }

    pub(crate) fn with_clock(mut self, clock: Arc<ManualClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub(crate) fn with_steps(self, steps: Vec<Step>) -> Self {
        self.lock().steps = steps.into();
        self
    }

    pub(crate) fn with_fallback(mut self, step: Step) -> Self {
        self.fallback = step;
        self
    }

    pub(crate) fn with_submit_error(mut self, err: GenerationError) -> Self {
        self.submit_error = Some(err);
        self
    }

    pub(crate) fn with_provider_kind(mut self, kind: ProviderKind) -> Self {
        self.provider_kind = kind;
        self
    }

    pub(crate) fn with_poll_options(mut self, options: PollOptions) -> Self {
        self.poll_options = Some(options);
        self
    }

    pub(crate) fn submit_count(&self) -> usize {
        self.lock().submits
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.lock().fetch_times.len()
    }

    pub(crate) fn fetch_times(&self) -> Vec<Duration> {
        self.lock().fetch_times.clone()
    }

    pub(crate) fn cancel_count(&self) -> usize {
        self.lock().cancels
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ProviderAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        self.provider_kind
    }

    fn supported_kinds(&self) -> &[GenerationKind] {
        &self.kinds
    }

    fn submit(&self, request: &GenerationRequest) -> Result<JobHandle, GenerationError> {
        ensure_supported(self, request)?;
        let mut state = self.lock();
        state.submits += 1;
        if let Some(err) = &self.submit_error {
            return Err(err.clone());
        }
        Ok(JobHandle::new(&self.name, format!("{}-{}", self.name, state.submits)))
    }

    fn fetch_status(&self, _handle: &JobHandle) -> Result<JobStatus, GenerationError> {
        let now = self.clock.as_ref().map(|clock| clock.now()).unwrap_or_default();
        let mut state = self.lock();
        state.fetch_times.push(now);
        let step = state.steps.pop_front().unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::Status(status) => Ok(status),
            Step::Error(err) => Err(err),
        }
    }

    fn cancel(&self, _handle: &JobHandle) -> Result<(), GenerationError> {
        self.lock().cancels += 1;
        Ok(())
    }

    fn default_poll_options(&self, request: &GenerationRequest) -> PollOptions {
        self.poll_options
            .unwrap_or_default()
            .with_request_overrides(request)
    }
}

/// HTTP client for talking to [`MockServer`]; ignores proxy variables.
pub(crate) fn test_http() -> HttpClient {
    HttpClient::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_else(|_| HttpClient::new())
}

/// A request seen by [`MockServer`].
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: String,
}

impl RecordedRequest {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Serves canned `(status, body)` responses in order, one per connection.
pub(crate) struct MockServer {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    worker: Option<JoinHandle<()>>,
}

impl MockServer {
    pub(crate) fn start(responses: Vec<(u16, String)>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let base_url = format!("http://{}", listener.local_addr()?);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        let worker = thread::spawn(move || {
            for (code, body) in responses {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                let Ok(request) = read_request(&mut stream) else {
                    return;
                };
                if let Ok(mut rows) = recorded.lock() {
                    rows.push(request);
                }
                let response = format!(
                    "HTTP/1.1 {code} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    reason(code),
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
            }
        });
        Ok(Self {
            base_url,
            requests,
            worker: Some(worker),
        })
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    /// Waits for every scripted response to be served.
    pub(crate) fn finish(mut self) -> Vec<RecordedRequest> {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.requests()
    }
}

fn read_request(stream: &mut std::net::TcpStream) -> std::io::Result<RecordedRequest> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_string();
            let value = value.trim().to_string();
            if key.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().unwrap_or(0);
            }
            headers.push((key, value));
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;
    Ok(RecordedRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

fn reason(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        404 => "Not Found",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}
