//! Backend transport: blocking HTTP client plus the background worker thread.
//!
//! All network calls happen on one named worker thread so the session loop
//! never blocks. Jobs go in over a channel, outcomes come back over another,
//! and the session polls for them while pumping. Dropping the worker sends a
//! shutdown signal and joins the thread.

use std::io::Read;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::error::{BackendError, SessionError};

/// A job for the worker thread.
#[derive(Debug)]
pub enum Job {
    /// POST an edit bundle to `/api/edit`
    Edit { bundle: Vec<u8> },
    /// POST the export bundle to `/api/upload` for S3 repackaging
    Upload {
        bundle: Vec<u8>,
        project_id: String,
        bucket: String,
    },
    /// POST the export bundle to `/api/download`, returning the repackaged zip
    Download {
        bundle: Vec<u8>,
        project_id: String,
    },
    /// GET the project bundle for initial load
    LoadProject { project_id: String },
    /// Stop the worker thread
    Shutdown,
}

/// Result of a finished job, tagged by job kind.
#[derive(Debug)]
pub enum JobOutcome {
    Edit(Result<Vec<u8>, BackendError>),
    Upload(Result<(), BackendError>),
    Download(Result<Vec<u8>, BackendError>),
    LoadProject(Result<Vec<u8>, BackendError>),
}

/// The backend surface the gateway talks to.
///
/// One live implementation (`HttpBackend`) plus test stubs; the seam keeps
/// every state machine testable without a server.
pub trait Backend: Send {
    fn edit(&self, bundle: &[u8]) -> Result<Vec<u8>, BackendError>;
    fn upload(&self, bundle: &[u8], project_id: &str, bucket: &str) -> Result<(), BackendError>;
    fn download(&self, bundle: &[u8], project_id: &str) -> Result<Vec<u8>, BackendError>;
    fn load_project(&self, project_id: &str) -> Result<Vec<u8>, BackendError>;
}

// ============================================================================
// Multipart form encoding
// ============================================================================

/// Minimal `multipart/form-data` body writer.
///
/// The backend takes its bundles as form uploads; this builds the body the
/// same way a browser form post would.
pub struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartForm {
    pub fn new() -> Self {
        // Nanosecond clock makes the boundary unique enough for one process
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Self {
            boundary: format!("----slate-form-{nanos:032x}"),
            body: Vec::new(),
        }
    }

    /// Append a plain text field.
    pub fn text(&mut self, name: &str, value: &str) {
        self.body.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
        self.body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
        );
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
    }

    /// Append a file field.
    pub fn file(&mut self, name: &str, filename: &str, content_type: &str, bytes: &[u8]) {
        self.body.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
        self.body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n"
            )
            .as_bytes(),
        );
        self.body
            .extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
    }

    /// Close the body, returning the `Content-Type` header value and bytes.
    pub fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        let content_type = format!("multipart/form-data; boundary={}", self.boundary);
        (content_type, self.body)
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Live HTTP backend
// ============================================================================

/// Backend implementation over a blocking `ureq` agent.
pub struct HttpBackend {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpBackend {
    /// Create a client for the service at `base_url` (no trailing slash).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::builder().timeout(timeout).build();
        Self {
            agent,
            base_url: base_url.into(),
        }
    }

    fn post_form(&self, path: &str, form: MultipartForm) -> Result<Vec<u8>, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        let (content_type, body) = form.finish();
        let started = Instant::now();

        let response = self
            .agent
            .post(&url)
            .set("Content-Type", &content_type)
            .send_bytes(&body)
            .map_err(map_ureq_error)?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(BackendError::transport)?;

        log::debug!(
            "POST {} ({} bytes up, {} bytes down) in {:?}",
            path,
            body.len(),
            bytes.len(),
            started.elapsed()
        );
        Ok(bytes)
    }
}

impl Backend for HttpBackend {
    fn edit(&self, bundle: &[u8]) -> Result<Vec<u8>, BackendError> {
        let mut form = MultipartForm::new();
        form.file("labels", "labels.zip", "application/zip", bundle);
        self.post_form("/api/edit", form)
    }

    fn upload(&self, bundle: &[u8], project_id: &str, bucket: &str) -> Result<(), BackendError> {
        let mut form = MultipartForm::new();
        form.file("labels", "labels.zip", "application/zip", bundle);
        form.text("id", project_id);
        form.text("bucket", bucket);
        self.post_form("/api/upload", form)?;
        Ok(())
    }

    fn download(&self, bundle: &[u8], project_id: &str) -> Result<Vec<u8>, BackendError> {
        let mut form = MultipartForm::new();
        form.file("labels", "labels.zip", "application/zip", bundle);
        form.text("id", project_id);
        self.post_form("/api/download", form)
    }

    fn load_project(&self, project_id: &str) -> Result<Vec<u8>, BackendError> {
        let url = format!("{}/api/project/{}", self.base_url, project_id);
        let started = Instant::now();

        let response = self.agent.get(&url).call().map_err(map_ureq_error)?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(BackendError::transport)?;

        log::debug!(
            "GET /api/project/{} ({} bytes) in {:?}",
            project_id,
            bytes.len(),
            started.elapsed()
        );
        Ok(bytes)
    }
}

fn map_ureq_error(err: ureq::Error) -> BackendError {
    match err {
        ureq::Error::Status(status, response) => {
            let message = response
                .into_string()
                .unwrap_or_else(|_| "unreadable response body".to_string());
            BackendError::status(status, message)
        }
        ureq::Error::Transport(transport) => BackendError::transport(transport),
    }
}

// ============================================================================
// Worker thread
// ============================================================================

/// Background thread executing backend jobs one at a time.
pub struct Worker {
    job_tx: Sender<Job>,
    outcome_rx: Receiver<JobOutcome>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn the worker around a backend implementation.
    pub fn spawn(backend: impl Backend + 'static) -> Result<Self, SessionError> {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (outcome_tx, outcome_rx) = mpsc::channel::<JobOutcome>();

        let thread_handle = thread::Builder::new()
            .name("backend-worker".to_string())
            .spawn(move || {
                log::info!("Backend worker thread started");
                Self::thread_loop(backend, job_rx, outcome_tx);
                log::info!("Backend worker thread exiting");
            })
            .map_err(|err| SessionError::WorkerSpawn(err.to_string()))?;

        Ok(Self {
            job_tx,
            outcome_rx,
            thread_handle: Some(thread_handle),
        })
    }

    fn thread_loop(
        backend: impl Backend,
        job_rx: Receiver<Job>,
        outcome_tx: Sender<JobOutcome>,
    ) {
        loop {
            let outcome = match job_rx.recv() {
                Ok(Job::Edit { bundle }) => JobOutcome::Edit(backend.edit(&bundle)),
                Ok(Job::Upload {
                    bundle,
                    project_id,
                    bucket,
                }) => JobOutcome::Upload(backend.upload(&bundle, &project_id, &bucket)),
                Ok(Job::Download { bundle, project_id }) => {
                    JobOutcome::Download(backend.download(&bundle, &project_id))
                }
                Ok(Job::LoadProject { project_id }) => {
                    JobOutcome::LoadProject(backend.load_project(&project_id))
                }
                Ok(Job::Shutdown) => {
                    log::debug!("Received shutdown signal");
                    break;
                }
                Err(_) => {
                    log::debug!("Job channel closed, worker exiting");
                    break;
                }
            };
            if outcome_tx.send(outcome).is_err() {
                log::warn!("Outcome channel closed, worker exiting");
                break;
            }
        }
    }

    /// Send a job to the worker.
    pub fn submit(&self, job: Job) {
        if self.job_tx.send(job).is_err() {
            log::error!("Failed to submit backend job: worker channel closed");
        }
    }

    /// Take one finished outcome without blocking.
    pub fn try_take_outcome(&mut self) -> Option<JobOutcome> {
        match self.outcome_rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                log::warn!("Backend worker disconnected");
                None
            }
        }
    }

    /// Block for up to `timeout` waiting for an outcome.
    pub fn wait_outcome(&mut self, timeout: Duration) -> Option<JobOutcome> {
        match self.outcome_rx.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                log::warn!("Backend worker disconnected");
                None
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        log::debug!("Shutting down backend worker");
        let _ = self.job_tx.send(Job::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            if let Err(err) = handle.join() {
                log::warn!("Backend worker panicked: {:?}", err);
            }
        }
    }
}

// ============================================================================
// Test support
// ============================================================================
