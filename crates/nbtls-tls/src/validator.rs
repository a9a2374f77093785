//! Boundary to the external certificate validator.
//!
//! X.509 parsing and chain building live outside this crate. The engine
//! starts a [`ValidationJob`] once ServerHelloDone arrives, polls it, and
//! consumes only the outcome: the leaf's SubjectPublicKeyInfo and the names
//! it certifies.

use std::sync::mpsc;
use std::sync::Arc;
use std::task::Poll;
use std::thread;

use nbtls_types::TlsError;

/// Trust anchors (DER certificates) a chain is validated against.
#[derive(Debug, Default, Clone)]
pub struct TrustRoot {
    anchors: Vec<Vec<u8>>,
}

impl TrustRoot {
    pub fn new(anchors: Vec<Vec<u8>>) -> Self {
        Self { anchors }
    }

    pub fn anchors(&self) -> &[Vec<u8>] {
        &self.anchors
    }
}

/// Result of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCertificate {
    /// DER SubjectPublicKeyInfo of the leaf certificate.
    pub spki_der: Vec<u8>,
    /// DNS names the leaf is valid for (subject CN and SAN entries).
    pub names: Vec<String>,
}

/// Diagnostic progress of a running validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobProgress {
    pub completed: usize,
    pub total: usize,
    pub message: String,
}

/// A running validation.
pub trait ValidationJob: Send {
    /// Check for completion without blocking.
    fn poll(&mut self) -> Poll<Result<ValidatedCertificate, TlsError>>;

    /// Stop the job. Later polls may return anything.
    fn abort(&mut self);

    fn progress(&self) -> Option<JobProgress> {
        None
    }
}

/// Starts validation jobs.
pub trait Validator: Send + Sync {
    /// Begin validating `chain` (leaf first) against `root`.
    fn start(
        &self,
        chain: &[Vec<u8>],
        root: &Arc<TrustRoot>,
    ) -> Result<Box<dyn ValidationJob>, TlsError>;
}

/// Validation function signature used by the adapters below.
pub type ValidateFn =
    dyn Fn(&[Vec<u8>], &TrustRoot) -> Result<ValidatedCertificate, TlsError> + Send + Sync;

/// Runs a validation function synchronously inside `start`.
pub struct InlineValidator {
    func: Arc<ValidateFn>,
}

impl InlineValidator {
    pub fn new(
        func: impl Fn(&[Vec<u8>], &TrustRoot) -> Result<ValidatedCertificate, TlsError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            func: Arc::new(func),
        }
    }
}

struct ReadyJob(Option<Result<ValidatedCertificate, TlsError>>);

impl ValidationJob for ReadyJob {
    fn poll(&mut self) -> Poll<Result<ValidatedCertificate, TlsError>> {
        match self.0.take() {
            Some(r) => Poll::Ready(r),
            None => Poll::Ready(Err(TlsError::CertVerifyFailed(
                "validation result already consumed".into(),
            ))),
        }
    }

    fn abort(&mut self) {
        self.0 = None;
    }
}

impl Validator for InlineValidator {
    fn start(
        &self,
        chain: &[Vec<u8>],
        root: &Arc<TrustRoot>,
    ) -> Result<Box<dyn ValidationJob>, TlsError> {
        Ok(Box::new(ReadyJob(Some((self.func)(chain, root)))))
    }
}

/// Runs a validation function on a worker thread.
pub struct BackgroundValidator {
    func: Arc<ValidateFn>,
}

impl BackgroundValidator {
    pub fn new(
        func: impl Fn(&[Vec<u8>], &TrustRoot) -> Result<ValidatedCertificate, TlsError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            func: Arc::new(func),
        }
    }
}

struct BackgroundJob {
    rx: Option<mpsc::Receiver<Result<ValidatedCertificate, TlsError>>>,
    total: usize,
}

impl ValidationJob for BackgroundJob {
    fn poll(&mut self) -> Poll<Result<ValidatedCertificate, TlsError>> {
        let Some(rx) = &self.rx else {
            return Poll::Ready(Err(TlsError::CertVerifyFailed("validation aborted".into())));
        };
        match rx.try_recv() {
            Ok(r) => {
                self.rx = None;
                Poll::Ready(r)
            }
            Err(mpsc::TryRecvError::Empty) => Poll::Pending,
            Err(mpsc::TryRecvError::Disconnected) => {
                self.rx = None;
                Poll::Ready(Err(TlsError::CertVerifyFailed(
                    "validator exited without a result".into(),
                )))
            }
        }
    }

    fn abort(&mut self) {
        // The worker's send fails once the receiver is gone.
        self.rx = None;
    }

    fn progress(&self) -> Option<JobProgress> {
        Some(JobProgress {
            completed: 0,
            total: self.total,
            message: "validating certificate chain".into(),
        })
    }
}

impl Validator for BackgroundValidator {
    fn start(
        &self,
        chain: &[Vec<u8>],
        root: &Arc<TrustRoot>,
    ) -> Result<Box<dyn ValidationJob>, TlsError> {
        let (tx, rx) = mpsc::channel();
        let func = Arc::clone(&self.func);
        let chain = chain.to_vec();
        let root = Arc::clone(root);
        let total = chain.len();
        thread::Builder::new()
            .name("nbtls-validator".into())
            .spawn(move || {
                let _ = tx.send(func(&chain, &root));
            })
            .map_err(|e| TlsError::NoMemory(format!("validator thread: {e}")))?;
        Ok(Box::new(BackgroundJob {
            rx: Some(rx),
            total,
        }))
    }
}

/// Check `expected` against the certified names.
///
/// Comparison is ASCII case-insensitive. A name of the form `*.rest`
/// matches exactly one extra leftmost label.
pub fn check_name(names: &[String], expected: &str) -> bool {
    names.iter().any(|name| name_matches(name, expected))
}

fn name_matches(pattern: &str, expected: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        match expected.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest.eq_ignore_ascii_case(suffix),
            None => false,
        }
    } else {
        pattern.eq_ignore_ascii_case(expected)
    }
}
