use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Run-level failures. Anything that reaches the binary as one of these
/// aborts the run; per-record problems are reported through
/// [`crate::engine::FetchOutcome`] instead.
#[derive(Debug, Error, Diagnostic)]
pub enum EnaError {
    #[error("invalid accession: {0}")]
    #[diagnostic(help("expected a run, experiment, sample or project accession such as SRR000001 or PRJEB1234"))]
    InvalidAccession(String),

    #[error("invalid taxon id: {0}")]
    #[diagnostic(help("taxon ids are numeric NCBI taxonomy identifiers, e.g. 562"))]
    InvalidTaxonId(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("invalid remote location: {0}")]
    InvalidLocation(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read accession file at {0}")]
    AccessionFile(PathBuf),

    #[error("HTTP client setup failed: {0}")]
    HttpClient(String),

    #[error("failed to parse metadata table {path}: {message}")]
    MetadataParse { path: PathBuf, message: String },

    #[error("filesystem error: {0}")]
    #[diagnostic(help("no progress can be persisted; check permissions and free space under the output directory"))]
    Filesystem(String),

    #[error("run cancelled")]
    Cancelled,
}

/// Failure of a single transfer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("invalid location {0}")]
    InvalidLocation(String),

    #[error("server returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request rejected: {0}")]
    Request(String),

    #[error("incomplete body: received {received} of {expected} bytes")]
    Incomplete { expected: u64, received: u64 },

    #[error("local write failed: {0}")]
    Io(String),

    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("transfer cancelled")]
    Cancelled,
}

impl FetchError {
    /// Connection resets, timeouts, truncated bodies and 408/429/5xx answers
    /// are worth another attempt; everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(_) | FetchError::Incomplete { .. } => true,
            FetchError::Status { status, .. } => is_retryable_status(*status),
            FetchError::InvalidLocation(_)
            | FetchError::Request(_)
            | FetchError::Io(_)
            | FetchError::Exhausted { .. }
            | FetchError::Cancelled => false,
        }
    }

    /// Local filesystem failures cannot be fixed by retrying against the
    /// archive and abort the whole run.
    pub fn is_filesystem(&self) -> bool {
        matches!(self, FetchError::Io(_))
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::Io(err.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("malformed record {id}: {reason}")]
    Malformed { id: String, reason: String },

    #[error("cannot create destination {path}: {message}")]
    Filesystem { path: PathBuf, message: String },
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}
