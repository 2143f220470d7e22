use thiserror::Error;

/// Errors produced by a WebDAV session.
///
/// Malformed server text in the lock-token grammar is not an error; the
/// parse functions return `Option` for that.
#[derive(Debug, Error)]
pub enum DavError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected status for {method} {url}: expected {expected}, got {actual}")]
    UnexpectedStatus {
        method: String,
        url: String,
        expected: String,
        actual: u16,
    },

    #[error("Request partially failed: {0}")]
    PartialFailure(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Lock rejected for {root}: {reason}")]
    LockRejected { root: String, reason: String },

    #[error("Unlock failed for {root} (lock kept): {reason}")]
    UnlockFailed { root: String, reason: String },

    #[error("Lock registry contract violated: {0}")]
    Contract(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl DavError {
    /// Whether this error indicates a logic defect rather than an
    /// environment condition. Callers should not retry these.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DavError::Contract(_) | DavError::UnlockFailed { .. })
    }

    /// Status code carried by the error, when the server produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            DavError::UnexpectedStatus { actual, .. } => Some(*actual),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DavError {
    fn from(e: std::io::Error) -> Self {
        DavError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DavError>;
