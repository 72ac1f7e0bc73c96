use thiserror::Error;

/// Error kinds a pipeline stage can fail with. Kept distinct from ad-hoc
/// strings so stage code can match on kind instead of sniffing messages —
/// string-sniffing is confined to provider adapters that must interpret raw
/// HTTP/API error bodies (see `is_quota_error`).
#[derive(Error, Debug)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("capacity exceeded: {0}")]
    Capacity(String),

    #[error("missing credentials: {0}")]
    CredentialMissing(String),

    #[error("provider quota exhausted: {0}")]
    ProviderQuota(String),

    #[error("provider size limit exceeded: {0}")]
    ProviderSizeLimit(String),

    #[error("transient provider error: {0}")]
    TransientProvider(String),

    #[error("stage timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("cancelled by user")]
    Cancelled,

    #[error("data contract violation: {0}")]
    DataContract(String),

    #[error("media operation failed: {0}")]
    Media(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Truncated, single-line description suitable for `Job.error` (kind 10:
    /// cleanup failures and provider stack traces never reach the user).
    pub fn user_message(&self) -> String {
        let msg = self.to_string().replace('\n', " ");
        if msg.chars().count() > 1000 {
            msg.chars().take(1000).collect()
        } else {
            msg
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
