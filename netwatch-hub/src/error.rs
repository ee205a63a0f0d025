use thiserror::Error;

/// Errors visible at the ingestion boundary.
///
/// Only malformed input is ever surfaced to a submitting agent. Rate
/// anomalies, persistence failures and subscriber delivery failures stay
/// inside the component that hit them.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),
}

impl HubError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        HubError::MalformedSnapshot(reason.into())
    }

    pub fn reason(&self) -> &str {
        match self {
            HubError::MalformedSnapshot(reason) => reason,
        }
    }
}

/// Failures raised by a durable-store collaborator.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("persistence timed out after {0} ms")]
    Timeout(u64),
    #[error("{0} persistence writes already in flight")]
    Saturated(usize),
    #[error("persistence task aborted: {0}")]
    Aborted(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
