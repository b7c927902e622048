use thiserror::Error;

pub type Result<T, E = PortError> = std::result::Result<T, E>;

/// Failure union for everything that crosses a port boundary.
///
/// Errors never propagate above a tick boundary; callers log them, count
/// them, and continue with whatever work is still well-defined.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("store error: {0}")]
    Store(String),

    /// Transport-level upstream failure (connect, timeout, body read).
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// Upstream answered with a non-success status.
    #[error("upstream returned status {status}: {preview}")]
    Status { status: u16, preview: String },

    #[error("failed to decode upstream payload: {0}")]
    Decode(String),

    #[error("notification delivery failed: {0}")]
    Notify(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl PortError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PortError::Cancelled)
    }

    /// A 4xx identifies a missing or invalid resource; retrying within the
    /// tick cannot help. Everything else is treated as transient.
    pub fn is_persistent(&self) -> bool {
        matches!(self, PortError::Status { status, .. } if (400..500).contains(status))
    }
}
