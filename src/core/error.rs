/// Session-level error taxonomy.
///
/// Device timeouts are not errors: they resolve as a failure outcome.
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Missing subject, empty device selection or bad numeric parameter.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Operation not allowed in the current session state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The transport refused the command.
    #[error("command delivery to device {device_id} failed: {reason}")]
    Delivery { device_id: u8, reason: String },

    #[error("remote session registration failed: {0}")]
    RemoteRegistration(String),

    #[error("remote session finalization failed: {0}")]
    RemoteFinalize(String),
}

impl SessionError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Synchronous rejections leave all state untouched.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::InvalidOperation(_))
    }
}
