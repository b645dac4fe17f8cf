use serde_json::Value;

use crate::security::session_store::StorageError;
use crate::security::token_refresh::RefreshError;
use crate::transport::TransportError;

/// The final, non-retryable outcome of a gateway call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    /// No response was received (includes timeouts). Never triggers renewal.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The backend answered with a non-2xx status that needs no session action.
    #[error("request failed with status {status}")]
    Status { status: u16, body: Value },
    /// Authentication failed beyond recovery; the session was cleared and the
    /// logout navigation triggered.
    #[error("session expired (status {status})")]
    SessionExpired { status: u16 },
    /// The renewal this request depended on failed; the session was cleared.
    #[error(transparent)]
    Refresh(#[from] RefreshError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl GatewayError {
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Status { status, .. } | GatewayError::SessionExpired { status } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// True when the user has to log in again.
    pub fn is_logout(&self) -> bool {
        matches!(self, GatewayError::SessionExpired { .. } | GatewayError::Refresh(_))
    }
}
