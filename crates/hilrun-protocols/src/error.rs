//! Error types for protocol rendezvous

use hilrun_pipeline::ActionError;
use std::time::Duration;
use thiserror::Error;

/// Error raised while setting up or running a protocol
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Peers did not arrive in time
    #[error("protocol '{protocol}' timed out after {after:?} waiting for '{message_id}'")]
    Timeout {
        protocol: String,
        message_id: String,
        after: Duration,
    },

    /// The coordinator refused the request
    #[error("coordinator rejected '{message_id}': {reason}")]
    Rejected { message_id: String, reason: String },

    /// The coordinator could not be reached or answered garbage
    #[error("coordinator transport error: {0}")]
    Transport(String),

    /// Run-time data needed before assignment completed
    #[error("protocol '{0}' is not assigned")]
    NotAssigned(String),

    /// The job declared the protocol with unusable parameters
    #[error("invalid protocol parameters: {0}")]
    InvalidParameters(String),
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        ProtocolError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Transport(err.to_string())
    }
}

impl From<ProtocolError> for ActionError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Timeout { ref protocol, .. } => ActionError::Timeout {
                action: protocol.clone(),
                message: err.to_string(),
            },
            ProtocolError::NotAssigned(_) => ActionError::Bug(err.to_string()),
            ProtocolError::Rejected { .. }
            | ProtocolError::Transport(_)
            | ProtocolError::InvalidParameters(_) => ActionError::Infrastructure(err.to_string()),
        }
    }
}

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;
    use hilrun_pipeline::ErrorClass;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::Rejected {
            message_id: "lava_start".to_string(),
            reason: "unknown group".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "coordinator rejected 'lava_start': unknown group"
        );
    }

    #[test]
    fn test_into_action_error_class() {
        let timeout = ProtocolError::Timeout {
            protocol: "lava-multinode".to_string(),
            message_id: "lava_start".to_string(),
            after: Duration::from_secs(5),
        };
        assert_eq!(ActionError::from(timeout).class(), ErrorClass::Timeout);
        assert_eq!(
            ActionError::from(ProtocolError::NotAssigned("lava-vland".into())).class(),
            ErrorClass::Bug
        );
        assert_eq!(
            ActionError::from(ProtocolError::Transport("refused".into())).class(),
            ErrorClass::Infrastructure
        );
    }
}
