//! Error types for overlay construction

use hilrun_pipeline::ActionError;
use std::path::PathBuf;
use thiserror::Error;

/// Error raised by overlay checks and script emission
#[derive(Debug, Error)]
pub enum OverlayError {
    /// The device declares no usable ssh identity
    #[error("ssh identity: {0}")]
    Identity(String),

    /// A required host tool is missing
    #[error("unable to find '{tool}': {message}")]
    ToolMissing { tool: String, message: String },

    /// The NFS server did not answer the RPC probe
    #[error("NFS server '{server}' is not reachable: {message}")]
    NfsUnreachable { server: String, message: String },

    /// Support script source could not be listed or read
    #[error("support scripts in {path}: {source}")]
    Scripts {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Archive creation failed
    #[error("unable to create lava overlay tarball: {0}")]
    Archive(String),
}

impl From<OverlayError> for ActionError {
    fn from(err: OverlayError) -> Self {
        ActionError::Infrastructure(err.to_string())
    }
}

/// Result type for overlay helpers
pub type Result<T> = std::result::Result<T, OverlayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use hilrun_pipeline::ErrorClass;

    #[test]
    fn test_error_display() {
        let err = OverlayError::ToolMissing {
            tool: "rpcinfo".to_string(),
            message: "not in PATH".to_string(),
        };
        assert_eq!(err.to_string(), "unable to find 'rpcinfo': not in PATH");
    }

    #[test]
    fn test_archive_is_infrastructure() {
        let err: ActionError = OverlayError::Archive("disk full".to_string()).into();
        assert_eq!(err.class(), ErrorClass::Infrastructure);
        assert_eq!(
            err.to_string(),
            "infrastructure error: unable to create lava overlay tarball: disk full"
        );
    }
}
