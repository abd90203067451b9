//! Error types for the pipeline engine
//!
//! Run-phase failures carry one of three classes so that reporting can tell
//! an environment problem apart from a composition bug. Validation problems
//! never surface as `ActionError`; they are collected into a
//! [`ValidationReport`] instead.

use crate::action::Level;
use std::fmt;
use thiserror::Error;

/// Classification used for user-facing reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The job description is wrong
    Validation,
    /// The environment is broken (disk, network, missing tools)
    Infrastructure,
    /// The job deadline or a protocol timeout elapsed
    Timeout,
    /// An internal invariant was violated; a composition or ordering bug
    Bug,
}

impl ErrorClass {
    /// Short operator hint for this class
    pub fn hint(&self) -> &'static str {
        match self {
            ErrorClass::Validation => "fix the job definition",
            ErrorClass::Infrastructure => "fix the environment",
            ErrorClass::Timeout => "the job ran out of time",
            ErrorClass::Bug => "internal error, please file a bug",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::Validation => "validation",
            ErrorClass::Infrastructure => "infrastructure",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Bug => "bug",
        };
        f.write_str(name)
    }
}

/// Error raised while running an action
#[derive(Debug, Error)]
pub enum ActionError {
    /// Internal invariant violated
    #[error("internal error: {0}")]
    Bug(String),

    /// Environment-caused failure
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// Deadline or protocol timeout
    #[error("action '{action}' timed out: {message}")]
    Timeout { action: String, message: String },

    /// I/O error during run
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Namespace data could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure attributed to a specific action in the tree
    #[error("{action} ({level}): {source}")]
    InAction {
        action: String,
        level: Level,
        #[source]
        source: Box<ActionError>,
    },
}

impl ActionError {
    pub fn bug(message: impl Into<String>) -> Self {
        ActionError::Bug(message.into())
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        ActionError::Infrastructure(message.into())
    }

    /// Attribute this error to an action. The innermost attribution wins.
    pub fn in_action(self, action: &str, level: &Level) -> Self {
        match self {
            attributed @ ActionError::InAction { .. } => attributed,
            other => ActionError::InAction {
                action: action.to_string(),
                level: level.clone(),
                source: Box::new(other),
            },
        }
    }

    /// Action and level this error is attributed to, if any
    pub fn origin(&self) -> Option<(&str, &Level)> {
        match self {
            ActionError::InAction { action, level, .. } => Some((action, level)),
            _ => None,
        }
    }

    /// The underlying error without attribution
    pub fn root(&self) -> &ActionError {
        match self {
            ActionError::InAction { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ActionError::Bug(_) | ActionError::Serialization(_) => ErrorClass::Bug,
            ActionError::Infrastructure(_) | ActionError::Io(_) => ErrorClass::Infrastructure,
            ActionError::Timeout { .. } => ErrorClass::Timeout,
            ActionError::InAction { source, .. } => source.class(),
        }
    }
}

/// Result type for action operations
pub type Result<T> = std::result::Result<T, ActionError>;

/// One validation problem, attributed to the action that recorded it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub action: String,
    pub level: Level,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.level, self.action, self.message)
    }
}

/// Every validation problem found in a tree walk, in walk order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Messages only, for assertions and terse output
    pub fn messages(&self) -> Vec<&str> {
        self.issues.iter().map(|i| i.message.as_str()).collect()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation error(s)", self.issues.len())?;
        for issue in &self.issues {
            write!(f, "\n  {}", issue)?;
        }
        Ok(())
    }
}

/// Error type for whole-job operations
#[derive(Debug, Error)]
pub enum JobError {
    /// The tree did not validate
    #[error("job is invalid: {0}")]
    Validation(ValidationReport),

    /// A run-phase failure, naming the action that raised it
    #[error("action '{action}' ({level}) failed: {source}")]
    ActionFailed {
        action: String,
        level: Level,
        #[source]
        source: ActionError,
    },

    /// Operation not allowed in the current job state
    #[error("invalid job state: cannot {operation} while {state}")]
    InvalidState { operation: String, state: String },

    /// Protocol setup or assignment failed
    #[error("protocol '{protocol}': {message}")]
    Protocol { protocol: String, message: String },
}

impl JobError {
    pub fn class(&self) -> ErrorClass {
        match self {
            JobError::Validation(_) => ErrorClass::Validation,
            JobError::ActionFailed { source, .. } => source.class(),
            JobError::InvalidState { .. } => ErrorClass::Bug,
            JobError::Protocol { .. } => ErrorClass::Infrastructure,
        }
    }
}

impl From<ActionError> for JobError {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::InAction {
                action,
                level,
                source,
            } => JobError::ActionFailed {
                action,
                level,
                source: *source,
            },
            other => JobError::ActionFailed {
                action: "pipeline".to_string(),
                level: Level::root(),
                source: other,
            },
        }
    }
}
