//! Protocol seam
//!
//! A protocol is shared by every action of a job and coordinates the job
//! with its peer jobs on other devices. Its cluster-wide data (roles,
//! topology) arrives in two stages: what the job declares is known at
//! validation time, the assignment made by the external device-assignment
//! step only by run time. [`Assignment`] makes that transition explicit.

use crate::deadline::Deadline;
use crate::error::{ActionError, Result};
use crate::job::Job;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;
use std::any::Any;
use std::fmt;
use tracing::debug;

/// Pending or resolved cluster-wide data
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Assignment<T> {
    #[default]
    Pending,
    Resolved(T),
}

impl<T> Assignment<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Assignment::Resolved(_))
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Assignment::Resolved(value) => Some(value),
            Assignment::Pending => None,
        }
    }

    /// The one pending to resolved transition. Resolving twice is a bug.
    pub fn resolve(&mut self, value: T) -> Result<()> {
        if self.is_resolved() {
            return Err(ActionError::bug("assignment already resolved"));
        }
        *self = Assignment::Resolved(value);
        Ok(())
    }

    /// Resolved data, or an internal error naming what was expected
    pub fn require(&self, what: &str) -> Result<&T> {
        self.get().ok_or_else(|| {
            ActionError::bug(format!("{} assignment is incomplete at run time", what))
        })
    }
}

/// A synchronisation request issued by an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Action issuing the request
    pub action: String,

    /// Rendezvous identifier shared by every peer
    pub message_id: String,

    #[serde(skip)]
    pub deadline: Option<Deadline>,
}

impl SyncRequest {
    pub fn new(action: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            message_id: message_id.into(),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Process-wide synchronisation object shared by all actions in a job
#[async_trait]
pub trait Protocol: Send + Sync + fmt::Debug {
    /// Stable name, matching the key in the job's `protocols` section
    fn name(&self) -> &str;

    /// The mapping the job declared for this protocol
    fn params(&self) -> &Mapping;

    /// Whether the external assignment has been applied
    fn is_assigned(&self) -> bool;

    /// Apply the external assignment, delivered as JSON
    fn assign(&mut self, assignment: serde_json::Value) -> Result<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Block until the peers satisfy this protocol's exchange requirement,
    /// or fail under the protocol's own timeout policy.
    async fn synchronise(&self, request: &SyncRequest) -> Result<serde_json::Value>;
}

/// Run `request` through every named protocol the job declares, in order.
///
/// Protocols the job does not carry are skipped; an action only calls this
/// after confirming its own participation.
pub async fn call_protocols(
    job: &Job,
    names: &[&str],
    request: &SyncRequest,
) -> Result<Vec<serde_json::Value>> {
    let mut replies = Vec::new();
    for protocol in job.protocols().iter().filter(|p| names.contains(&p.name())) {
        debug!(
            protocol = protocol.name(),
            message_id = %request.message_id,
            action = %request.action,
            "calling protocol"
        );
        replies.push(protocol.synchronise(request).await?);
    }
    Ok(replies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[test]
    fn test_assignment_transition() {
        let mut roles: Assignment<Vec<String>> = Assignment::Pending;
        assert!(!roles.is_resolved());
        assert!(roles.get().is_none());

        let err = roles.require("multinode role").unwrap_err();
        assert_eq!(err.class(), ErrorClass::Bug);

        roles.resolve(vec!["server".to_string()]).unwrap();
        assert!(roles.is_resolved());
        assert_eq!(roles.require("multinode role").unwrap().len(), 1);

        assert!(roles.resolve(vec![]).is_err());
    }

    #[test]
    fn test_sync_request() {
        let request = SyncRequest::new("lava-multinode-overlay", "lava_start")
            .with_deadline(Deadline::none());
        assert_eq!(request.message_id, "lava_start");
        assert!(request.deadline.is_some());
    }
}
