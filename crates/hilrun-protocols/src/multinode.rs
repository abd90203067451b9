//! Multinode protocol
//!
//! Declared by the job as
//!
//! ```yaml
//! protocols:
//!   lava-multinode:
//!     target_group: grp-1
//!     role: server
//!     timeout: {minutes: 5}
//! ```
//!
//! The `roles` map (client name to role, for every device in the group) is
//! only known once all devices of the group are assigned.

use crate::coordinator::{BarrierRequest, Coordinator};
use crate::error::ProtocolError;
use crate::timeout::parse_timeout;
use async_trait::async_trait;
use hilrun_job::{entries_without_bookkeeping, render_scalar};
use hilrun_pipeline::{Assignment, Protocol, Result, SyncRequest};
use serde_yaml::{Mapping, Value};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const MULTINODE_PROTOCOL: &str = "lava-multinode";

/// Rendezvous timeout when the job does not set one
pub const DEFAULT_MULTINODE_TIMEOUT: Duration = Duration::from_secs(300);

/// Client name to role, in declaration order
pub type RoleMap = Vec<(String, String)>;

#[derive(Debug)]
pub struct MultinodeProtocol {
    params: Mapping,
    client_name: String,
    target_group: Option<String>,
    role: Option<String>,
    timeout: Duration,
    roles: Assignment<RoleMap>,
    coordinator: Arc<dyn Coordinator>,
}

impl MultinodeProtocol {
    /// Build from the job's declaration. A declared `roles` map counts as
    /// an assignment already applied.
    pub fn new(
        params: Mapping,
        client_name: impl Into<String>,
        coordinator: Arc<dyn Coordinator>,
    ) -> std::result::Result<Self, ProtocolError> {
        let get = |key: &str| params.get(key).map(render_scalar);
        let timeout = match params.get("timeout") {
            Some(value) => parse_timeout(value).ok_or_else(|| {
                ProtocolError::InvalidParameters(format!(
                    "{}: unusable timeout {:?}",
                    MULTINODE_PROTOCOL, value
                ))
            })?,
            None => DEFAULT_MULTINODE_TIMEOUT,
        };
        let roles = match params.get("roles") {
            Some(Value::Mapping(roles)) => Assignment::Resolved(entries_without_bookkeeping(roles)),
            Some(other) => {
                return Err(ProtocolError::InvalidParameters(format!(
                    "{}: roles must be a mapping, got {:?}",
                    MULTINODE_PROTOCOL, other
                )))
            }
            None => Assignment::Pending,
        };

        Ok(Self {
            target_group: get("target_group"),
            role: get("role"),
            timeout,
            roles,
            client_name: client_name.into(),
            params,
            coordinator,
        })
    }

    pub fn target_group(&self) -> Option<&str> {
        self.target_group.as_deref()
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Group members and their roles, once assigned
    pub fn roles(&self) -> &Assignment<RoleMap> {
        &self.roles
    }

    /// Whether this job takes part in a multinode group at all
    pub fn is_participating(&self) -> bool {
        self.target_group.is_some()
    }

    /// Apply the group assignment
    pub fn assign_roles(&mut self, roles: RoleMap) -> Result<()> {
        info!(group = ?self.target_group, members = roles.len(), "multinode roles assigned");
        self.roles.resolve(roles)
    }
}

#[async_trait]
impl Protocol for MultinodeProtocol {
    fn name(&self) -> &str {
        MULTINODE_PROTOCOL
    }

    fn params(&self) -> &Mapping {
        &self.params
    }

    fn is_assigned(&self) -> bool {
        self.roles.is_resolved()
    }

    /// Expects `{"roles": {"<client>": "<role>", ...}}`
    fn assign(&mut self, assignment: serde_json::Value) -> Result<()> {
        let roles = assignment
            .get("roles")
            .and_then(serde_json::Value::as_object)
            .ok_or_else(|| {
                ProtocolError::InvalidParameters("assignment lacks a roles object".to_string())
            })?
            .iter()
            .map(|(client, role)| {
                let role = role.as_str().map(str::to_string).unwrap_or_else(|| role.to_string());
                (client.clone(), role)
            })
            .collect();
        self.assign_roles(roles)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    async fn synchronise(&self, request: &SyncRequest) -> Result<serde_json::Value> {
        let group = self
            .target_group
            .as_deref()
            .ok_or_else(|| ProtocolError::NotAssigned(MULTINODE_PROTOCOL.to_string()))?;
        let roles = self.roles.require("multinode roles")?;

        let limit = match request.deadline.and_then(|d| d.remaining()) {
            Some(remaining) => remaining.min(self.timeout),
            None => self.timeout,
        };
        let barrier = BarrierRequest::sync(group, &self.client_name, &request.message_id, roles.len());
        debug!(group, message_id = %request.message_id, size = roles.len(), ?limit, "multinode sync");

        match tokio::time::timeout(limit, self.coordinator.barrier(&barrier)).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(ProtocolError::Timeout {
                    protocol: MULTINODE_PROTOCOL.to_string(),
                    message_id: request.message_id.clone(),
                    after: limit,
                }
                .into())
            }
        }

        Ok(serde_json::json!({
            "response": "ack",
            "message_id": request.message_id,
            "group_name": group,
        }))
    }
}
