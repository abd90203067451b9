//! VLAN protocol
//!
//! The job names the VLANs it needs (with optional switch tags). Which of
//! the device's interfaces ends up on each VLAN is decided by the switch
//! assignment, after validation:
//!
//! ```yaml
//! protocols:
//!   lava-vland:
//!     vlan_one:
//!       tags: [10G]
//!     vlan_two: {}
//! ```

use crate::coordinator::{BarrierRequest, Coordinator};
use crate::error::ProtocolError;
use crate::timeout::parse_timeout;
use async_trait::async_trait;
use hilrun_job::{render_scalar, BOOKKEEPING_KEY};
use hilrun_pipeline::{Assignment, Protocol, Result, SyncRequest};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const VLAND_PROTOCOL: &str = "lava-vland";

pub const DEFAULT_VLAND_TIMEOUT: Duration = Duration::from_secs(300);

/// A VLAN requested by the job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlanRequest {
    pub name: String,
    pub tags: Vec<String>,
}

/// Switch assignment for this device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlandTopology {
    /// VLAN name to the device interface placed on it
    #[serde(default)]
    pub interfaces: BTreeMap<String, String>,

    /// Devices that must reach each vland barrier
    #[serde(default = "one")]
    pub group_size: usize,
}

fn one() -> usize {
    1
}

/// Multinode group this job rendezvous with
#[derive(Debug, Clone)]
struct Rendezvous {
    group_name: String,
    client_name: String,
}

#[derive(Debug)]
pub struct VlandProtocol {
    params: Mapping,
    vlans: Vec<VlanRequest>,
    timeout: Duration,
    topology: Assignment<VlandTopology>,
    rendezvous: Option<Rendezvous>,
    coordinator: Arc<dyn Coordinator>,
}

impl VlandProtocol {
    pub fn new(
        params: Mapping,
        coordinator: Arc<dyn Coordinator>,
    ) -> std::result::Result<Self, ProtocolError> {
        let mut vlans = Vec::new();
        let mut timeout = DEFAULT_VLAND_TIMEOUT;
        for (key, value) in &params {
            let name = render_scalar(key);
            match name.as_str() {
                BOOKKEEPING_KEY => continue,
                "timeout" => {
                    timeout = parse_timeout(value).ok_or_else(|| {
                        ProtocolError::InvalidParameters(format!(
                            "{}: unusable timeout {:?}",
                            VLAND_PROTOCOL, value
                        ))
                    })?;
                    continue;
                }
                _ => {}
            }
            let tags = match value.get("tags") {
                Some(Value::Sequence(tags)) => tags.iter().map(render_scalar).collect(),
                Some(other) => vec![render_scalar(other)],
                None => Vec::new(),
            };
            vlans.push(VlanRequest { name, tags });
        }

        Ok(Self {
            params,
            vlans,
            timeout,
            topology: Assignment::Pending,
            rendezvous: None,
            coordinator,
        })
    }

    /// Synchronise through the multinode group's barrier
    pub fn with_rendezvous(
        mut self,
        group_name: impl Into<String>,
        client_name: impl Into<String>,
    ) -> Self {
        self.rendezvous = Some(Rendezvous {
            group_name: group_name.into(),
            client_name: client_name.into(),
        });
        self
    }

    /// VLANs in declaration order
    pub fn vlans(&self) -> &[VlanRequest] {
        &self.vlans
    }

    pub fn topology(&self) -> &Assignment<VlandTopology> {
        &self.topology
    }

    pub fn assign_topology(&mut self, topology: VlandTopology) -> Result<()> {
        debug!(vlans = topology.interfaces.len(), "vland topology assigned");
        self.topology.resolve(topology)
    }

    /// `vlan,interface` for every declared VLAN the switch placed an
    /// interface on, in declaration order
    pub fn names(&self) -> Result<Vec<String>> {
        let topology = self.topology.require("vland topology")?;
        Ok(self
            .vlans
            .iter()
            .filter_map(|vlan| {
                topology
                    .interfaces
                    .get(&vlan.name)
                    .map(|iface| format!("{},{}", vlan.name, iface))
            })
            .collect())
    }
}

#[async_trait]
impl Protocol for VlandProtocol {
    fn name(&self) -> &str {
        VLAND_PROTOCOL
    }

    fn params(&self) -> &Mapping {
        &self.params
    }

    fn is_assigned(&self) -> bool {
        self.topology.is_resolved()
    }

    /// Expects `{"interfaces": {"<vlan>": "<iface>"}, "group_size": n}`
    fn assign(&mut self, assignment: serde_json::Value) -> Result<()> {
        let topology: VlandTopology = serde_json::from_value(assignment).map_err(|e| {
            ProtocolError::InvalidParameters(format!("vland assignment: {}", e))
        })?;
        self.assign_topology(topology)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    async fn synchronise(&self, request: &SyncRequest) -> Result<serde_json::Value> {
        let topology = self.topology.require("vland topology")?;
        let rendezvous = match &self.rendezvous {
            Some(r) if topology.group_size > 1 => r,
            _ => return Ok(serde_json::json!({"response": "ack", "message_id": request.message_id})),
        };

        let limit = match request.deadline.and_then(|d| d.remaining()) {
            Some(remaining) => remaining.min(self.timeout),
            None => self.timeout,
        };
        let barrier = BarrierRequest::sync(
            &rendezvous.group_name,
            &rendezvous.client_name,
            &request.message_id,
            topology.group_size,
        );
        match tokio::time::timeout(limit, self.coordinator.barrier(&barrier)).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(ProtocolError::Timeout {
                    protocol: VLAND_PROTOCOL.to_string(),
                    message_id: request.message_id.clone(),
                    after: limit,
                }
                .into())
            }
        }
        Ok(serde_json::json!({"response": "ack", "message_id": request.message_id}))
    }
}
