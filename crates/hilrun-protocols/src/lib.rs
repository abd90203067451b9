//! hilrun rendezvous protocols
//!
//! Concrete [`Protocol`] implementations a job can declare:
//!
//! - `lava-multinode` ([`MultinodeProtocol`]) - role assignment and
//!   barriers across the devices of one group
//! - `lava-vland` ([`VlandProtocol`]) - VLAN topology for the device's
//!   interfaces
//!
//! Both reach their peers through a [`Coordinator`].

pub mod coordinator;
pub mod error;
pub mod multinode;
pub mod timeout;
pub mod vland;

pub use coordinator::*;
pub use error::*;
pub use multinode::*;
pub use timeout::*;
pub use vland::*;

use hilrun_job::JobDefinition;
use hilrun_pipeline::Protocol;
use serde_yaml::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Instantiate every protocol the job declares.
///
/// `client_name` identifies this job to its peers. Unknown protocol names
/// are left to other components and skipped here.
pub fn protocols_for_job(
    definition: &JobDefinition,
    client_name: &str,
    coordinator: Arc<dyn Coordinator>,
) -> Result<Vec<Box<dyn Protocol>>> {
    let mut protocols: Vec<Box<dyn Protocol>> = Vec::new();
    let mut group = None;

    if let Some(params) = definition.protocol(MULTINODE_PROTOCOL) {
        let multinode =
            MultinodeProtocol::new(mapping_of(MULTINODE_PROTOCOL, params)?, client_name, coordinator.clone())?;
        group = multinode.target_group().map(str::to_string);
        protocols.push(Box::new(multinode));
    }

    if let Some(params) = definition.protocol(VLAND_PROTOCOL) {
        let mut vland = VlandProtocol::new(mapping_of(VLAND_PROTOCOL, params)?, coordinator.clone())?;
        if let Some(group) = &group {
            vland = vland.with_rendezvous(group, client_name);
        }
        protocols.push(Box::new(vland));
    }

    for name in definition.protocols.keys() {
        if name != MULTINODE_PROTOCOL && name != VLAND_PROTOCOL {
            warn!(protocol = %name, "protocol not handled by the dispatcher core");
        }
    }
    debug!(count = protocols.len(), "protocols instantiated");
    Ok(protocols)
}

fn mapping_of(name: &str, params: &Value) -> Result<serde_yaml::Mapping> {
    match params {
        Value::Mapping(mapping) => Ok(mapping.clone()),
        Value::Null => Ok(serde_yaml::Mapping::new()),
        other => Err(ProtocolError::InvalidParameters(format!(
            "{} must be a mapping, got {:?}",
            name, other
        ))),
    }
}
