//! Device description types
//!
//! The device description is rendered from a device-type template by the
//! scheduler. Only the parts the dispatcher core reads are typed here.

use crate::{JobSpecError, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Interface entry naming the DUT's own network identity
pub const TARGET_INTERFACE: &str = "target";

/// Rendered device dictionary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeviceDescription {
    /// Device hostname (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Supported action methods
    #[serde(default)]
    pub actions: DeviceActions,

    /// Device parameters (network interfaces etc.)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<DeviceParameters>,

    /// Static devices attached to the DUT (probes, power meters)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub static_info: Vec<StaticInfo>,

    /// Storage methods exposed to test shells, in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storage_info: Vec<Mapping>,
}

impl DeviceDescription {
    /// Parse a device description from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|source| JobSpecError::Parse {
            what: "device description".to_string(),
            source,
        })
    }

    /// Load a device description from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| JobSpecError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Whether any deploy method is ssh based
    pub fn supports_ssh_deploy(&self) -> bool {
        self.actions.deploy.methods.keys().any(|m| m.contains("ssh"))
    }

    /// All declared network interfaces
    pub fn interfaces(&self) -> Option<&BTreeMap<String, InterfaceSpec>> {
        self.parameters.as_ref().and_then(|p| p.interfaces.as_ref())
    }

    /// The DUT's own network identity, if declared
    pub fn target_interface(&self) -> Option<&InterfaceSpec> {
        self.interfaces().and_then(|i| i.get(TARGET_INTERFACE))
    }

    /// Interfaces that can be placed on VLANs (everything except `target`)
    pub fn vland_interfaces(&self) -> impl Iterator<Item = (&String, &InterfaceSpec)> {
        self.interfaces()
            .into_iter()
            .flat_map(|ifaces| ifaces.iter())
            .filter(|(name, _)| name.as_str() != TARGET_INTERFACE)
    }

    /// First static device declaring both a probe channel and a probe IP
    pub fn probe(&self) -> Option<(&str, &str)> {
        self.static_info.iter().find_map(|info| {
            match (info.probe_channel.as_deref(), info.probe_ip.as_deref()) {
                (Some(channel), Some(ip)) => Some((channel, ip)),
                _ => None,
            }
        })
    }
}

/// Action methods the device supports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeviceActions {
    #[serde(default)]
    pub deploy: MethodTable,

    #[serde(default)]
    pub boot: MethodTable,
}

/// Method name to method parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MethodTable {
    #[serde(default)]
    pub methods: BTreeMap<String, Value>,
}

impl MethodTable {
    /// Parameters of a method as a mapping
    pub fn method(&self, name: &str) -> Option<&Mapping> {
        self.methods.get(name).and_then(Value::as_mapping)
    }
}

/// Device parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeviceParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interfaces: Option<BTreeMap<String, InterfaceSpec>>,
}

/// One network interface of the device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InterfaceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// sysfs path of the interface on the DUT
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sysfs: Option<String>,

    /// Switch tags; an untagged interface is the primary interface
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl InterfaceSpec {
    pub fn is_primary(&self) -> bool {
        self.tags.is_empty()
    }
}

/// A static device attached to the DUT
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StaticInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_channel: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_ip: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}
