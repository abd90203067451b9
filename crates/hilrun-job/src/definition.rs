//! Job definition types
//!
//! A job is a list of single-key action blocks (`deploy`, `boot`, `test`)
//! plus job-wide settings: protocols, secrets, timeouts and the output
//! directory for artifacts.

use crate::{JobSpecError, Result, DEFAULT_NAMESPACE};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Placeholder replaced by the job id in the results directory template
pub const JOB_ID_PLACEHOLDER: &str = "%s";

/// A submitted job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct JobDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,

    /// Whole-job timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_timeout: Option<u64>,

    /// Ordered action blocks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionBlock>,

    /// Declared protocols keyed by protocol name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub protocols: BTreeMap<String, Value>,

    /// Secrets exported to the test shell
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<Mapping>,

    /// Where job artifacts (overlay tarballs) are written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    /// Job-wide persistent NFS root, used when a deployment does not set one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_nfs: Option<PersistentNfs>,
}

impl JobDefinition {
    /// Parse a job definition from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|source| JobSpecError::Parse {
            what: "job definition".to_string(),
            source,
        })
    }

    /// Load a job definition from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| JobSpecError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Deploy blocks in job order
    pub fn deployments(&self) -> impl Iterator<Item = &DeployParameters> {
        self.actions.iter().filter_map(|a| a.deploy.as_ref())
    }

    /// Test blocks in job order
    pub fn tests(&self) -> impl Iterator<Item = &TestParameters> {
        self.actions.iter().filter_map(|a| a.test.as_ref())
    }

    pub fn has_test_action(&self) -> bool {
        self.tests().next().is_some()
    }

    /// Namespaces that contain at least one test action
    pub fn test_action_namespaces(&self) -> BTreeSet<String> {
        self.tests().map(|t| t.namespace().to_string()).collect()
    }

    /// Test definitions declared for a namespace, in job order
    pub fn test_definitions(&self, namespace: &str) -> Vec<&TestDefinition> {
        self.tests()
            .filter(|t| t.namespace() == namespace)
            .flat_map(|t| t.definitions.iter())
            .collect()
    }

    /// Whether the job declares a protocol by name
    pub fn declares_protocol(&self, name: &str) -> bool {
        self.protocols.contains_key(name)
    }

    pub fn protocol(&self, name: &str) -> Option<&Value> {
        self.protocols.get(name)
    }

    /// Validate fields that no pipeline step owns
    pub fn validate(&self) -> Result<()> {
        if self.actions.is_empty() {
            return Err(JobSpecError::MissingField("actions".to_string()));
        }
        if self.job_timeout == Some(0) {
            return Err(JobSpecError::InvalidFieldValue {
                field: "job_timeout".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        for (i, block) in self.actions.iter().enumerate() {
            let declared = [block.deploy.is_some(), block.boot.is_some(), block.test.is_some()]
                .iter()
                .filter(|d| **d)
                .count();
            if declared != 1 {
                return Err(JobSpecError::InvalidFieldValue {
                    field: format!("actions[{}]", i),
                    message: "each action block must declare exactly one of deploy, boot or test"
                        .to_string(),
                });
            }
        }
        Ok(())
    }
}

/// One entry of the job's action list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ActionBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeployParameters>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<TestParameters>,
}

/// Parameters of a deploy block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeployParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Deployment method (tftp, ssh, download, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Authorization requested for a secondary connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorize: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_nfs: Option<PersistentNfs>,

    /// OS-specific layout of the test shell
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_data: Option<DeploymentData>,
}

/// Persistent NFS root declaration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PersistentNfs {
    /// `server:/export/path`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// OS-specific test shell layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentData {
    /// Results directory on the DUT; `%s` is replaced by the job id
    #[serde(default = "default_results_dir")]
    pub lava_test_results_dir: String,

    /// Shell interpreter for generated scripts
    #[serde(default = "default_shell")]
    pub lava_test_sh_cmd: String,

    /// Distribution whose support scripts override the generic ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distro: Option<String>,
}

fn default_results_dir() -> String {
    "/lava-%s".to_string()
}

fn default_shell() -> String {
    "/bin/sh".to_string()
}

impl Default for DeploymentData {
    fn default() -> Self {
        Self {
            lava_test_results_dir: default_results_dir(),
            lava_test_sh_cmd: default_shell(),
            distro: None,
        }
    }
}

impl DeploymentData {
    /// Results directory with the job id substituted
    pub fn results_dir_for(&self, job_id: u64) -> String {
        self.lava_test_results_dir
            .replacen(JOB_ID_PLACEHOLDER, &job_id.to_string(), 1)
    }
}

/// Parameters of a test block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TestParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub definitions: Vec<TestDefinition>,
}

impl TestParameters {
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }
}

/// A single test definition reference
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestDefinition {
    /// Source kind: `inline`, `git`, `url`
    pub from: String,

    pub name: String,

    /// Path of the definition file inside its repository
    pub path: String,

    /// Inline body, or the repository location for remote sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Value>,
}
