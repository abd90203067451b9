//! Build-time settings for the overlay family

use crate::checks::{NfsProbe, RpcInfoProbe};
use crate::testdef::{InlineTestDefinitions, TestDefinitionFactory};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Immutable snapshot the overlay builders read.
///
/// The support-script tree is laid out as:
///
/// ```text
/// <test_shell_dir>/lava-*                 generic scripts
/// <test_shell_dir>/distro/<name>/lava-*   distro overrides
/// <test_shell_dir>/multi_node/lava-*      multinode scripts
/// <test_shell_dir>/vland/lava-*           vland scripts
/// ```
#[derive(Clone)]
pub struct OverlaySettings {
    test_shell_dir: PathBuf,
    nfs_probe: Arc<dyn NfsProbe>,
    testdef_factory: Arc<dyn TestDefinitionFactory>,
}

impl OverlaySettings {
    pub fn new(test_shell_dir: impl Into<PathBuf>) -> Self {
        Self {
            test_shell_dir: test_shell_dir.into(),
            nfs_probe: Arc::new(RpcInfoProbe),
            testdef_factory: Arc::new(InlineTestDefinitions),
        }
    }

    pub fn with_nfs_probe(mut self, probe: Arc<dyn NfsProbe>) -> Self {
        self.nfs_probe = probe;
        self
    }

    pub fn with_testdef_factory(mut self, factory: Arc<dyn TestDefinitionFactory>) -> Self {
        self.testdef_factory = factory;
        self
    }

    pub fn test_shell_dir(&self) -> &Path {
        &self.test_shell_dir
    }

    pub fn distro_dir(&self, distro: &str) -> PathBuf {
        self.test_shell_dir.join("distro").join(distro)
    }

    pub fn multinode_dir(&self) -> PathBuf {
        self.test_shell_dir.join("multi_node")
    }

    pub fn vland_dir(&self) -> PathBuf {
        self.test_shell_dir.join("vland")
    }

    pub fn nfs_probe(&self) -> Arc<dyn NfsProbe> {
        self.nfs_probe.clone()
    }

    pub fn testdef_factory(&self) -> Arc<dyn TestDefinitionFactory> {
        self.testdef_factory.clone()
    }
}

impl std::fmt::Debug for OverlaySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlaySettings")
            .field("test_shell_dir", &self.test_shell_dir)
            .finish_non_exhaustive()
    }
}
