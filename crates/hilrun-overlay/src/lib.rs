//! hilrun test-shell overlay
//!
//! Every deployment that runs tests gets an overlay: a private directory
//! tree holding the support scripts, test definitions and secrets the test
//! shell needs on the device. It is packed as `overlay-<level>.tar.gz` for
//! the deploy method to unpack, or published as a persistent NFS root.
//!
//! ```text
//! lava-overlay
//! ├── ssh-authorize           (devices with an ssh deploy method)
//! ├── lava-vland-overlay      (no-op without lava-vland)
//! ├── lava-multinode-overlay  (no-op without lava-multinode)
//! ├── test-definition
//! ├── compress-overlay
//! └── persistent-nfs-overlay  (no-op without persistent_nfs)
//! ```

pub mod checks;
pub mod compress;
pub mod error;
pub mod keys;
pub mod multinode;
pub mod nfs;
pub mod overlay;
pub mod scripts;
pub mod settings;
pub mod ssh;
pub mod testdef;
pub mod vland;

pub use checks::*;
pub use compress::*;
pub use error::{OverlayError, Result};
pub use multinode::*;
pub use nfs::*;
pub use overlay::*;
pub use settings::*;
pub use ssh::*;
pub use testdef::*;
pub use vland::*;

use hilrun_pipeline::{Job, Pipeline};
use std::sync::Arc;
use tracing::debug;

/// Root pipeline holding one overlay per deployment, in job order
pub fn build_pipeline(job: &Job, settings: Arc<OverlaySettings>) -> hilrun_pipeline::Result<Pipeline> {
    let mut pipeline = Pipeline::new();
    for deploy in job.definition.deployments() {
        let overlay = OverlayAction::build(deploy, job, settings.clone())?;
        debug!(to = ?deploy.to, needed = overlay.is_needed(), "overlay composed");
        pipeline.add_action(Box::new(overlay));
    }
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hilrun_job::{DeviceDescription, JobDefinition};

    #[test]
    fn test_one_overlay_per_deployment() {
        let definition = JobDefinition::from_yaml(
            "actions:\n  - deploy:\n      to: tftp\n  - boot: {}\n  - deploy:\n      to: download\n  - test: {}\n",
        )
        .unwrap();
        let job = Job::new(1, definition, DeviceDescription::default());
        let pipeline = build_pipeline(&job, Arc::new(OverlaySettings::new("/nonexistent"))).unwrap();

        let tree = pipeline.describe();
        let top: Vec<_> = tree
            .iter()
            .filter(|s| s.level.depth() == 1)
            .map(|s| (s.level.to_string(), s.name.as_str()))
            .collect();
        assert_eq!(top, vec![("1".to_string(), "lava-overlay"), ("2".to_string(), "lava-overlay")]);
        assert!(tree.iter().any(|s| s.level.to_string() == "1.4" && s.name == "compress-overlay"));
    }
}
