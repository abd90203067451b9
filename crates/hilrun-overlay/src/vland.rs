//! VLAN support scripts
//!
//! Three lists reach the test shell, one entry per line:
//!
//! - `LAVA_VLAND_SELF`: `interface,mac,sysfs` for each switchable interface
//! - `LAVA_VLAND_NAMES`: `vlan,interface` from the switch assignment
//! - `LAVA_VLAND_TAGS`: `interface,tag` for each tag of a tagged interface

use crate::keys::{overlay_location, results_path, RESULTS_DIR, SHELL};
use crate::scripts::{emit_scripts, lines, list_scripts};
use crate::settings::OverlaySettings;
use async_trait::async_trait;
use hilrun_pipeline::{
    call_protocols, Action, ActionError, ActionMeta, ActionParameters, ConnectionSlot, Deadline,
    JobContext, Result, SyncRequest,
};
use hilrun_protocols::{VlandProtocol, VLAND_PROTOCOL};
use std::sync::Arc;
use tracing::debug;

/// Message id announced once the vland scripts are in place
pub const VLAND_READY: &str = "lava_vland_ready";

pub struct VlandOverlayAction {
    meta: ActionMeta,
    settings: Arc<OverlaySettings>,
    participating: bool,
    sysfs: Vec<String>,
    tags: Vec<String>,
}

impl VlandOverlayAction {
    pub fn new(parameters: ActionParameters, settings: Arc<OverlaySettings>) -> Self {
        Self {
            meta: ActionMeta::new(parameters),
            settings,
            participating: false,
            sysfs: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn is_participating(&self) -> bool {
        self.participating
    }

    pub fn sysfs(&self) -> &[String] {
        &self.sysfs
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}

#[async_trait]
impl Action for VlandOverlayAction {
    fn name(&self) -> &str {
        "lava-vland-overlay"
    }

    fn description(&self) -> &str {
        "Populate specific vland scripts for tests to lookup vlan data."
    }

    fn summary(&self) -> &str {
        "Add files detailing vlan configuration."
    }

    fn meta(&self) -> &ActionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ActionMeta {
        &mut self.meta
    }

    fn validate(&mut self, ctx: &mut JobContext) {
        self.participating = false;
        self.sysfs.clear();
        self.tags.clear();

        if ctx.job.protocol_as::<VlandProtocol>().is_none() {
            return;
        }
        let device = &ctx.job.device;
        match &device.parameters {
            None => {
                self.meta.error("Device lacks parameters");
                return;
            }
            Some(parameters) if parameters.interfaces.is_none() => {
                self.meta.error("Device lacks vland interfaces data.");
                return;
            }
            Some(_) => {}
        }

        for (name, interface) in device.vland_interfaces() {
            match (&interface.mac, &interface.sysfs) {
                (Some(mac), Some(sysfs)) => self.sysfs.push(format!("{},{},{}", name, mac, sysfs)),
                _ => self
                    .meta
                    .error(format!("Device interface '{}' lacks mac or sysfs data.", name)),
            }
            // untagged is the primary interface
            for tag in &interface.tags {
                self.tags.push(format!("{},{}", name, tag));
            }
        }
        self.participating = self.meta.is_valid();
    }

    async fn run(
        &mut self,
        ctx: &mut JobContext,
        connection: ConnectionSlot,
        deadline: Deadline,
    ) -> Result<ConnectionSlot> {
        if !self.participating {
            debug!("skipped {}", self.name());
            return Ok(connection);
        }

        let namespace = self.meta.parameters.namespace().to_string();
        let location = overlay_location(&ctx.store, &namespace)?;
        let results_dir = ctx.store.require(&namespace, RESULTS_DIR)?;
        let shell = ctx.store.require(&namespace, SHELL)?;
        let names = ctx
            .job
            .protocol_as::<VlandProtocol>()
            .ok_or_else(|| ActionError::bug("vland protocol missing at run time"))?
            .names()?;

        let sources = list_scripts(&self.settings.vland_dir())?;
        let bin = results_path(&location, &results_dir).join("bin");
        debug!(bin = %bin.display(), scripts = sources.len(), "copying vland scripts");
        deadline.check(self.name())?;

        // an empty tag list still yields one blank entry
        let tags: Vec<&str> = if self.tags.is_empty() {
            vec![""]
        } else {
            self.tags.iter().map(String::as_str).collect()
        };
        let sysfs = &self.sysfs;
        emit_scripts(&sources, &bin, &shell, |name| match name {
            "lava-vland-self" => lines("LAVA_VLAND_SELF", sysfs),
            "lava-vland-names" => lines("LAVA_VLAND_NAMES", &names),
            "lava-vland-tags" => lines("LAVA_VLAND_TAGS", &tags),
            _ => String::new(),
        })
        .await?;

        let request = SyncRequest::new(self.name(), VLAND_READY).with_deadline(deadline);
        call_protocols(&ctx.job, &[VLAND_PROTOCOL], &request).await?;
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::LOCATION;
    use hilrun_job::{DeviceDescription, JobDefinition};
    use hilrun_pipeline::{ErrorClass, Job};
    use hilrun_protocols::{InProcessCoordinator, VlandTopology};
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    const DEVICE: &str = r#"
parameters:
  interfaces:
    target:
      mac: "00:11:22:33:44:55"
      ip: 10.0.0.20
    eth0:
      mac: "00:11:22:33:44:01"
      sysfs: /sys/devices/eth0
    eth1:
      mac: "00:11:22:33:44:02"
      sysfs: /sys/devices/eth1
      tags: [trunk]
"#;

    fn protocol() -> VlandProtocol {
        let params = serde_yaml::from_str("vlan_one:\n  tags: [trunk]\nvlan_two: {}\n").unwrap();
        VlandProtocol::new(params, Arc::new(InProcessCoordinator::new())).unwrap()
    }

    fn context(device: &str, protocol: Option<VlandProtocol>, overlay: &Path) -> JobContext {
        let device = DeviceDescription::from_yaml(device).unwrap();
        let mut job = Job::new(5, JobDefinition::default(), device);
        if let Some(protocol) = protocol {
            job = job.with_protocol(Box::new(protocol));
        }
        let mut ctx = JobContext::new(job);
        ctx.store.set("common", LOCATION, &overlay.to_path_buf()).unwrap();
        ctx.store.set("common", RESULTS_DIR, &"/lava-5".to_string()).unwrap();
        ctx.store.set("common", SHELL, &"/bin/sh".to_string()).unwrap();
        ctx
    }

    fn script_tree() -> (TempDir, Arc<OverlaySettings>) {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("vland");
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["lava-vland-self", "lava-vland-names", "lava-vland-tags"] {
            std::fs::write(dir.join(name), "echo\n").unwrap();
        }
        let settings = Arc::new(OverlaySettings::new(temp.path()));
        (temp, settings)
    }

    #[test]
    fn test_absent_protocol_is_noop() {
        let (_scripts, settings) = script_tree();
        let overlay = tempdir().unwrap();
        let mut ctx = context("{}", None, overlay.path());
        let mut action = VlandOverlayAction::new(ActionParameters::default(), settings);
        action.validate(&mut ctx);
        assert!(action.errors().is_empty());
        assert!(!action.is_participating());
    }

    #[test]
    fn test_device_without_interfaces() {
        let (_scripts, settings) = script_tree();
        let overlay = tempdir().unwrap();

        let mut ctx = context("{}", Some(protocol()), overlay.path());
        let mut action = VlandOverlayAction::new(ActionParameters::default(), settings.clone());
        action.validate(&mut ctx);
        assert_eq!(action.errors(), &["Device lacks parameters".to_string()]);

        let mut ctx = context("parameters: {}\n", Some(protocol()), overlay.path());
        let mut action = VlandOverlayAction::new(ActionParameters::default(), settings);
        action.validate(&mut ctx);
        assert_eq!(action.errors(), &["Device lacks vland interfaces data.".to_string()]);
    }

    #[test]
    fn test_interfaces_collected() {
        let (_scripts, settings) = script_tree();
        let overlay = tempdir().unwrap();
        let mut ctx = context(DEVICE, Some(protocol()), overlay.path());
        let mut action = VlandOverlayAction::new(ActionParameters::default(), settings);
        action.validate(&mut ctx);

        assert!(action.is_participating());
        assert_eq!(
            action.sysfs(),
            &[
                "eth0,00:11:22:33:44:01,/sys/devices/eth0".to_string(),
                "eth1,00:11:22:33:44:02,/sys/devices/eth1".to_string(),
            ]
        );
        assert_eq!(action.tags(), &["eth1,trunk".to_string()]);
    }

    #[tokio::test]
    async fn test_unassigned_topology_is_bug() {
        let (_scripts, settings) = script_tree();
        let overlay = tempdir().unwrap();
        let mut ctx = context(DEVICE, Some(protocol()), overlay.path());
        let mut action = VlandOverlayAction::new(ActionParameters::default(), settings);
        action.validate(&mut ctx);
        let err = action.run(&mut ctx, None, Deadline::none()).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Bug);
    }

    #[tokio::test]
    async fn test_scripts_written() {
        let (_scripts, settings) = script_tree();
        let overlay = tempdir().unwrap();
        let mut vland = protocol();
        vland
            .assign_topology(VlandTopology {
                interfaces: [("vlan_one".to_string(), "eth1".to_string())].into_iter().collect(),
                group_size: 1,
            })
            .unwrap();
        let mut ctx = context(DEVICE, Some(vland), overlay.path());
        let mut action = VlandOverlayAction::new(ActionParameters::default(), settings);
        action.validate(&mut ctx);
        action.run(&mut ctx, None, Deadline::none()).await.unwrap();

        let bin = overlay.path().join("lava-5/bin");
        let read = |name: &str| std::fs::read_to_string(bin.join(name)).unwrap();
        assert_eq!(
            read("lava-vland-names"),
            "#!/bin/sh\n\nLAVA_VLAND_NAMES=\"vlan_one,eth1\\n\"\n\necho\n"
        );
        assert_eq!(
            read("lava-vland-tags"),
            "#!/bin/sh\n\nLAVA_VLAND_TAGS=\"eth1,trunk\\n\"\n\necho\n"
        );
        assert!(read("lava-vland-self").contains("eth0,00:11:22:33:44:01,/sys/devices/eth0\\n"));
    }

    #[tokio::test]
    async fn test_untagged_device_writes_blank_tag_entry() {
        let (_scripts, settings) = script_tree();
        let overlay = tempdir().unwrap();
        let mut vland = protocol();
        vland.assign_topology(VlandTopology::default()).unwrap();
        let device = "parameters:\n  interfaces:\n    eth0:\n      mac: aa\n      sysfs: /sys/eth0\n";
        let mut ctx = context(device, Some(vland), overlay.path());
        let mut action = VlandOverlayAction::new(ActionParameters::default(), settings);
        action.validate(&mut ctx);
        action.run(&mut ctx, None, Deadline::none()).await.unwrap();

        let tags = std::fs::read_to_string(overlay.path().join("lava-5/bin/lava-vland-tags")).unwrap();
        assert_eq!(tags, "#!/bin/sh\n\nLAVA_VLAND_TAGS=\"\\n\"\n\necho\n");
    }
}
