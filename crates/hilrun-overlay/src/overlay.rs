//! The overlay action
//!
//! One [`OverlayAction`] is built per deployment. It owns the private
//! overlay root for its namespace and fills the generic part of it; the
//! nested pipeline adds ssh keys, vland and multinode scripts, test
//! definitions, and finally packs or publishes the result.

use crate::compress::CompressOverlay;
use crate::keys::{results_path, LOCATION, RESULTS_DIR, SHELL};
use crate::multinode::MultinodeOverlayAction;
use crate::nfs::PersistentNfsOverlay;
use crate::scripts::{assign, emit_scripts, list_scripts, table};
use crate::settings::OverlaySettings;
use crate::ssh::SshAuthorize;
use crate::vland::VlandOverlayAction;
use async_trait::async_trait;
use hilrun_job::{entries_without_bookkeeping, DeployParameters};
use hilrun_pipeline::{
    Action, ActionMeta, ActionParameters, ConnectionSlot, Deadline, Job, JobContext, Pipeline,
    Result,
};
use std::os::unix::fs::DirBuilderExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Deployment methods that write an image and never run a test shell
pub const IMAGE_ONLY_METHODS: &[&str] = &["download", "flasher"];

/// Directories created under the results directory
pub const RESULTS_SUBDIRS: &[&str] = &["bin", "tests", "results"];

/// Name of the secrets file in the results directory
pub const SECRETS_FILE: &str = "secrets";

/// Device identity injected into the generic scripts
#[derive(Debug, Default, Clone, PartialEq)]
struct DeviceIdentity {
    target_mac: String,
    target_ip: String,
    probe_ip: String,
    probe_channel: String,
}

pub struct OverlayAction {
    meta: ActionMeta,
    deploy: DeployParameters,
    settings: Arc<OverlaySettings>,
    pipeline: Pipeline,
    needed: bool,
    scripts: Vec<PathBuf>,
    identity: DeviceIdentity,
}

impl OverlayAction {
    /// Compose the overlay for one deployment.
    ///
    /// The nested pipeline is complete on return. Deployments that need no
    /// overlay get an empty one.
    pub fn build(deploy: &DeployParameters, job: &Job, settings: Arc<OverlaySettings>) -> Result<Self> {
        let parameters = ActionParameters::from_serialize(deploy)?;
        let needed = needs_overlay(deploy, job);

        let mut pipeline = Pipeline::new();
        if needed {
            if job.device.supports_ssh_deploy() {
                pipeline.add_action(Box::new(SshAuthorize::new(deploy)?));
            }
            pipeline.add_action(Box::new(VlandOverlayAction::new(parameters.clone(), settings.clone())));
            pipeline.add_action(Box::new(MultinodeOverlayAction::new(parameters.clone(), settings.clone())));
            pipeline.add_action(settings.testdef_factory().build(deploy, job)?);
            pipeline.add_action(Box::new(CompressOverlay::new(parameters.clone())));
            let nfs = deploy
                .persistent_nfs
                .clone()
                .or_else(|| job.definition.persistent_nfs.clone());
            pipeline.add_action(Box::new(PersistentNfsOverlay::new(
                parameters.clone(),
                nfs,
                settings.nfs_probe(),
            )));
        }

        Ok(Self {
            meta: ActionMeta::new(parameters),
            deploy: deploy.clone(),
            settings,
            pipeline,
            needed,
            scripts: Vec::new(),
            identity: DeviceIdentity::default(),
        })
    }

    /// Whether this deployment gets a test overlay at all
    pub fn is_needed(&self) -> bool {
        self.needed
    }

    /// Support scripts in copy order, as of the last validation
    pub fn scripts(&self) -> &[PathBuf] {
        &self.scripts
    }

    fn collect_scripts(&mut self) {
        let mut dirs = vec![self.settings.test_shell_dir().to_path_buf()];
        if let Some(distro) = self.deploy.deployment_data.as_ref().and_then(|d| d.distro.as_deref()) {
            dirs.push(self.settings.distro_dir(distro));
        }
        for dir in dirs {
            match list_scripts(&dir) {
                Ok(found) => self.scripts.extend(found),
                Err(e) => self.meta.error(e.to_string()),
            }
        }
        if self.scripts.is_empty() {
            self.meta.error("Unable to locate lava_test_shell support scripts.");
        }
    }
}

/// A deployment needs an overlay when the job runs tests and the method is
/// not image-only.
pub fn needs_overlay(deploy: &DeployParameters, job: &Job) -> bool {
    let image_only = deploy
        .to
        .as_deref()
        .map_or(false, |to| IMAGE_ONLY_METHODS.contains(&to));
    job.definition.has_test_action() && !image_only
}

#[async_trait]
impl Action for OverlayAction {
    fn name(&self) -> &str {
        "lava-overlay"
    }

    fn description(&self) -> &str {
        "add lava scripts during deployment for test shell use"
    }

    fn summary(&self) -> &str {
        "overlay the lava support scripts"
    }

    fn meta(&self) -> &ActionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ActionMeta {
        &mut self.meta
    }

    fn pipeline(&self) -> Option<&Pipeline> {
        Some(&self.pipeline)
    }

    fn pipeline_mut(&mut self) -> Option<&mut Pipeline> {
        Some(&mut self.pipeline)
    }

    fn validate(&mut self, ctx: &mut JobContext) {
        self.scripts.clear();
        self.identity = DeviceIdentity::default();
        if !self.needed {
            debug!(to = ?self.deploy.to, "no test overlay needed");
            return;
        }

        let namespace = self.meta.parameters.namespace().to_string();
        let data = self.deploy.deployment_data.clone().unwrap_or_default();
        let results_dir = data.results_dir_for(ctx.job.id);
        let published = ctx
            .store
            .set(&namespace, RESULTS_DIR, &results_dir)
            .and_then(|_| ctx.store.set(&namespace, SHELL, &data.lava_test_sh_cmd));
        if let Err(e) = published {
            self.meta.error(e.to_string());
        }

        self.collect_scripts();
        if ctx.job.output_dir().is_none() {
            self.meta.error("Unable to use output directory.");
        }

        let device = &ctx.job.device;
        if let Some(target) = device.target_interface() {
            self.identity.target_mac = target.mac.clone().unwrap_or_default();
            self.identity.target_ip = target.ip.clone().unwrap_or_default();
        }
        if let Some((channel, ip)) = device.probe() {
            self.identity.probe_channel = channel.to_string();
            self.identity.probe_ip = ip.to_string();
        }
    }

    async fn run(
        &mut self,
        ctx: &mut JobContext,
        connection: ConnectionSlot,
        deadline: Deadline,
    ) -> Result<ConnectionSlot> {
        if !self.needed {
            return Ok(connection);
        }
        let namespace = self.meta.parameters.namespace().to_string();
        if self.meta.parameters.declares_namespace()
            && !ctx.job.definition.test_action_namespaces().contains(&namespace)
        {
            info!("[{}] skipped {} - no test action.", namespace, self.name());
            return Ok(connection);
        }

        let location = ctx.mkdtemp("hilrun-overlay-")?;
        ctx.store.set(&namespace, LOCATION, &location)?;
        let results_dir = ctx.store.require(&namespace, RESULTS_DIR)?;
        let shell = ctx.store.require(&namespace, SHELL)?;
        debug!("[{}] Preparing overlay tarball in {}", namespace, location.display());

        let lava_path = results_path(&location, &results_dir);
        for subdir in RESULTS_SUBDIRS {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(lava_path.join(subdir))?;
        }
        deadline.check(self.name())?;

        let storage: Vec<(String, String)> = ctx
            .job
            .device
            .storage_info
            .iter()
            .flat_map(entries_without_bookkeeping)
            .collect();
        let identity = &self.identity;
        emit_scripts(&self.scripts, &lava_path.join("bin"), &shell, |name| match name {
            "lava-target-mac" => assign("TARGET_DEVICE_MAC", &identity.target_mac),
            "lava-target-ip" => assign("TARGET_DEVICE_IP", &identity.target_ip),
            "lava-probe-ip" => assign("PROBE_DEVICE_IP", &identity.probe_ip),
            "lava-probe-channel" => assign("PROBE_DEVICE_CHANNEL", &identity.probe_channel),
            "lava-target-storage" => table(
                "LAVA_STORAGE",
                storage.iter().map(|(method, value)| (method.as_str(), value.as_str())),
            ),
            _ => String::new(),
        })
        .await?;

        if let Some(secrets) = &ctx.job.definition.secrets {
            let path = lava_path.join(SECRETS_FILE);
            debug!("Creating {}", path.display());
            let content: String = entries_without_bookkeeping(secrets)
                .into_iter()
                .map(|(key, value)| format!("{}={}\n", key, value))
                .collect();
            tokio::fs::write(&path, content).await?;
        }

        self.pipeline.run_actions(ctx, connection, deadline).await
    }
}
