//! Multinode support scripts

use crate::keys::{overlay_location, results_path, RESULTS_DIR, SHELL};
use crate::scripts::{assign, emit_scripts, list_scripts, table};
use crate::settings::OverlaySettings;
use async_trait::async_trait;
use hilrun_pipeline::{
    call_protocols, Action, ActionError, ActionMeta, ActionParameters, ConnectionSlot, Deadline,
    JobContext, Result, SyncRequest,
};
use hilrun_protocols::{MultinodeProtocol, MULTINODE_PROTOCOL};
use std::sync::Arc;
use tracing::{debug, info};

/// Peer message cache the multinode scripts share on the DUT
pub const MULTINODE_CACHE_FILE: &str = "/tmp/lava_multi_node_cache.txt";

/// Message id announced once the multinode scripts are in place
pub const OVERLAY_READY: &str = "lava_overlay_ready";

pub struct MultinodeOverlayAction {
    meta: ActionMeta,
    settings: Arc<OverlaySettings>,
    role: Option<String>,
}

impl MultinodeOverlayAction {
    pub fn new(parameters: ActionParameters, settings: Arc<OverlaySettings>) -> Self {
        Self {
            meta: ActionMeta::new(parameters),
            settings,
            role: None,
        }
    }

    /// This device's role, once validation found the job participating
    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }
}

#[async_trait]
impl Action for MultinodeOverlayAction {
    fn name(&self) -> &str {
        "lava-multinode-overlay"
    }

    fn description(&self) -> &str {
        "add lava scripts during deployment for multinode test shell use"
    }

    fn summary(&self) -> &str {
        "overlay the lava multinode scripts"
    }

    fn meta(&self) -> &ActionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ActionMeta {
        &mut self.meta
    }

    fn validate(&mut self, ctx: &mut JobContext) {
        self.role = None;
        let protocol = match ctx.job.protocol_as::<MultinodeProtocol>() {
            Some(protocol) if protocol.is_participating() => protocol,
            _ => return,
        };
        match protocol.role() {
            Some(role) => self.role = Some(role.to_string()),
            None => self.meta.error("multinode job without a specified role"),
        }
    }

    async fn run(
        &mut self,
        ctx: &mut JobContext,
        connection: ConnectionSlot,
        deadline: Deadline,
    ) -> Result<ConnectionSlot> {
        let role = match &self.role {
            Some(role) => role.clone(),
            None => {
                debug!("skipped {}", self.name());
                return Ok(connection);
            }
        };

        let namespace = self.meta.parameters.namespace().to_string();
        let location = overlay_location(&ctx.store, &namespace)?;
        let results_dir = ctx.store.require(&namespace, RESULTS_DIR)?;
        let shell = ctx.store.require(&namespace, SHELL)?;
        let roles = ctx
            .job
            .protocol_as::<MultinodeProtocol>()
            .and_then(|protocol| protocol.roles().get())
            .cloned()
            .ok_or_else(|| {
                ActionError::bug("multinode definition without complete list of roles after assignment")
            })?;

        let sources = list_scripts(&self.settings.multinode_dir())?;
        let bin = results_path(&location, &results_dir).join("bin");
        debug!(bin = %bin.display(), scripts = sources.len(), "copying multinode scripts");
        deadline.check(self.name())?;

        let hostname = ctx.job.id.to_string();
        emit_scripts(&sources, &bin, &shell, |name| match name {
            "lava-group" => table(
                "LAVA_GROUP",
                roles.iter().map(|(client, role)| (client.as_str(), role.as_str())),
            ),
            "lava-role" => assign("TARGET_ROLE", &role),
            "lava-self" => assign("LAVA_HOSTNAME", &hostname),
            _ => [
                assign("LAVA_TEST_BIN", &format!("{}/bin", results_dir)),
                assign("LAVA_MULTI_NODE_CACHE", MULTINODE_CACHE_FILE),
                assign("LAVA_MULTI_NODE_DEBUG", "yes"),
            ]
            .concat(),
        })
        .await?;
        info!(role = %role, group_size = roles.len(), "multinode scripts in place");

        let request = SyncRequest::new(self.name(), OVERLAY_READY).with_deadline(deadline);
        call_protocols(&ctx.job, &[MULTINODE_PROTOCOL], &request).await?;
        Ok(connection)
    }
}
