//! Overlay archive creation

use crate::error::OverlayError;
use crate::keys::{overlay_location, results_path, COMPRESSED_OVERLAY, RESULTS_DIR, SHARED_OUTPUT};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use hilrun_pipeline::{
    Action, ActionError, ActionMeta, ActionParameters, ConnectionSlot, Deadline, JobContext, Result,
};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Subtree written by ssh authorisation, archived when present
pub const ROOT_SUBTREE: &str = "root";

/// Packs the finished overlay into `overlay-<level>.tar.gz` in the job's
/// output directory.
pub struct CompressOverlay {
    meta: ActionMeta,
}

impl CompressOverlay {
    pub fn new(parameters: ActionParameters) -> Self {
        Self {
            meta: ActionMeta::new(parameters),
        }
    }

    /// Archive file name for this action's tree position
    pub fn archive_name(&self) -> String {
        format!("overlay-{}.tar.gz", self.meta.level)
    }
}

/// Write `<results_dir>` and, if present, `root/` from `location` into a
/// gzip-compressed tar at `output`. Entry paths are relative to `location`.
pub fn build_archive(location: &Path, results_dir: &str, output: &Path) -> std::result::Result<(), OverlayError> {
    let archive_err = |e: std::io::Error| OverlayError::Archive(e.to_string());

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).map_err(archive_err)?;
    }
    let file = File::create(output).map_err(archive_err)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    let relative = results_dir.trim_start_matches('/');
    builder
        .append_dir_all(relative, results_path(location, results_dir))
        .map_err(archive_err)?;

    let root = location.join(ROOT_SUBTREE);
    if root.is_dir() {
        builder.append_dir_all(ROOT_SUBTREE, &root).map_err(archive_err)?;
    }

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(archive_err)?;
    Ok(())
}

#[async_trait]
impl Action for CompressOverlay {
    fn name(&self) -> &str {
        "compress-overlay"
    }

    fn description(&self) -> &str {
        "Create a lava overlay tarball and store alongside the job"
    }

    fn summary(&self) -> &str {
        "Compress the lava overlay files"
    }

    fn meta(&self) -> &ActionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ActionMeta {
        &mut self.meta
    }

    async fn run(
        &mut self,
        ctx: &mut JobContext,
        connection: ConnectionSlot,
        deadline: Deadline,
    ) -> Result<ConnectionSlot> {
        let namespace = self.meta.parameters.namespace().to_string();
        let location = overlay_location(&ctx.store, &namespace)?;
        let results_dir = ctx.store.require(&namespace, RESULTS_DIR)?;
        let output_dir = ctx
            .job
            .output_dir()
            .ok_or_else(|| ActionError::bug("Unable to use output directory."))?;
        let output: PathBuf = output_dir.join(self.archive_name());

        deadline.check(self.name())?;
        debug!(location = %location.display(), output = %output.display(), "compressing overlay");

        let archive = output.clone();
        tokio::task::spawn_blocking(move || build_archive(&location, &results_dir, &archive))
            .await
            .map_err(|e| ActionError::bug(format!("archive task failed: {}", e)))??;

        ctx.store.set(&namespace, SHARED_OUTPUT, &output)?;
        ctx.store.set(&namespace, COMPRESSED_OVERLAY, &output)?;
        info!(output = %output.display(), "overlay archive written");
        Ok(connection)
    }
}
