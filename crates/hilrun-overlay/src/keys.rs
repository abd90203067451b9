//! Namespace keys published and consumed by the overlay family
//!
//! The `test/...` keys are shared with the test-definition and
//! apply-overlay collaborators.

use hilrun_pipeline::{ActionError, NamespaceStore, Result, StoreKey};
use std::path::PathBuf;

/// Results directory on the DUT, job id substituted (`/lava-42`)
pub const RESULTS_DIR: StoreKey<String> = StoreKey::new("test", "results", "lava_test_results_dir");

/// Interpreter written into every script's shebang
pub const SHELL: StoreKey<String> = StoreKey::new("test", "shared", "lava_test_sh_cmd");

/// Private temporary overlay root
pub const LOCATION: StoreKey<PathBuf> = StoreKey::new("test", "shared", "location");

/// Archive path, as seen by the test collaborators
pub const SHARED_OUTPUT: StoreKey<PathBuf> = StoreKey::new("test", "shared", "output");

/// Archive path, for the apply-overlay collaborator
pub const COMPRESSED_OVERLAY: StoreKey<PathBuf> = StoreKey::new("compress-overlay", "output", "file");

/// Identity file authorised for secondary connections
pub const IDENTITY_FILE: StoreKey<PathBuf> = StoreKey::new("ssh-authorize", "authorize", "identity_file");

/// Export path of the persistent NFS root
pub const NFS_ROOT: StoreKey<String> = StoreKey::new("persistent-nfs-overlay", "nfs_address", "nfsroot");

/// Address of the persistent NFS server
pub const NFS_SERVER: StoreKey<String> = StoreKey::new("persistent-nfs-overlay", "nfs_address", "serverip");

/// Test runner directories written by the test-definition step
pub const TEST_RUNNER_DIRS: StoreKey<Vec<String>> = StoreKey::new("test-definition", "test-definition", "testdef_index");

/// Resolve the results directory below an overlay root.
///
/// The results directory is absolute on the DUT, so it is re-rooted rather
/// than joined.
pub fn results_path(location: &std::path::Path, results_dir: &str) -> PathBuf {
    location.join(results_dir.trim_start_matches('/'))
}

/// The overlay root published by the overlay action, which must exist on
/// disk by the time any child runs.
pub fn overlay_location(store: &NamespaceStore, namespace: &str) -> Result<PathBuf> {
    let location = store
        .get(namespace, LOCATION)
        .ok_or_else(|| ActionError::bug("Missing lava overlay location"))?;
    if !location.exists() {
        return Err(ActionError::bug("Unable to find overlay location"));
    }
    Ok(location)
}
