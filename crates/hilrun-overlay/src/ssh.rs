//! SSH authorisation for secondary connections
//!
//! The device's ssh identity is copied into the results directory so test
//! writers can log in with it. For secondary connections the public key is
//! also installed as `/root/.ssh/authorized_keys` in the overlay, replacing
//! any authorized keys file on the image once the overlay is unpacked.

use crate::checks::{check_ssh_identity_file, public_key_path};
use crate::keys::{overlay_location, results_path, IDENTITY_FILE, RESULTS_DIR};
use async_trait::async_trait;
use hilrun_job::DeployParameters;
use hilrun_pipeline::{
    Action, ActionError, ActionMeta, ActionParameters, ConnectionSlot, Deadline, JobContext, Result,
};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info};

pub struct SshAuthorize {
    meta: ActionMeta,
    deploy: DeployParameters,
    identity_file: Option<PathBuf>,
    active: bool,
}

impl SshAuthorize {
    pub fn new(deploy: &DeployParameters) -> Result<Self> {
        Ok(Self {
            meta: ActionMeta::new(ActionParameters::from_serialize(deploy)?),
            deploy: deploy.clone(),
            identity_file: None,
            active: false,
        })
    }

    /// Identity found during the last validation
    pub fn identity_file(&self) -> Option<&PathBuf> {
        self.identity_file.as_ref()
    }

    /// Whether `authorized_keys` will be installed
    pub fn is_active(&self) -> bool {
        self.active
    }
}

#[async_trait]
impl Action for SshAuthorize {
    fn name(&self) -> &str {
        "ssh-authorize"
    }

    fn description(&self) -> &str {
        "include public key in overlay and authorize root user"
    }

    fn summary(&self) -> &str {
        "add public key to authorized_keys"
    }

    fn meta(&self) -> &ActionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ActionMeta {
        &mut self.meta
    }

    fn validate(&mut self, ctx: &mut JobContext) {
        self.identity_file = None;
        self.active = false;

        // the primary ssh connection is set up by the admins
        if self.deploy.to.as_deref() == Some("ssh") {
            return;
        }
        if matches!(self.deploy.authorize.as_deref(), Some(method) if method != "ssh") {
            return;
        }
        if !ctx.job.device.supports_ssh_deploy() {
            return;
        }

        match check_ssh_identity_file(&ctx.job.device.actions.deploy) {
            Err(e) => self.meta.error(e.to_string()),
            Ok(identity) => {
                let namespace = self.meta.parameters.namespace().to_string();
                if let Err(e) = ctx.store.set(&namespace, IDENTITY_FILE, &identity) {
                    self.meta.error(e.to_string());
                    return;
                }
                self.identity_file = Some(identity);
                self.active = self.deploy.authorize.is_some();
            }
        }
    }

    async fn run(
        &mut self,
        ctx: &mut JobContext,
        connection: ConnectionSlot,
        _deadline: Deadline,
    ) -> Result<ConnectionSlot> {
        let identity = match &self.identity_file {
            Some(identity) => identity.clone(),
            None => {
                debug!("No authorisation required.");
                return Ok(connection);
            }
        };

        let namespace = self.meta.parameters.namespace().to_string();
        let location = overlay_location(&ctx.store, &namespace)?;
        let results_dir = ctx.store.require(&namespace, RESULTS_DIR)?;
        let lava_path = results_path(&location, &results_dir);
        fs::create_dir_all(&lava_path).await?;

        let file_name = identity
            .file_name()
            .ok_or_else(|| ActionError::bug(format!("identity file {} has no name", identity.display())))?;
        let copied = lava_path.join(file_name);
        fs::copy(&identity, &copied).await?;
        fs::copy(public_key_path(&identity), public_key_path(&copied)).await?;

        if !self.active {
            return Ok(connection);
        }

        info!("Adding SSH authorisation for {}", public_key_path(&copied).display());
        let ssh_dir = location.join("root").join(".ssh");
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(&ssh_dir)?;
        let authorized_keys = ssh_dir.join("authorized_keys");
        fs::copy(public_key_path(&identity), &authorized_keys).await?;
        fs::set_permissions(&authorized_keys, std::fs::Permissions::from_mode(0o600)).await?;
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hilrun_job::{DeviceDescription, JobDefinition};
    use crate::keys::LOCATION;
    use hilrun_pipeline::Job;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _keys: TempDir,
        overlay: TempDir,
        ctx: JobContext,
    }

    fn fixture(with_ssh_method: bool) -> Fixture {
        let keys = tempdir().unwrap();
        let key = keys.path().join("id_rsa");
        std::fs::write(&key, "private").unwrap();
        std::fs::write(keys.path().join("id_rsa.pub"), "ssh-rsa AAAA test\n").unwrap();

        let device = if with_ssh_method {
            format!(
                "actions:\n  deploy:\n    methods:\n      ssh:\n        identity_file: {}\n",
                key.display()
            )
        } else {
            "actions:\n  deploy:\n    methods:\n      tftp: {}\n".to_string()
        };
        let device = DeviceDescription::from_yaml(&device).unwrap();
        let overlay = tempdir().unwrap();
        let mut ctx = JobContext::new(Job::new(42, JobDefinition::default(), device));
        ctx.store
            .set("common", LOCATION, &overlay.path().to_path_buf())
            .unwrap();
        ctx.store.set("common", RESULTS_DIR, &"/lava-42".to_string()).unwrap();
        Fixture {
            _keys: keys,
            overlay,
            ctx,
        }
    }

    fn deploy(to: &str, authorize: Option<&str>) -> DeployParameters {
        DeployParameters {
            to: Some(to.to_string()),
            authorize: authorize.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_primary_ssh_connection_skipped() {
        let mut f = fixture(true);
        let mut action = SshAuthorize::new(&deploy("ssh", None)).unwrap();
        action.validate(&mut f.ctx);
        assert!(action.identity_file().is_none());
        assert!(!f.ctx.store.contains("common", IDENTITY_FILE));
    }

    #[test]
    fn test_other_authorize_method_skipped() {
        let mut f = fixture(true);
        let mut action = SshAuthorize::new(&deploy("tftp", Some("gpg"))).unwrap();
        action.validate(&mut f.ctx);
        assert!(action.identity_file().is_none());
        assert!(action.errors().is_empty());
    }

    #[test]
    fn test_device_without_ssh_skipped() {
        let mut f = fixture(false);
        let mut action = SshAuthorize::new(&deploy("tftp", Some("ssh"))).unwrap();
        action.validate(&mut f.ctx);
        assert!(action.identity_file().is_none());
    }

    #[tokio::test]
    async fn test_identity_copied_without_authorize() {
        let mut f = fixture(true);
        let mut action = SshAuthorize::new(&deploy("tftp", None)).unwrap();
        action.validate(&mut f.ctx);
        assert!(action.errors().is_empty());
        assert!(!action.is_active());

        action.run(&mut f.ctx, None, Deadline::none()).await.unwrap();
        let lava_path = f.overlay.path().join("lava-42");
        assert!(lava_path.join("id_rsa").is_file());
        assert!(lava_path.join("id_rsa.pub").is_file());
        assert!(!f.overlay.path().join("root").exists());
    }

    #[tokio::test]
    async fn test_secondary_connection_installs_authorized_keys() {
        let mut f = fixture(true);
        let mut action = SshAuthorize::new(&deploy("tftp", Some("ssh"))).unwrap();
        action.validate(&mut f.ctx);
        assert!(action.is_active());

        action.run(&mut f.ctx, None, Deadline::none()).await.unwrap();
        let authorized = f.overlay.path().join("root/.ssh/authorized_keys");
        assert_eq!(std::fs::read_to_string(&authorized).unwrap(), "ssh-rsa AAAA test\n");
        let mode = std::fs::metadata(&authorized).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_validate_twice_is_stable() {
        let mut f = fixture(true);
        let mut action = SshAuthorize::new(&deploy("tftp", Some("ssh"))).unwrap();
        action.validate(&mut f.ctx);
        let entries = f.ctx.store.len();
        action.validate(&mut f.ctx);
        assert_eq!(f.ctx.store.len(), entries);
        assert!(action.errors().is_empty());
        assert!(action.is_active());
    }
}
