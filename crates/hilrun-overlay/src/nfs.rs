//! Persistent NFS root
//!
//! Nothing is extracted: the server and export path are published so the
//! apply-overlay step can mount the root instead.

use crate::checks::NfsProbe;
use crate::keys::{NFS_ROOT, NFS_SERVER};
use async_trait::async_trait;
use hilrun_job::PersistentNfs;
use hilrun_pipeline::{Action, ActionMeta, ActionParameters, ConnectionSlot, Deadline, JobContext, Result};
use std::sync::Arc;
use tracing::debug;

pub struct PersistentNfsOverlay {
    meta: ActionMeta,
    target: Option<PersistentNfs>,
    probe: Arc<dyn NfsProbe>,
}

impl PersistentNfsOverlay {
    pub fn new(parameters: ActionParameters, target: Option<PersistentNfs>, probe: Arc<dyn NfsProbe>) -> Self {
        Self {
            meta: ActionMeta::new(parameters),
            target,
            probe,
        }
    }

    /// Split `host:/export/path` at the first colon
    fn split_address(address: &str) -> Option<(&str, &str)> {
        address.split_once(':')
    }
}

#[async_trait]
impl Action for PersistentNfsOverlay {
    fn name(&self) -> &str {
        "persistent-nfs-overlay"
    }

    fn description(&self) -> &str {
        "unpack overlay into persistent NFS"
    }

    fn summary(&self) -> &str {
        "add test overlay to NFS"
    }

    fn meta(&self) -> &ActionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ActionMeta {
        &mut self.meta
    }

    /// Publishes `nfsroot` and `serverip` only when every check passes.
    /// A second validation writes the same two values again.
    fn validate(&mut self, ctx: &mut JobContext) {
        let target = match &self.target {
            Some(target) => target,
            None => return,
        };
        let address = match target.address.as_deref() {
            Some(address) => address,
            None => {
                self.meta.error("Missing address for persistent NFS");
                return;
            }
        };
        let (server, root) = match Self::split_address(address) {
            Some(parts) => parts,
            None => {
                self.meta.error(format!("Unrecognised NFS URL: '{}'", address));
                return;
            }
        };
        if let Err(e) = self.probe.check(server) {
            self.meta.error(e.to_string());
            return;
        }

        let namespace = self.meta.parameters.namespace().to_string();
        let published = ctx
            .store
            .set(&namespace, NFS_ROOT, &root.to_string())
            .and_then(|_| ctx.store.set(&namespace, NFS_SERVER, &server.to_string()));
        if let Err(e) = published {
            self.meta.error(e.to_string());
        }
    }

    async fn run(
        &mut self,
        _ctx: &mut JobContext,
        connection: ConnectionSlot,
        _deadline: Deadline,
    ) -> Result<ConnectionSlot> {
        if self.target.is_some() {
            debug!("persistent NFS root published, nothing to extract");
        }
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OverlayError;
    use hilrun_job::{DeviceDescription, JobDefinition};
    use hilrun_pipeline::Job;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProbe {
        reachable: bool,
        probed: Mutex<Vec<String>>,
    }

    impl NfsProbe for RecordingProbe {
        fn check(&self, server: &str) -> crate::error::Result<()> {
            self.probed.lock().unwrap().push(server.to_string());
            if self.reachable {
                Ok(())
            } else {
                Err(OverlayError::NfsUnreachable {
                    server: server.to_string(),
                    message: "program 100003 version 3 is not available".to_string(),
                })
            }
        }
    }

    fn context() -> JobContext {
        JobContext::new(Job::new(7, JobDefinition::default(), DeviceDescription::default()))
    }

    fn action(address: Option<&str>, probe: Arc<RecordingProbe>) -> PersistentNfsOverlay {
        let target = PersistentNfs {
            address: address.map(str::to_string),
        };
        PersistentNfsOverlay::new(ActionParameters::default(), Some(target), probe)
    }

    #[test]
    fn test_publishes_server_and_root() {
        let probe = Arc::new(RecordingProbe {
            reachable: true,
            ..Default::default()
        });
        let mut ctx = context();
        let mut nfs = action(Some("10.0.0.5:/export/root"), probe.clone());
        nfs.validate(&mut ctx);

        assert!(nfs.errors().is_empty());
        assert_eq!(ctx.store.get("common", NFS_ROOT).as_deref(), Some("/export/root"));
        assert_eq!(ctx.store.get("common", NFS_SERVER).as_deref(), Some("10.0.0.5"));
        assert_eq!(*probe.probed.lock().unwrap(), vec!["10.0.0.5".to_string()]);
    }

    #[test]
    fn test_address_without_colon() {
        let probe = Arc::new(RecordingProbe::default());
        let mut ctx = context();
        let mut nfs = action(Some("10.0.0.5"), probe.clone());
        nfs.validate(&mut ctx);

        assert_eq!(nfs.errors(), &["Unrecognised NFS URL: '10.0.0.5'".to_string()]);
        assert!(ctx.store.is_empty());
        assert!(probe.probed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_missing_address() {
        let mut ctx = context();
        let mut nfs = action(None, Arc::new(RecordingProbe::default()));
        nfs.validate(&mut ctx);
        assert_eq!(nfs.errors(), &["Missing address for persistent NFS".to_string()]);
        assert!(ctx.store.is_empty());
    }

    #[test]
    fn test_unreachable_server_publishes_nothing() {
        let mut ctx = context();
        let mut nfs = action(Some("10.0.0.5:/export/root"), Arc::new(RecordingProbe::default()));
        nfs.validate(&mut ctx);
        assert_eq!(nfs.errors().len(), 1);
        assert!(nfs.errors()[0].contains("10.0.0.5"));
        assert!(ctx.store.is_empty());
    }

    #[tokio::test]
    async fn test_absent_target_is_noop() {
        let mut ctx = context();
        let mut nfs = PersistentNfsOverlay::new(
            ActionParameters::default(),
            None,
            Arc::new(RecordingProbe::default()),
        );
        nfs.validate(&mut ctx);
        assert!(nfs.errors().is_empty());
        assert!(nfs.run(&mut ctx, None, Deadline::none()).await.unwrap().is_none());
        assert!(ctx.store.is_empty());
    }

    fn entry(((action, label, key), value): ((&str, &str, &str), &serde_json::Value)) -> (String, serde_json::Value) {
        (format!("{}/{}/{}", action, label, key), value.clone())
    }

    #[test]
    fn test_validate_twice_same_entries() {
        let probe = Arc::new(RecordingProbe {
            reachable: true,
            ..Default::default()
        });
        let mut ctx = context();
        let mut nfs = action(Some("nfs.lab:/srv/rootfs"), probe);
        nfs.validate(&mut ctx);
        let first: Vec<_> = ctx.store.namespace_entries("common").map(entry).collect();
        nfs.meta_mut().errors.clear();
        nfs.validate(&mut ctx);
        let second: Vec<_> = ctx.store.namespace_entries("common").map(entry).collect();
        assert_eq!(first, second);
        assert_eq!(ctx.store.len(), 2);
    }
}
