//! Host-side checks run during validation
//!
//! These only read: file metadata, `PATH` lookups and an RPC probe.

use crate::error::{OverlayError, Result};
use hilrun_job::{render_scalar, MethodTable};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Identity file declared by the device's ssh deploy method.
///
/// Both the private key and its `.pub` must exist and be readable.
pub fn check_ssh_identity_file(methods: &MethodTable) -> Result<PathBuf> {
    let ssh = methods
        .method("ssh")
        .ok_or_else(|| OverlayError::Identity("no ssh deploy method parameters".to_string()))?;
    let identity = ssh
        .get("identity_file")
        .map(render_scalar)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| OverlayError::Identity("no identity_file for the ssh method".to_string()))?;

    let identity = PathBuf::from(identity);
    let public = public_key_path(&identity);
    for path in [&identity, &public] {
        std::fs::File::open(path).map_err(|e| {
            OverlayError::Identity(format!("cannot read {}: {}", path.display(), e))
        })?;
    }
    Ok(identity)
}

/// `<identity>.pub`
pub fn public_key_path(identity: &Path) -> PathBuf {
    let mut public = identity.as_os_str().to_owned();
    public.push(".pub");
    PathBuf::from(public)
}

/// Reachability probe for an NFS server
pub trait NfsProbe: Send + Sync {
    fn check(&self, server: &str) -> Result<()>;
}

/// Probes with `rpcinfo -u <server> nfs 3`
#[derive(Debug, Default, Clone)]
pub struct RpcInfoProbe;

impl NfsProbe for RpcInfoProbe {
    fn check(&self, server: &str) -> Result<()> {
        let rpcinfo = which::which("rpcinfo").map_err(|e| OverlayError::ToolMissing {
            tool: "rpcinfo".to_string(),
            message: e.to_string(),
        })?;
        debug!(server, rpcinfo = %rpcinfo.display(), "probing NFS server");
        let output = Command::new(&rpcinfo)
            .args(["-u", server, "nfs", "3"])
            .output()
            .map_err(|e| OverlayError::NfsUnreachable {
                server: server.to_string(),
                message: e.to_string(),
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(OverlayError::NfsUnreachable {
                server: server.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn methods(yaml: &str) -> MethodTable {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_identity_file_present() {
        let temp = tempdir().unwrap();
        let key = temp.path().join("id_rsa");
        std::fs::write(&key, "private").unwrap();
        std::fs::write(temp.path().join("id_rsa.pub"), "ssh-rsa AAAA").unwrap();

        let table = methods(&format!(
            "methods:\n  ssh:\n    identity_file: {}\n",
            key.display()
        ));
        assert_eq!(check_ssh_identity_file(&table).unwrap(), key);
    }

    #[test]
    fn test_identity_file_missing_public_key() {
        let temp = tempdir().unwrap();
        let key = temp.path().join("id_rsa");
        std::fs::write(&key, "private").unwrap();

        let table = methods(&format!(
            "methods:\n  ssh:\n    identity_file: {}\n",
            key.display()
        ));
        let err = check_ssh_identity_file(&table).unwrap_err();
        assert!(err.to_string().contains("id_rsa.pub"));
    }

    #[test]
    fn test_identity_file_not_declared() {
        let err = check_ssh_identity_file(&methods("methods:\n  ssh: {}\n")).unwrap_err();
        assert!(matches!(err, OverlayError::Identity(_)));

        let err = check_ssh_identity_file(&methods("methods:\n  tftp: {}\n")).unwrap_err();
        assert!(matches!(err, OverlayError::Identity(_)));
    }

    #[test]
    fn test_public_key_path() {
        assert_eq!(
            public_key_path(Path::new("/etc/keys/id_rsa")),
            PathBuf::from("/etc/keys/id_rsa.pub")
        );
    }
}
