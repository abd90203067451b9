//! Job and per-run context

use crate::error::{ActionError, Result};
use crate::events::{EventReporter, NoopReporter};
use crate::namespace::NamespaceStore;
use crate::protocol::Protocol;
use hilrun_job::{DeviceDescription, JobDefinition};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// The unit of work: one submission against one device
#[derive(Debug)]
pub struct Job {
    pub id: u64,
    pub definition: JobDefinition,
    pub device: DeviceDescription,
    protocols: Vec<Box<dyn Protocol>>,
}

impl Job {
    pub fn new(id: u64, definition: JobDefinition, device: DeviceDescription) -> Self {
        Self {
            id,
            definition,
            device,
            protocols: Vec::new(),
        }
    }

    pub fn with_protocol(mut self, protocol: Box<dyn Protocol>) -> Self {
        self.protocols.push(protocol);
        self
    }

    pub fn with_protocols(mut self, protocols: Vec<Box<dyn Protocol>>) -> Self {
        self.protocols.extend(protocols);
        self
    }

    pub fn protocols(&self) -> &[Box<dyn Protocol>] {
        &self.protocols
    }

    pub fn protocol(&self, name: &str) -> Option<&dyn Protocol> {
        self.protocols
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }

    pub fn protocol_mut(&mut self, name: &str) -> Option<&mut Box<dyn Protocol>> {
        self.protocols.iter_mut().find(|p| p.name() == name)
    }

    /// First protocol of concrete type `P`
    pub fn protocol_as<P: 'static>(&self) -> Option<&P> {
        self.protocols
            .iter()
            .find_map(|p| p.as_any().downcast_ref::<P>())
    }

    pub fn protocol_as_mut<P: 'static>(&mut self) -> Option<&mut P> {
        self.protocols
            .iter_mut()
            .find_map(|p| p.as_any_mut().downcast_mut::<P>())
    }

    /// Where job artifacts go
    pub fn output_dir(&self) -> Option<&Path> {
        self.definition.output_dir.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.definition.job_timeout.map(Duration::from_secs)
    }
}

/// Everything an action can touch while validating or running
pub struct JobContext {
    pub job: Job,
    pub store: NamespaceStore,
    reporter: Arc<dyn EventReporter>,
    tmp_root: Option<PathBuf>,
    scratch: Vec<TempDir>,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            store: NamespaceStore::new(),
            reporter: Arc::new(NoopReporter),
            tmp_root: None,
            scratch: Vec::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn EventReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Parent directory for private temporary directories
    pub fn with_tmp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.tmp_root = Some(root.into());
        self
    }

    pub fn reporter(&self) -> &dyn EventReporter {
        self.reporter.as_ref()
    }

    /// Create a private temporary directory that lives as long as the job
    pub fn mkdtemp(&mut self, prefix: &str) -> Result<PathBuf> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        let dir = match &self.tmp_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| ActionError::infrastructure(format!("unable to create temporary directory: {}", e)))?;
        let path = dir.path().to_path_buf();
        self.scratch.push(dir);
        Ok(path)
    }

    /// Keep the temporary directories on disk after the context is dropped
    pub fn persist_scratch(&mut self) -> Vec<PathBuf> {
        self.scratch.drain(..).map(|dir| dir.into_path()).collect()
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job", &self.job.id)
            .field("store_entries", &self.store.len())
            .field("tmp_root", &self.tmp_root)
            .field("scratch", &self.scratch.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mkdtemp_under_root() {
        let root = tempfile::tempdir().unwrap();
        let job = Job::new(7, JobDefinition::default(), DeviceDescription::default());
        let mut ctx = JobContext::new(job).with_tmp_root(root.path());

        let path = ctx.mkdtemp("overlay-").unwrap();
        assert!(path.is_dir());
        assert!(path.starts_with(root.path()));

        drop(ctx);
        assert!(!path.exists());
    }

    #[test]
    fn test_persist_scratch() {
        let root = tempfile::tempdir().unwrap();
        let job = Job::new(7, JobDefinition::default(), DeviceDescription::default());
        let mut ctx = JobContext::new(job).with_tmp_root(root.path());

        let path = ctx.mkdtemp("overlay-").unwrap();
        let kept = ctx.persist_scratch();
        drop(ctx);
        assert_eq!(kept, vec![path.clone()]);
        assert!(path.exists());
    }

    #[test]
    fn test_job_timeout() {
        let definition = JobDefinition {
            job_timeout: Some(90),
            ..Default::default()
        };
        let job = Job::new(1, definition, DeviceDescription::default());
        assert_eq!(job.timeout(), Some(Duration::from_secs(90)));
        assert!(job.protocol("lava-multinode").is_none());
    }
}
