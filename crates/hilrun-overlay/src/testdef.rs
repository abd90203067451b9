//! Test definition materialisation
//!
//! The overlay engine only fixes where definitions go; how they are fetched
//! belongs to a [`TestDefinitionFactory`]. The default,
//! [`InlineTestDefinitions`], handles definitions whose body is written in
//! the job itself.

use crate::keys::{results_path, LOCATION, RESULTS_DIR, TEST_RUNNER_DIRS};
use async_trait::async_trait;
use hilrun_job::{DeployParameters, TestDefinition};
use hilrun_pipeline::{
    Action, ActionError, ActionMeta, ActionParameters, ConnectionSlot, Deadline, Job, JobContext,
    Result,
};
use tokio::fs;
use tracing::{debug, info};

/// Builds the step that populates `<results>/tests`
pub trait TestDefinitionFactory: Send + Sync {
    fn build(&self, deploy: &DeployParameters, job: &Job) -> Result<Box<dyn Action>>;
}

/// Factory for [`TestDefinitionAction`]
#[derive(Debug, Default, Clone)]
pub struct InlineTestDefinitions;

impl TestDefinitionFactory for InlineTestDefinitions {
    fn build(&self, deploy: &DeployParameters, job: &Job) -> Result<Box<dyn Action>> {
        Ok(Box::new(TestDefinitionAction::new(deploy, job)?))
    }
}

/// Writes inline test definitions into the overlay and records the runner
/// configuration listing them in order.
pub struct TestDefinitionAction {
    meta: ActionMeta,
    definitions: Vec<TestDefinition>,
}

impl TestDefinitionAction {
    pub fn new(deploy: &DeployParameters, job: &Job) -> Result<Self> {
        let parameters = ActionParameters::from_serialize(deploy)?;
        let definitions = job
            .definition
            .test_definitions(parameters.namespace())
            .into_iter()
            .cloned()
            .collect();
        Ok(Self {
            meta: ActionMeta::new(parameters),
            definitions,
        })
    }

    fn directory_name(index: usize, definition: &TestDefinition) -> String {
        format!("{}_{}", index, definition.name)
    }
}

#[async_trait]
impl Action for TestDefinitionAction {
    fn name(&self) -> &str {
        "test-definition"
    }

    fn description(&self) -> &str {
        "load test definitions into image"
    }

    fn summary(&self) -> &str {
        "loading test definitions"
    }

    fn meta(&self) -> &ActionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ActionMeta {
        &mut self.meta
    }

    fn validate(&mut self, _ctx: &mut JobContext) {
        for definition in &self.definitions {
            if definition.name.is_empty() {
                self.meta.error("test definition without a name");
            } else if definition.from != "inline" {
                self.meta.error(format!(
                    "unsupported test definition source '{}' for '{}'",
                    definition.from, definition.name
                ));
            } else if definition.repository.is_none() {
                self.meta.error(format!(
                    "inline test definition '{}' has no body",
                    definition.name
                ));
            }
        }
    }

    async fn run(
        &mut self,
        ctx: &mut JobContext,
        connection: ConnectionSlot,
        _deadline: Deadline,
    ) -> Result<ConnectionSlot> {
        let namespace = self.meta.parameters.namespace().to_string();
        let location = ctx.store.require(&namespace, LOCATION)?;
        let results_dir = ctx.store.require(&namespace, RESULTS_DIR)?;
        let lava_path = results_path(&location, &results_dir);

        let mut runner_dirs = Vec::with_capacity(self.definitions.len());
        for (index, definition) in self.definitions.iter().enumerate() {
            let dir_name = Self::directory_name(index, definition);
            let test_dir = lava_path.join("tests").join(&dir_name);
            let file = test_dir.join(definition.path.trim_start_matches('/'));
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent).await?;
            }
            let body = definition.repository.as_ref().ok_or_else(|| {
                ActionError::bug(format!("inline test definition '{}' has no body", definition.name))
            })?;
            let yaml = serde_yaml::to_string(body)
                .map_err(|e| ActionError::bug(format!("test definition '{}': {}", definition.name, e)))?;
            fs::write(&file, yaml).await?;
            debug!(definition = %definition.name, path = %file.display(), "test definition written");
            runner_dirs.push(format!("{}/tests/{}", results_dir, dir_name));
        }

        let mut conf = runner_dirs.join("\n");
        if !conf.is_empty() {
            conf.push('\n');
        }
        fs::write(lava_path.join("lava-test-runner.conf"), conf).await?;
        ctx.store.set(&namespace, TEST_RUNNER_DIRS, &runner_dirs)?;
        info!(namespace = %namespace, count = runner_dirs.len(), "test definitions loaded");
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hilrun_job::{DeviceDescription, JobDefinition};
    use std::path::PathBuf;
    use tempfile::tempdir;

    const JOB: &str = r#"
actions:
  - deploy:
      to: tftp
  - test:
      definitions:
        - from: inline
          name: smoke
          path: inline/smoke.yaml
          repository:
            metadata:
              name: smoke
            run:
              steps: [echo ok]
"#;

    fn job(yaml: &str) -> Job {
        Job::new(42, JobDefinition::from_yaml(yaml).unwrap(), DeviceDescription::default())
    }

    #[test]
    fn test_validate_rejects_remote_sources() {
        let job = job(
            "actions:\n  - deploy: {}\n  - test:\n      definitions:\n        - {from: git, name: ltp, path: ltp.yaml}\n",
        );
        let mut action = TestDefinitionAction::new(&DeployParameters::default(), &job).unwrap();
        let mut ctx = JobContext::new(job);
        action.validate(&mut ctx);
        assert_eq!(
            action.errors(),
            &["unsupported test definition source 'git' for 'ltp'".to_string()]
        );
    }

    #[tokio::test]
    async fn test_run_writes_definitions() {
        let temp = tempdir().unwrap();
        let job = job(JOB);
        let mut action = TestDefinitionAction::new(&DeployParameters::default(), &job).unwrap();
        let mut ctx = JobContext::new(job);
        ctx.store
            .set("common", LOCATION, &PathBuf::from(temp.path()))
            .unwrap();
        ctx.store
            .set("common", RESULTS_DIR, &"/lava-42".to_string())
            .unwrap();

        action.validate(&mut ctx);
        assert!(action.errors().is_empty());
        action.run(&mut ctx, None, Deadline::none()).await.unwrap();

        let written = temp.path().join("lava-42/tests/0_smoke/inline/smoke.yaml");
        let body: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(written).unwrap()).unwrap();
        assert_eq!(body["metadata"]["name"], serde_yaml::Value::from("smoke"));

        let conf = std::fs::read_to_string(temp.path().join("lava-42/lava-test-runner.conf")).unwrap();
        assert_eq!(conf, "/lava-42/tests/0_smoke\n");
        assert_eq!(
            ctx.store.get("common", TEST_RUNNER_DIRS).unwrap(),
            vec!["/lava-42/tests/0_smoke".to_string()]
        );
    }

    #[tokio::test]
    async fn test_run_without_location_is_bug() {
        let job = job(JOB);
        let mut action = TestDefinitionAction::new(&DeployParameters::default(), &job).unwrap();
        let mut ctx = JobContext::new(job);
        let err = action.run(&mut ctx, None, Deadline::none()).await.unwrap_err();
        assert_eq!(err.class(), hilrun_pipeline::ErrorClass::Bug);
    }
}
