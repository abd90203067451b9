//! Job runner
//!
//! Drives the root pipeline through validate and run, refusing to run a
//! tree that did not validate cleanly.

use crate::action::ConnectionSlot;
use crate::deadline::Deadline;
use crate::error::{JobError, ValidationReport};
use crate::job::JobContext;
use crate::pipeline::Pipeline;
use std::fmt;
use tracing::{info, warn};

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Tree built, not yet validated
    Created,
    /// Validated without errors
    Validated,
    /// Validation found errors
    Invalid,
    Running,
    /// Every action ran
    Complete,
    /// A run-phase error stopped the job
    Incomplete,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Complete | JobState::Incomplete)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Created => "created",
            JobState::Validated => "validated",
            JobState::Invalid => "invalid",
            JobState::Running => "running",
            JobState::Complete => "complete",
            JobState::Incomplete => "incomplete",
        };
        f.write_str(s)
    }
}

/// Owns the root pipeline and the job context
pub struct JobRunner {
    pipeline: Pipeline,
    ctx: JobContext,
    state: JobState,
}

impl JobRunner {
    pub fn new(pipeline: Pipeline, ctx: JobContext) -> Self {
        Self {
            pipeline,
            ctx,
            state: JobState::Created,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn context(&self) -> &JobContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut JobContext {
        &mut self.ctx
    }

    /// Apply the external device assignment to a declared protocol
    pub fn assign_protocol(
        &mut self,
        name: &str,
        assignment: serde_json::Value,
    ) -> Result<(), JobError> {
        if self.state.is_terminal() || self.state == JobState::Running {
            return Err(self.invalid_state("assign protocols"));
        }
        let protocol = self
            .ctx
            .job
            .protocol_mut(name)
            .ok_or_else(|| JobError::Protocol {
                protocol: name.to_string(),
                message: "not declared by this job".to_string(),
            })?;
        protocol.assign(assignment).map_err(|e| JobError::Protocol {
            protocol: name.to_string(),
            message: e.to_string(),
        })
    }

    /// Validate the whole tree, collecting every error
    pub fn validate(&mut self) -> Result<ValidationReport, JobError> {
        if self.state.is_terminal() || self.state == JobState::Running {
            return Err(self.invalid_state("validate"));
        }

        let mut report = ValidationReport::default();
        if let Err(e) = self.ctx.job.definition.validate() {
            report.issues.push(crate::error::ValidationIssue {
                action: "job".to_string(),
                level: crate::action::Level::root(),
                message: e.to_string(),
            });
        }
        report
            .issues
            .extend(self.pipeline.validate_actions(&mut self.ctx).issues);

        self.state = if report.is_valid() {
            info!(job = self.ctx.job.id, actions = self.pipeline.describe().len(), "job validated");
            JobState::Validated
        } else {
            warn!(job = self.ctx.job.id, errors = report.len(), "job is invalid");
            JobState::Invalid
        };
        Ok(report)
    }

    /// Run the validated tree with `connection` as the initial handle
    pub async fn run(&mut self, connection: ConnectionSlot) -> Result<ConnectionSlot, JobError> {
        match self.state {
            JobState::Validated => {}
            JobState::Invalid => {
                let report = self.pipeline.validate_actions(&mut self.ctx);
                return Err(JobError::Validation(report));
            }
            _ => return Err(self.invalid_state("run")),
        }

        let deadline = Deadline::from_timeout(self.ctx.job.timeout());
        self.state = JobState::Running;
        info!(job = self.ctx.job.id, "job running");

        match self
            .pipeline
            .run_actions(&mut self.ctx, connection, deadline)
            .await
        {
            Ok(connection) => {
                self.state = JobState::Complete;
                info!(job = self.ctx.job.id, "job complete");
                Ok(connection)
            }
            Err(e) => {
                self.state = JobState::Incomplete;
                let err = JobError::from(e);
                warn!(job = self.ctx.job.id, class = %err.class(), error = %err, "job incomplete");
                Err(err)
            }
        }
    }

    /// Hand back the context, e.g. to inspect the namespace store
    pub fn into_context(self) -> JobContext {
        self.ctx
    }

    fn invalid_state(&self, operation: &str) -> JobError {
        JobError::InvalidState {
            operation: operation.to_string(),
            state: self.state.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{FailingAction, NoopAction};
    use crate::error::ErrorClass;
    use crate::job::Job;
    use hilrun_job::{DeviceDescription, JobDefinition};

    fn runnable_job() -> Job {
        let definition = JobDefinition::from_yaml("job_timeout: 60\nactions:\n  - boot: {}\n").unwrap();
        Job::new(3, definition, DeviceDescription::default())
    }

    #[tokio::test]
    async fn test_validate_then_run() {
        let pipeline = Pipeline::new().with_action(NoopAction::new("boot"));
        let mut runner = JobRunner::new(pipeline, JobContext::new(runnable_job()));
        assert_eq!(runner.state(), JobState::Created);

        let report = runner.validate().unwrap();
        assert!(report.is_valid());
        assert_eq!(runner.state(), JobState::Validated);

        let connection = runner.run(None).await.unwrap();
        assert!(connection.is_none());
        assert_eq!(runner.state(), JobState::Complete);
    }

    #[tokio::test]
    async fn test_run_requires_validation() {
        let pipeline = Pipeline::new().with_action(NoopAction::new("boot"));
        let mut runner = JobRunner::new(pipeline, JobContext::new(runnable_job()));

        let err = runner.run(None).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_invalid_job_never_runs() {
        let pipeline = Pipeline::new()
            .with_action(NoopAction::new("deploy").with_validation_error("bad deploy"))
            .with_action(FailingAction::bug("boot", "must not run"));
        let mut runner = JobRunner::new(pipeline, JobContext::new(runnable_job()));

        let report = runner.validate().unwrap();
        assert_eq!(report.messages(), vec!["bad deploy"]);
        assert_eq!(runner.state(), JobState::Invalid);

        let err = runner.run(None).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Validation);
    }

    #[tokio::test]
    async fn test_run_failure_names_action() {
        let pipeline = Pipeline::new()
            .with_action(NoopAction::new("deploy"))
            .with_action(FailingAction::infrastructure("compress-overlay", "disk full"));
        let mut runner = JobRunner::new(pipeline, JobContext::new(runnable_job()));
        runner.validate().unwrap();

        let err = runner.run(None).await.unwrap_err();
        match &err {
            JobError::ActionFailed { action, level, .. } => {
                assert_eq!(action, "compress-overlay");
                assert_eq!(level.to_string(), "2");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.class(), ErrorClass::Infrastructure);
        assert_eq!(runner.state(), JobState::Incomplete);
    }

    #[test]
    fn test_job_level_errors_reported() {
        let job = Job::new(4, JobDefinition::default(), DeviceDescription::default());
        let mut runner = JobRunner::new(Pipeline::new(), JobContext::new(job));
        let report = runner.validate().unwrap();
        assert_eq!(report.messages(), vec!["missing required field: actions"]);
    }

    #[test]
    fn test_assign_undeclared_protocol() {
        let mut runner = JobRunner::new(Pipeline::new(), JobContext::new(runnable_job()));
        let err = runner
            .assign_protocol("lava-multinode", serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, JobError::Protocol { .. }));
    }
}
