//! Ordered, hierarchical container of actions
//!
//! A pipeline owns its actions, numbers them as they are added, validates
//! the whole subtree in one pre-order walk and runs the actions strictly
//! in insertion order, handing each one the connection returned by its
//! predecessor.

use crate::action::{Action, ConnectionSlot, Level};
use crate::deadline::Deadline;
use crate::error::{Result, ValidationIssue, ValidationReport};
use crate::events::PipelineEvent;
use crate::job::JobContext;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;
use tracing::{debug, error, info, info_span, Instrument};

/// One line of a pipeline description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSummary {
    pub level: Level,
    pub name: String,
    pub description: String,
    pub summary: String,
}

/// Ordered container of actions
#[derive(Default)]
pub struct Pipeline {
    level: Level,
    actions: Vec<Box<dyn Action>>,
}

impl Pipeline {
    /// A root pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action, assigning it the next level below this pipeline.
    ///
    /// Levels of any nested pipeline are reassigned to match.
    pub fn add_action(&mut self, mut action: Box<dyn Action>) {
        let level = self.level.child(self.actions.len() + 1);
        assign_level(action.as_mut(), level);
        self.actions.push(action);
    }

    /// Builder form of [`Pipeline::add_action`]
    pub fn with_action(mut self, action: impl Action + 'static) -> Self {
        self.add_action(Box::new(action));
        self
    }

    pub fn level(&self) -> &Level {
        &self.level
    }

    pub fn actions(&self) -> &[Box<dyn Action>] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn relevel(&mut self, level: Level) {
        self.level = level;
        for (i, action) in self.actions.iter_mut().enumerate() {
            let child = self.level.child(i + 1);
            assign_level(action.as_mut(), child);
        }
    }

    /// Flattened pre-order description of the tree
    pub fn describe(&self) -> Vec<ActionSummary> {
        let mut out = Vec::new();
        self.describe_into(&mut out);
        out
    }

    fn describe_into(&self, out: &mut Vec<ActionSummary>) {
        for action in &self.actions {
            out.push(ActionSummary {
                level: action.level().clone(),
                name: action.name().to_string(),
                description: action.description().to_string(),
                summary: action.summary().to_string(),
            });
            if let Some(pipeline) = action.pipeline() {
                pipeline.describe_into(out);
            }
        }
    }

    /// First action with `name`, searching the whole tree pre-order
    pub fn find(&self, name: &str) -> Option<&dyn Action> {
        for action in &self.actions {
            if action.name() == name {
                return Some(action.as_ref());
            }
            if let Some(found) = action.pipeline().and_then(|p| p.find(name)) {
                return Some(found);
            }
        }
        None
    }

    /// Validate every action in the tree, parents before children.
    ///
    /// Each action's previous errors are cleared first, so repeated calls
    /// yield the same report.
    pub fn validate_actions(&mut self, ctx: &mut JobContext) -> ValidationReport {
        let mut report = ValidationReport::default();
        self.validate_into(ctx, &mut report);
        report
    }

    fn validate_into(&mut self, ctx: &mut JobContext, report: &mut ValidationReport) {
        for action in self.actions.iter_mut() {
            action.meta_mut().errors.clear();
            action.validate(ctx);
            for message in action.errors() {
                report.issues.push(ValidationIssue {
                    action: action.name().to_string(),
                    level: action.level().clone(),
                    message: message.clone(),
                });
            }
            if let Some(pipeline) = action.pipeline_mut() {
                pipeline.validate_into(ctx, report);
            }
        }
    }

    /// Logical AND of every action's validity, as of the last validation
    pub fn is_valid(&self) -> bool {
        self.actions.iter().all(|action| {
            action.meta().is_valid() && action.pipeline().map_or(true, Pipeline::is_valid)
        })
    }

    /// Run every action in order, threading the connection.
    ///
    /// The first failure stops the walk; the error is attributed to the
    /// innermost action that raised it.
    pub fn run_actions<'a>(
        &'a mut self,
        ctx: &'a mut JobContext,
        connection: ConnectionSlot,
        deadline: Deadline,
    ) -> Pin<Box<dyn Future<Output = Result<ConnectionSlot>> + Send + 'a>> {
        Box::pin(async move {
            let mut connection = connection;
            for action in self.actions.iter_mut() {
                let name = action.name().to_string();
                let level = action.level().clone();

                deadline
                    .check(&name)
                    .map_err(|e| e.in_action(&name, &level))?;

                ctx.reporter().report(PipelineEvent::ActionStarted {
                    action: name.clone(),
                    level: level.to_string(),
                });
                debug!(action = %name, level = %level, "starting action");
                let started = Instant::now();

                let span = info_span!("action", name = %name, level = %level);
                let result = action
                    .run(ctx, connection, deadline)
                    .instrument(span)
                    .await;

                match result {
                    Ok(next) => {
                        let duration = started.elapsed();
                        info!(action = %name, level = %level, elapsed_ms = duration.as_millis() as u64, "action complete");
                        ctx.reporter().report(PipelineEvent::ActionCompleted {
                            action: name,
                            level: level.to_string(),
                            duration,
                        });
                        connection = next;
                    }
                    Err(e) => {
                        let e = e.in_action(&name, &level);
                        error!(action = %name, level = %level, class = %e.class(), error = %e, "action failed");
                        ctx.reporter().report(PipelineEvent::ActionFailed {
                            action: name,
                            level: level.to_string(),
                            error: e.to_string(),
                        });
                        return Err(e);
                    }
                }
            }
            Ok(connection)
        })
    }
}

fn assign_level(action: &mut dyn Action, level: Level) {
    if let Some(pipeline) = action.pipeline_mut() {
        pipeline.relevel(level.clone());
    }
    action.meta_mut().level = level;
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .actions
            .iter()
            .map(|a| format!("{} {}", a.level(), a.name()))
            .collect();
        f.debug_struct("Pipeline")
            .field("level", &self.level)
            .field("actions", &names)
            .finish()
    }
}
