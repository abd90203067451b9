//! Action trait definition
//!
//! An action is one step of a job with two phases:
//!
//! - `validate` runs static checks against the job, the device and data
//!   published by earlier-validated actions. Problems are recorded in the
//!   action's error list, never returned, so the whole tree can be checked
//!   in one walk. It may be called more than once and must not accumulate
//!   state between calls.
//! - `run` performs side effects, threading the connection handle from the
//!   previous action to the next.
//!
//! Composite actions own a nested [`Pipeline`], built once by the
//! action's constructor from an immutable snapshot of the job and device.

use crate::deadline::Deadline;
use crate::error::{ActionError, Result};
use crate::job::JobContext;
use crate::pipeline::Pipeline;
use async_trait::async_trait;
use hilrun_job::DEFAULT_NAMESPACE;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Position of an action in the tree, e.g. `1.3.2`
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Level(Vec<usize>);

impl Level {
    /// The level of the root pipeline itself
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Level of the `index`th (1-based) child below this level
    pub fn child(&self, index: usize) -> Self {
        let mut parts = self.0.clone();
        parts.push(index);
        Self(parts)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn parts(&self) -> &[usize] {
        &self.0
    }
}

impl From<Vec<usize>> for Level {
    fn from(parts: Vec<usize>) -> Self {
        Self(parts)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("0");
        }
        let parts: Vec<String> = self.0.iter().map(|p| p.to_string()).collect();
        f.write_str(&parts.join("."))
    }
}

/// Read-only parameters handed to an action at composition time
#[derive(Debug, Clone, Default)]
pub struct ActionParameters(Arc<Mapping>);

impl ActionParameters {
    pub fn new(mapping: Mapping) -> Self {
        Self(Arc::new(mapping))
    }

    /// Build parameters from any serializable block (a deploy block, ...)
    pub fn from_serialize<T: serde::Serialize>(value: &T) -> Result<Self> {
        match serde_yaml::to_value(value) {
            Ok(Value::Mapping(mapping)) => Ok(Self::new(mapping)),
            Ok(Value::Null) => Ok(Self::default()),
            Ok(other) => Err(ActionError::bug(format!(
                "action parameters must be a mapping, got {:?}",
                other
            ))),
            Err(e) => Err(ActionError::bug(format!("action parameters: {}", e))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Namespace this action belongs to
    pub fn namespace(&self) -> &str {
        self.get_str("namespace").unwrap_or(DEFAULT_NAMESPACE)
    }

    /// Whether the job author set a namespace explicitly
    pub fn declares_namespace(&self) -> bool {
        self.contains("namespace")
    }

    /// Decode the parameters into a typed block
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_yaml::from_value(Value::Mapping((*self.0).clone()))
            .map_err(|e| ActionError::bug(format!("action parameters: {}", e)))
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.0
    }
}

/// State every action carries
#[derive(Debug, Clone, Default)]
pub struct ActionMeta {
    pub level: Level,
    pub parameters: ActionParameters,
    pub errors: Vec<String>,
}

impl ActionMeta {
    pub fn new(parameters: ActionParameters) -> Self {
        Self {
            level: Level::root(),
            parameters,
            errors: Vec::new(),
        }
    }

    /// Record a validation problem
    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Handle to the device under test, threaded through `run`
pub trait Connection: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

/// The connection value passed between actions; `None` before boot
pub type ConnectionSlot = Option<Box<dyn Connection>>;

/// Core trait for pipeline actions
#[async_trait]
pub trait Action: Send + Sync {
    /// Stable identifier
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// One-line human text
    fn summary(&self) -> &str;

    fn meta(&self) -> &ActionMeta;

    fn meta_mut(&mut self) -> &mut ActionMeta;

    fn level(&self) -> &Level {
        &self.meta().level
    }

    fn parameters(&self) -> &ActionParameters {
        &self.meta().parameters
    }

    fn errors(&self) -> &[String] {
        &self.meta().errors
    }

    /// Nested pipeline of a composite action
    fn pipeline(&self) -> Option<&Pipeline> {
        None
    }

    fn pipeline_mut(&mut self) -> Option<&mut Pipeline> {
        None
    }

    /// Static checks. Record problems with `self.meta_mut().error(..)`.
    ///
    /// Called before the nested pipeline is validated, so anything this
    /// action publishes is visible to its children.
    fn validate(&mut self, ctx: &mut JobContext) {
        let _ = ctx;
    }

    /// Execute side effects and return the (possibly unchanged) connection.
    ///
    /// The default runs the nested pipeline, if any. Composite actions that
    /// override this do their own setup first and then call
    /// [`Pipeline::run_actions`].
    async fn run(
        &mut self,
        ctx: &mut JobContext,
        connection: ConnectionSlot,
        deadline: Deadline,
    ) -> Result<ConnectionSlot> {
        match self.pipeline_mut() {
            Some(pipeline) => pipeline.run_actions(ctx, connection, deadline).await,
            None => Ok(connection),
        }
    }
}

/// A no-op action, useful for assembling trees in tests
pub struct NoopAction {
    name: String,
    meta: ActionMeta,
    validation_errors: Vec<String>,
}

impl NoopAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            meta: ActionMeta::default(),
            validation_errors: Vec::new(),
        }
    }

    /// Record this message on every validate call
    pub fn with_validation_error(mut self, message: impl Into<String>) -> Self {
        self.validation_errors.push(message.into());
        self
    }
}

#[async_trait]
impl Action for NoopAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "a no-op action"
    }

    fn summary(&self) -> &str {
        "do nothing"
    }

    fn meta(&self) -> &ActionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ActionMeta {
        &mut self.meta
    }

    fn validate(&mut self, _ctx: &mut JobContext) {
        for message in self.validation_errors.clone() {
            self.meta.error(message);
        }
    }
}

/// An action whose run always fails with the given error class
pub struct FailingAction {
    name: String,
    meta: ActionMeta,
    infrastructure: bool,
    message: String,
}

impl FailingAction {
    /// Fails with an internal error
    pub fn bug(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            meta: ActionMeta::default(),
            infrastructure: false,
            message: message.into(),
        }
    }

    /// Fails with an infrastructure error
    pub fn infrastructure(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            infrastructure: true,
            ..Self::bug(name, message)
        }
    }
}

#[async_trait]
impl Action for FailingAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "an action that always fails"
    }

    fn summary(&self) -> &str {
        "fail"
    }

    fn meta(&self) -> &ActionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ActionMeta {
        &mut self.meta
    }

    async fn run(
        &mut self,
        _ctx: &mut JobContext,
        _connection: ConnectionSlot,
        _deadline: Deadline,
    ) -> Result<ConnectionSlot> {
        if self.infrastructure {
            Err(ActionError::infrastructure(self.message.clone()))
        } else {
            Err(ActionError::bug(self.message.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_display() {
        assert_eq!(Level::root().to_string(), "0");
        let level = Level::root().child(3).child(2).child(1);
        assert_eq!(level.to_string(), "3.2.1");
        assert_eq!(level.depth(), 3);
    }

    #[test]
    fn test_parameters_namespace() {
        let params = ActionParameters::default();
        assert_eq!(params.namespace(), "common");
        assert!(!params.declares_namespace());

        let mapping: Mapping = serde_yaml::from_str("namespace: target\nto: tftp\n").unwrap();
        let params = ActionParameters::new(mapping);
        assert_eq!(params.namespace(), "target");
        assert!(params.declares_namespace());
        assert_eq!(params.get_str("to"), Some("tftp"));
    }

    #[test]
    fn test_parameters_decode() {
        let block = hilrun_job::DeployParameters {
            to: Some("ssh".to_string()),
            authorize: Some("ssh".to_string()),
            ..Default::default()
        };
        let params = ActionParameters::from_serialize(&block).unwrap();
        assert_eq!(params.get_str("authorize"), Some("ssh"));

        let decoded: hilrun_job::DeployParameters = params.decode().unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn test_meta_errors() {
        let mut meta = ActionMeta::default();
        assert!(meta.is_valid());
        meta.error("broken");
        assert!(!meta.is_valid());
        assert_eq!(meta.errors, vec!["broken".to_string()]);
    }
}
