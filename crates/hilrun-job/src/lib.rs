//! hilrun job and device types
//!
//! This crate provides the serde-typed view of the two inputs every
//! dispatch starts from:
//!
//! - `JobDefinition` - the submitted job (actions, protocols, secrets,
//!   timeouts, output directory)
//! - `DeviceDescription` - the rendered device dictionary (deploy methods,
//!   network interfaces, static probe data, storage methods)
//!
//! Both are loaded from YAML. Nothing here executes anything; the pipeline
//! crates read these types through an immutable snapshot.

pub mod definition;
pub mod device;
pub mod error;

pub use definition::*;
pub use device::*;
pub use error::*;

use serde_yaml::{Mapping, Value};

/// Key injected by the job parser to track source lines. Never written out.
pub const BOOKKEEPING_KEY: &str = "yaml_line";

/// Namespace used when a job action does not declare one
pub const DEFAULT_NAMESPACE: &str = "common";

/// Render a scalar YAML value the way it appears in generated scripts.
///
/// Strings are emitted verbatim, numbers and booleans in their plain form,
/// null as an empty string. Sequences and mappings fall back to flow YAML.
pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Tagged(tagged) => render_scalar(&tagged.value),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Entries of a mapping in declaration order, skipping the bookkeeping key.
pub fn entries_without_bookkeeping(map: &Mapping) -> Vec<(String, String)> {
    map.iter()
        .map(|(k, v)| (render_scalar(k), render_scalar(v)))
        .filter(|(k, _)| k != BOOKKEEPING_KEY)
        .collect()
}
